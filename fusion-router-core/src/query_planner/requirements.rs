//! Resolves the variable bindings an execution step's resolver requires.
//!
//! Resolution order per required name: the step's own root-field arguments,
//! then the parent selection's arguments, then a key field read from the
//! parent entity (injected into the parent step's selection when missing),
//! then a state variable exported by an earlier step. Failing all four is a
//! fatal planning error.

use crate::prelude::graphql::*;
use crate::query_planner::classifier::ExecutionStep;
use crate::spec::query::Operation;
use crate::spec::selection::{ArgumentValue, FieldSelection};

/// How one required value reaches the subgraph request.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum VariableSource {
    /// A forwarded client variable, under its original name.
    Client,

    /// An already-coerced literal, inlined into the document.
    Literal(Value),

    /// Read from each parent entity object at execution time.
    ParentField { field: String },

    /// Looked up in the export store at execution time.
    State { name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct VariableBinding {
    /// The resolver argument this binding satisfies.
    pub(crate) requirement: String,

    /// The variable name in the sub-document. Unused for literals.
    pub(crate) name: String,

    /// The declared type, in composite names. The formatter rewrites the
    /// inner name to the subgraph-local one.
    pub(crate) ty: FieldType,

    pub(crate) source: VariableSource,
}

/// The resolved bindings of one step: the entity resolver's arguments plus
/// one binding set per auto-paged connection.
#[derive(Debug, Default)]
pub(crate) struct StepRequirements {
    pub(crate) resolver: Vec<VariableBinding>,
    pub(crate) paged: Vec<Vec<VariableBinding>>,
}

pub(crate) fn state_variable_name(step_id: usize, export: &str) -> String {
    format!("_export_{}_{}", step_id, export)
}

#[tracing::instrument(skip_all, level = "debug", name = "resolve_requirements")]
pub(crate) fn resolve_requirements(
    steps: &mut [ExecutionStep],
    operation: &Operation,
    metadata: &FusionMetadata,
) -> Result<Vec<StepRequirements>, PlanError> {
    let mut resolved = Vec::with_capacity(steps.len());

    for index in 0..steps.len() {
        let mut requirements = StepRequirements::default();

        if let Some(resolver_id) = steps[index].resolver.clone() {
            let resolver =
                metadata
                    .resolver(&resolver_id)
                    .ok_or_else(|| PlanError::ArgumentVariableExpected {
                        name: resolver_id.clone(),
                        subgraph: steps[index].subgraph.clone(),
                    })?;
            for requirement in resolver.requires.iter() {
                let ty = resolver
                    .argument_types
                    .get(requirement)
                    .cloned()
                    .unwrap_or(FieldType::Id);
                let binding = resolve_one(
                    steps, index, requirement, ty, operation, metadata,
                )?;
                requirements.resolver.push(binding);
            }
        }

        for paged_index in 0..steps[index].paged.len() {
            let paged = &steps[index].paged[paged_index];
            let resolver_id = paged.definition.resolver.clone();
            let entity_path = paged.entity_path.clone();
            let parent_type = paged.parent_type.clone();

            let resolver =
                metadata
                    .resolver(&resolver_id)
                    .ok_or_else(|| PlanError::ArgumentVariableExpected {
                        name: resolver_id.clone(),
                        subgraph: steps[index].subgraph.clone(),
                    })?;
            let mut bindings = Vec::new();
            for requirement in resolver.requires.iter() {
                let ty = resolver
                    .argument_types
                    .get(requirement)
                    .cloned()
                    .unwrap_or(FieldType::Id);
                // the master query must select the key so follow-up pages
                // can re-enter the entity
                let key_type = metadata
                    .field_type(&parent_type, requirement)
                    .cloned()
                    .ok_or_else(|| PlanError::ArgumentVariableExpected {
                        name: requirement.clone(),
                        subgraph: steps[index].subgraph.clone(),
                    })?;
                inject_key_field(
                    &mut steps[index].root_selections,
                    &entity_path,
                    requirement,
                    key_type,
                );
                bindings.push(VariableBinding {
                    requirement: requirement.clone(),
                    name: variable_name_for(requirement, operation),
                    ty,
                    source: VariableSource::ParentField {
                        field: requirement.clone(),
                    },
                });
            }
            requirements.paged.push(bindings);
        }

        resolved.push(requirements);
    }

    Ok(resolved)
}

fn resolve_one(
    steps: &mut [ExecutionStep],
    index: usize,
    requirement: &str,
    ty: FieldType,
    operation: &Operation,
    metadata: &FusionMetadata,
) -> Result<VariableBinding, PlanError> {
    // 1. the step's own root-field arguments
    if let Some(value) = argument_in_selections(&steps[index].root_selections, requirement) {
        return binding_from_argument(requirement, &value, ty, operation);
    }

    let parent = steps[index].parent.clone();

    if let Some(link) = &parent {
        // child steps are always created after their parent
        let (head, tail) = steps.split_at_mut(index);
        let step = &mut tail[0];
        let parent_step = &mut head[link.step_id];

        // 2. the parent selection's arguments
        if let Some(field) = field_at_path_mut(&mut parent_step.root_selections, &link.path) {
            if let Some(value) = field.argument(requirement).cloned() {
                return binding_from_argument(requirement, &value, ty, operation);
            }
        }

        // 3. a key field on the parent entity, injected when missing
        let servable = metadata
            .field_bindings(&link.type_name, requirement)
            .iter()
            .any(|binding| binding.subgraph == parent_step.subgraph);
        if servable {
            let key_type = metadata
                .field_type(&link.type_name, requirement)
                .cloned()
                .unwrap_or(FieldType::Id);
            if inject_key_field(
                &mut parent_step.root_selections,
                &link.path,
                requirement,
                key_type,
            ) {
                return Ok(VariableBinding {
                    requirement: requirement.to_string(),
                    name: variable_name_for(requirement, operation),
                    ty,
                    source: VariableSource::ParentField {
                        field: requirement.to_string(),
                    },
                });
            }
        }

        // 4. a state variable exported by an earlier step
        for producer in head.iter_mut() {
            if let Some(export) = producer
                .exports
                .iter()
                .find(|export| export.name == requirement)
            {
                let name = state_variable_name(producer.id, &export.name);
                if !step.depends_on.contains(&producer.id) {
                    step.depends_on.push(producer.id);
                }
                return Ok(VariableBinding {
                    requirement: requirement.to_string(),
                    name: name.clone(),
                    ty: ty.clone(),
                    source: VariableSource::State { name },
                });
            }
        }
    } else {
        // root steps can still consume exports from earlier root steps
        let (head, tail) = steps.split_at_mut(index);
        let step = &mut tail[0];
        for producer in head.iter_mut() {
            if let Some(export) = producer
                .exports
                .iter()
                .find(|export| export.name == requirement)
            {
                let name = state_variable_name(producer.id, &export.name);
                if !step.depends_on.contains(&producer.id) {
                    step.depends_on.push(producer.id);
                }
                // the document declares the contract the resolver's own
                // argument specifies, not the exporting field's type
                return Ok(VariableBinding {
                    requirement: requirement.to_string(),
                    name: name.clone(),
                    ty: ty.clone(),
                    source: VariableSource::State { name },
                });
            }
        }
    }

    Err(PlanError::ArgumentVariableExpected {
        name: requirement.to_string(),
        subgraph: steps[index].subgraph.clone(),
    })
}

fn binding_from_argument(
    requirement: &str,
    value: &ArgumentValue,
    ty: FieldType,
    operation: &Operation,
) -> Result<VariableBinding, PlanError> {
    match value {
        // client-sourced values are forwarded so the subgraph validates the
        // same variable contract the client specified
        ArgumentValue::Variable(variable) => {
            let (client_ty, _default) =
                operation
                    .variables
                    .get(variable)
                    .ok_or_else(|| PlanError::ParseError {
                        reason: format!("variable '${}' is not defined", variable),
                    })?;
            Ok(VariableBinding {
                requirement: requirement.to_string(),
                name: variable.clone(),
                ty: client_ty.clone(),
                source: VariableSource::Client,
            })
        }
        // coerced literals are inlined, never re-exposed as variables
        ArgumentValue::Value(value) => Ok(VariableBinding {
            requirement: requirement.to_string(),
            name: String::new(),
            ty,
            source: VariableSource::Literal(value.clone()),
        }),
    }
}

fn argument_in_selections(selections: &[Selection], name: &str) -> Option<ArgumentValue> {
    selections.iter().find_map(|selection| match selection {
        Selection::Field(field) => field.argument(name).cloned(),
        Selection::InlineFragment(fragment) => {
            argument_in_selections(&fragment.selection_set, name)
        }
    })
}

/// A parent-entity requirement reuses its own name as the document variable
/// name unless the client operation already declares that name.
fn variable_name_for(requirement: &str, operation: &Operation) -> String {
    if operation.variables.contains_key(requirement) {
        format!("_entity_{}", requirement)
    } else {
        requirement.to_string()
    }
}

/// Navigate a selection tree along `path` (response names, `@` skipped) and
/// return the field the path ends on.
fn field_at_path_mut<'a>(
    selections: &'a mut [Selection],
    path: &Path,
) -> Option<&'a mut FieldSelection> {
    let mut keys = path.iter().filter_map(|element| match element {
        PathElement::Key(key) => Some(key.as_str().to_string()),
        _ => None,
    });
    let first = keys.next()?;
    let mut field = find_field_mut(selections, &first)?;
    for key in keys {
        field = find_field_mut(field.selection_set.as_deref_mut()?, &key)?;
    }
    Some(field)
}

fn find_field_mut<'a>(
    selections: &'a mut [Selection],
    response_name: &str,
) -> Option<&'a mut FieldSelection> {
    for selection in selections.iter_mut() {
        match selection {
            Selection::Field(field) if field.response_name() == response_name => {
                return Some(field);
            }
            Selection::InlineFragment(fragment) => {
                if let Some(found) = find_field_mut(&mut fragment.selection_set, response_name) {
                    return Some(found);
                }
            }
            Selection::Field(_) => {}
        }
    }
    None
}

/// Ensure `name` is selected on the entity `path` points at. Returns `false`
/// when the path cannot be navigated.
fn inject_key_field(
    selections: &mut Vec<Selection>,
    path: &Path,
    name: &str,
    ty: FieldType,
) -> bool {
    let target = if path.iter().any(|e| matches!(e, PathElement::Key(_))) {
        match field_at_path_mut(selections, path) {
            Some(field) => match field.selection_set.as_mut() {
                Some(selection_set) => selection_set,
                None => return false,
            },
            None => return false,
        }
    } else {
        &mut *selections
    };

    let already_selected = target.iter().any(|selection| {
        matches!(
            selection,
            Selection::Field(field) if field.name == name && field.alias.is_none()
        )
    });
    if !already_selected {
        target.push(Selection::Field(FieldSelection {
            name: name.to_string(),
            alias: None,
            arguments: Vec::new(),
            include_skip: IncludeSkip::passthrough(),
            selection_set: None,
            field_type: ty,
        }));
    }
    true
}
