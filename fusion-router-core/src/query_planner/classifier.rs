//! Partitions the client operation into execution steps.
//!
//! Each step covers a contiguous region of the selection tree servable by a
//! single subgraph. Fields a subgraph cannot serve re-enter their parent
//! entity from another subgraph through an entity resolver, which shows up
//! here as a child step with a [`ParentLink`].

use crate::metadata::PagedConnectionDefinition;
use crate::prelude::graphql::*;
use crate::spec::query::Operation;
use crate::spec::selection::{FieldSelection, InlineFragmentSelection};

/// A planning unit bound to exactly one target subgraph. Created once
/// during classification, immutable afterward except for requirement
/// resolution, which may inject key fields and dependency edges.
#[derive(Debug)]
pub(crate) struct ExecutionStep {
    pub(crate) id: usize,
    pub(crate) subgraph: String,
    pub(crate) operation_kind: OperationKind,

    /// The composite type the root selections sit on.
    pub(crate) root_type_name: String,

    /// The pruned selection trees this step resolves.
    pub(crate) root_selections: Vec<Selection>,

    /// The entity resolver used to jump into the parent entity. Present
    /// exactly when `parent` is present.
    pub(crate) resolver: Option<String>,

    pub(crate) parent: Option<ParentLink>,

    /// Step ids whose exports this step consumes.
    pub(crate) depends_on: Vec<usize>,

    /// Fields whose values are published to the export store when this
    /// step's result is merged.
    pub(crate) exports: Vec<ExportedField>,

    /// Connection fields the executor auto-pages.
    pub(crate) paged: Vec<PagedField>,

    /// Introspection-only steps are answered locally and never formatted
    /// for a subgraph.
    pub(crate) only_introspection: bool,
}

/// The link from a child step to the selection in its parent step whose
/// result it depends on.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParentLink {
    pub(crate) step_id: usize,

    /// The splice path from the parent step's own splice point to the
    /// parent entity, with `@` elements over list positions.
    pub(crate) path: Path,

    /// The composite type of the parent entity.
    pub(crate) type_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ExportedField {
    /// The logical export name declared in the metadata.
    pub(crate) name: String,

    /// Where the value sits in this step's result, relative to the step's
    /// splice point.
    pub(crate) path: Path,

    pub(crate) ty: FieldType,
}

#[derive(Debug, Clone)]
pub(crate) struct PagedField {
    /// The entity owning the connection, relative to the step's splice
    /// point.
    pub(crate) entity_path: Path,

    /// The composite type of that entity.
    pub(crate) parent_type: String,

    /// The connection field as the client requested it.
    pub(crate) connection: FieldSelection,

    pub(crate) definition: PagedConnectionDefinition,
}

pub(crate) struct Classifier<'a> {
    metadata: &'a FusionMetadata,
    steps: Vec<ExecutionStep>,
}

impl<'a> Classifier<'a> {
    #[tracing::instrument(skip_all, level = "debug", name = "classify")]
    pub(crate) fn classify(
        operation: &Operation,
        metadata: &'a FusionMetadata,
    ) -> Result<Vec<ExecutionStep>, PlanError> {
        let mut classifier = Classifier {
            metadata,
            steps: Vec::new(),
        };

        let root_type = metadata
            .root_type_name(operation.kind)
            .ok_or_else(|| PlanError::ParseError {
                reason: format!("the schema does not support {} operations", operation.kind),
            })?
            .to_string();

        let mut introspection = Vec::new();
        let mut remote = Vec::new();
        for field in flatten_root(&operation.selection_set, &root_type) {
            if field.is_introspection() {
                introspection.push(Selection::Field(field));
            } else {
                remote.push(field);
            }
        }

        // a root selection set with nothing left still answers __typename
        // so the result is well-formed
        if remote.is_empty() && introspection.is_empty() {
            introspection.push(Selection::Field(synthetic_typename()));
        }

        if !introspection.is_empty() {
            let id = classifier.steps.len();
            classifier.steps.push(ExecutionStep {
                id,
                subgraph: String::new(),
                operation_kind: operation.kind,
                root_type_name: root_type.clone(),
                root_selections: introspection,
                resolver: None,
                parent: None,
                depends_on: Vec::new(),
                exports: Vec::new(),
                paged: Vec::new(),
                only_introspection: true,
            });
        }

        for (subgraph, fields) in classifier.group_by_subgraph(&root_type, remote)? {
            classifier.create_step(subgraph, &root_type, fields, None, operation.kind)?;
        }

        tracing::debug!("classified {} execution step(s)", classifier.steps.len());
        Ok(classifier.steps)
    }

    fn binding_for(
        &self,
        type_name: &str,
        field_name: &str,
        subgraph: &str,
    ) -> Option<&SubgraphBinding> {
        self.metadata
            .field_bindings(type_name, field_name)
            .iter()
            .find(|binding| binding.subgraph == subgraph)
    }

    fn servable_count(
        &self,
        type_name: &str,
        slots: &[Option<FieldSelection>],
        subgraph: &str,
    ) -> usize {
        slots
            .iter()
            .flatten()
            .filter(|field| self.binding_for(type_name, &field.name, subgraph).is_some())
            .count()
    }

    /// Greedy grouping: each group is served by the subgraph that can serve
    /// the most remaining sibling fields; equal scores fall back to the
    /// field's binding registration order.
    fn group_by_subgraph(
        &self,
        type_name: &str,
        fields: Vec<FieldSelection>,
    ) -> Result<Vec<(String, Vec<FieldSelection>)>, PlanError> {
        let mut remaining: Vec<Option<FieldSelection>> = fields.into_iter().map(Some).collect();
        let mut groups = Vec::new();

        for index in 0..remaining.len() {
            let field = match &remaining[index] {
                Some(field) => field,
                None => continue,
            };
            let bindings = self.metadata.field_bindings(type_name, &field.name);
            if bindings.is_empty() {
                return Err(PlanError::NoSubgraphForField {
                    type_name: type_name.to_string(),
                    field_name: field.name.clone(),
                });
            }

            let mut chosen = bindings[0].subgraph.as_str();
            let mut best = self.servable_count(type_name, &remaining[index..], chosen);
            for binding in &bindings[1..] {
                let score = self.servable_count(type_name, &remaining[index..], &binding.subgraph);
                if score > best {
                    chosen = binding.subgraph.as_str();
                    best = score;
                }
            }
            let chosen = chosen.to_string();

            let mut group = Vec::new();
            for slot in remaining[index..].iter_mut() {
                let servable = slot
                    .as_ref()
                    .map(|field| self.binding_for(type_name, &field.name, &chosen).is_some())
                    .unwrap_or_default();
                if servable {
                    group.push(slot.take().expect("slot was just checked; qed"));
                }
            }
            groups.push((chosen, group));
        }

        Ok(groups)
    }

    fn create_step(
        &mut self,
        subgraph: String,
        type_name: &str,
        fields: Vec<FieldSelection>,
        parent: Option<ParentLink>,
        operation_kind: OperationKind,
    ) -> Result<usize, PlanError> {
        let resolver = match &parent {
            Some(link) => Some(self.step_resolver(&subgraph, &link.type_name, &fields)?),
            // a root field bound through a resolver is itself the jump
            // field; its required arguments are attached at format time
            None => fields.first().and_then(|field| {
                self.binding_for(type_name, &field.name, &subgraph)
                    .and_then(|binding| binding.resolver.clone())
            }),
        };

        let id = self.steps.len();
        self.steps.push(ExecutionStep {
            id,
            subgraph: subgraph.clone(),
            operation_kind,
            root_type_name: type_name.to_string(),
            root_selections: Vec::new(),
            resolver,
            parent,
            depends_on: Vec::new(),
            exports: Vec::new(),
            paged: Vec::new(),
            only_introspection: false,
        });

        let mut exports = Vec::new();
        let mut paged = Vec::new();
        let mut roots = Vec::new();
        for field in fields {
            roots.push(Selection::Field(self.walk_field(
                id,
                &subgraph,
                type_name,
                field,
                &Path::empty(),
                &mut exports,
                &mut paged,
            )?));
        }

        let step = &mut self.steps[id];
        step.root_selections = roots;
        step.exports = exports;
        step.paged = paged;
        Ok(id)
    }

    /// The entity resolver a child step jumps through: the binding-level
    /// resolver of its first root field when present, otherwise the first
    /// resolver registered for (subgraph, parent type).
    fn step_resolver(
        &self,
        subgraph: &str,
        parent_type: &str,
        fields: &[FieldSelection],
    ) -> Result<String, PlanError> {
        let first = fields
            .first()
            .expect("a child step always has at least one root field; qed");
        if let Some(binding) = self.binding_for(parent_type, &first.name, subgraph) {
            if let Some(resolver) = &binding.resolver {
                return Ok(resolver.clone());
            }
        }
        self.metadata
            .entity_resolver(subgraph, parent_type)
            .map(|resolver| resolver.id.clone())
            .ok_or_else(|| PlanError::NoSubgraphForField {
                type_name: parent_type.to_string(),
                field_name: first.name.clone(),
            })
    }

    fn walk_field(
        &mut self,
        step_id: usize,
        subgraph: &str,
        type_name: &str,
        mut field: FieldSelection,
        path: &Path,
        exports: &mut Vec<ExportedField>,
        paged: &mut Vec<PagedField>,
    ) -> Result<FieldSelection, PlanError> {
        let mut field_path = path.clone();
        field_path.push(PathElement::Key(field.response_name().to_string()));

        if let Some(export) = self.metadata.export_name(type_name, &field.name) {
            exports.push(ExportedField {
                name: export.to_string(),
                path: field_path.clone(),
                ty: field.field_type.clone(),
            });
        }

        if let Some(definition) = self.metadata.paged_connection(type_name, &field.name) {
            paged.push(PagedField {
                entity_path: path.clone(),
                parent_type: type_name.to_string(),
                connection: field.clone(),
                definition: definition.clone(),
            });
        }

        if let Some(children) = field.selection_set.take() {
            let inner_type = field
                .field_type
                .inner_type_name()
                .ok_or_else(|| PlanError::UnknownField {
                    type_name: type_name.to_string(),
                    field_name: field.name.clone(),
                })?
                .to_string();

            let mut child_path = field_path;
            if field.field_type.is_list() {
                child_path.push(PathElement::Flatten);
            }

            field.selection_set = Some(self.walk_selection_set(
                step_id,
                subgraph,
                &inner_type,
                children,
                &child_path,
                exports,
                paged,
            )?);
        }

        Ok(field)
    }

    fn walk_selection_set(
        &mut self,
        step_id: usize,
        subgraph: &str,
        type_name: &str,
        selections: Vec<Selection>,
        path: &Path,
        exports: &mut Vec<ExportedField>,
        paged: &mut Vec<PagedField>,
    ) -> Result<Vec<Selection>, PlanError> {
        let mut kept = Vec::new();
        let mut foreign = Vec::new();

        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    if field.is_introspection() {
                        kept.push(Selection::Field(field));
                        continue;
                    }
                    if self.binding_for(type_name, &field.name, subgraph).is_some() {
                        kept.push(Selection::Field(self.walk_field(
                            step_id, subgraph, type_name, field, path, exports, paged,
                        )?));
                    } else {
                        if self.metadata.field_bindings(type_name, &field.name).is_empty() {
                            return Err(PlanError::NoSubgraphForField {
                                type_name: type_name.to_string(),
                                field_name: field.name.clone(),
                            });
                        }
                        foreign.push(field);
                    }
                }
                Selection::InlineFragment(fragment) => {
                    // abstract positions re-classify per concrete type
                    let pruned = self.walk_selection_set(
                        step_id,
                        subgraph,
                        &fragment.type_condition,
                        fragment.selection_set,
                        path,
                        exports,
                        paged,
                    )?;
                    if !pruned.is_empty() {
                        kept.push(Selection::InlineFragment(InlineFragmentSelection {
                            type_condition: fragment.type_condition,
                            include_skip: fragment.include_skip,
                            selection_set: pruned,
                        }));
                    }
                }
            }
        }

        // fields this subgraph cannot serve re-enter the entity at `path`
        // from another subgraph
        for (child_subgraph, fields) in self.group_by_subgraph(type_name, foreign)? {
            let link = ParentLink {
                step_id,
                path: path.clone(),
                type_name: type_name.to_string(),
            };
            self.create_step(
                child_subgraph,
                type_name,
                fields,
                Some(link),
                OperationKind::Query,
            )?;
        }

        Ok(kept)
    }
}

/// Root-level inline fragments on the root type are structural only, so
/// they are flattened before grouping.
fn flatten_root(selections: &[Selection], root_type: &str) -> Vec<FieldSelection> {
    let mut fields = Vec::new();
    for selection in selections {
        match selection {
            Selection::Field(field) => fields.push(field.clone()),
            Selection::InlineFragment(fragment) if fragment.type_condition == root_type => {
                fields.extend(flatten_root(&fragment.selection_set, root_type));
            }
            Selection::InlineFragment(_) => {}
        }
    }
    fields
}

pub(crate) fn synthetic_typename() -> FieldSelection {
    FieldSelection {
        name: "__typename".to_string(),
        alias: None,
        arguments: Vec::new(),
        include_skip: IncludeSkip::passthrough(),
        selection_set: None,
        field_type: FieldType::Introspection("__typename".to_string()),
    }
}
