//! Synthesizes one complete GraphQL operation document per execution step.
//!
//! The document is built as a private AST rendered through `fmt::Display`,
//! so formatting is deterministic: the same step and bindings always yield
//! the same text. Field and type names are rewritten to the names the
//! target subgraph knows; aliases are only emitted when the local name
//! differs from the response name the merge expects.

use crate::prelude::graphql::*;
use crate::query_planner::classifier::{ExecutionStep, PagedField};
use crate::query_planner::requirements::{StepRequirements, VariableBinding, VariableSource};
use crate::spec::query::Operation;
use crate::spec::selection::{ArgumentValue, Condition, FieldSelection};
use indexmap::IndexMap;
use std::fmt;

pub(crate) const CURSOR_VARIABLE: &str = "_cursor";
pub(crate) const PAGE_INFO_HAS_NEXT: &str = "hasNextPage";
pub(crate) const PAGE_INFO_END_CURSOR: &str = "endCursor";

/// The synthesized sub-operation of one execution step.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RequestDocument {
    /// The rendered operation text.
    pub(crate) operation: String,

    pub(crate) operation_kind: OperationKind,

    /// Every variable the document declares, in declaration order.
    pub(crate) variable_definitions: Vec<(String, FieldType)>,

    /// The splice path relative to the parent step's result. Empty for
    /// root-level steps.
    pub(crate) path: Path,

    /// The jump field to strip from the response before splicing, if the
    /// step re-enters an entity through a resolver.
    pub(crate) unwrap: Option<String>,
}

/// The re-entry document used for follow-up pages of one auto-paged
/// connection.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SubqueryDocument {
    pub(crate) operation: String,

    pub(crate) variable_definitions: Vec<(String, FieldType)>,

    /// The jump field to strip from each page response.
    pub(crate) unwrap: String,

    /// The connection field's response name under the jump field.
    pub(crate) connection_field: String,

    pub(crate) cursor_variable: String,
}

#[tracing::instrument(skip_all, level = "debug", name = "format")]
pub(crate) fn format_step(
    step: &ExecutionStep,
    requirements: &StepRequirements,
    operation: &Operation,
    metadata: &FusionMetadata,
) -> Result<RequestDocument, PlanError> {
    let mut builder = DocumentBuilder::new(metadata, operation, &step.subgraph);

    let mut nodes = builder.convert_selection_set(&step.root_selections, &step.root_type_name)?;
    if nodes.is_empty() {
        return Err(PlanError::SelectionSetEmpty {
            subgraph: step.subgraph.clone(),
        });
    }

    let mut unwrap = None;
    if let Some(resolver_id) = &step.resolver {
        let resolver =
            metadata
                .resolver(resolver_id)
                .ok_or_else(|| PlanError::ArgumentVariableExpected {
                    name: resolver_id.clone(),
                    subgraph: step.subgraph.clone(),
                })?;
        let arguments = builder.binding_arguments(&requirements.resolver)?;

        if step.parent.is_some() {
            // wrap the whole selection inside the entity lookup field
            unwrap = Some(resolver.field_name.clone());
            nodes = vec![SelectionNode::Field {
                alias: None,
                name: resolver.field_name.clone(),
                arguments,
                directives: Vec::new(),
                selection_set: nodes,
            }];
        } else {
            // the root fields are themselves the jump fields; attach the
            // required arguments the client did not supply
            for node in nodes.iter_mut() {
                if let SelectionNode::Field {
                    arguments: field_arguments,
                    ..
                } = node
                {
                    for (name, value) in &arguments {
                        if !field_arguments.iter().any(|(n, _)| n == name) {
                            field_arguments.push((name.clone(), value.clone()));
                        }
                    }
                }
            }
        }
    }

    let document = Document {
        kind: step.operation_kind,
        variables: builder.rendered_definitions(),
        selection_set: nodes,
    };
    debug_assert!(document.all_variables_declared());

    Ok(RequestDocument {
        operation: document.to_string(),
        operation_kind: step.operation_kind,
        variable_definitions: builder.variable_definitions(),
        path: step
            .parent
            .as_ref()
            .map(|link| link.path.clone())
            .unwrap_or_default(),
        unwrap,
    })
}

/// Synthesize the document that fetches one follow-up page of a paged
/// connection, re-entering the parent entity through the connection's
/// resolver with an advancing cursor.
pub(crate) fn format_paged_subquery(
    step: &ExecutionStep,
    paged: &PagedField,
    bindings: &[VariableBinding],
    operation: &Operation,
    metadata: &FusionMetadata,
) -> Result<SubqueryDocument, PlanError> {
    let resolver = metadata.resolver(&paged.definition.resolver).ok_or_else(|| {
        PlanError::ArgumentVariableExpected {
            name: paged.definition.resolver.clone(),
            subgraph: step.subgraph.clone(),
        }
    })?;

    let mut builder = DocumentBuilder::new(metadata, operation, &step.subgraph);

    let connection_type = paged
        .connection
        .field_type
        .inner_type_name()
        .ok_or_else(|| PlanError::UnknownField {
            type_name: paged.parent_type.clone(),
            field_name: paged.connection.name.clone(),
        })?
        .to_string();

    let mut connection_children = builder.convert_selection_set(
        paged.connection.selection_set.as_deref().unwrap_or(&[]),
        &connection_type,
    )?;
    ensure_page_info(&mut connection_children, &paged.definition.page_info_field);

    let mut arguments = Vec::new();
    for argument in &paged.connection.arguments {
        if argument.name == paged.definition.cursor_argument {
            continue;
        }
        let value = builder.convert_argument_value(&argument.value)?;
        arguments.push((argument.name.clone(), value));
    }
    arguments.push((
        paged.definition.cursor_argument.clone(),
        ValueNode::Variable(CURSOR_VARIABLE.to_string()),
    ));

    let local_name = builder.local_field_name(&paged.parent_type, &paged.connection.name);
    let response_name = paged.connection.response_name().to_string();
    let connection_node = SelectionNode::Field {
        alias: (response_name != local_name).then(|| response_name.clone()),
        name: local_name,
        arguments,
        directives: Vec::new(),
        selection_set: connection_children,
    };

    let jump_arguments = builder.binding_arguments(bindings)?;
    let jump = SelectionNode::Field {
        alias: None,
        name: resolver.field_name.clone(),
        arguments: jump_arguments,
        directives: Vec::new(),
        selection_set: vec![connection_node],
    };

    builder.declare_variable(CURSOR_VARIABLE, FieldType::String);

    let document = Document {
        kind: OperationKind::Query,
        variables: builder.rendered_definitions(),
        selection_set: vec![jump],
    };
    debug_assert!(document.all_variables_declared());

    Ok(SubqueryDocument {
        operation: document.to_string(),
        variable_definitions: builder.variable_definitions(),
        unwrap: resolver.field_name.clone(),
        connection_field: response_name,
        cursor_variable: CURSOR_VARIABLE.to_string(),
    })
}

struct DocumentBuilder<'a> {
    metadata: &'a FusionMetadata,
    operation: &'a Operation,
    subgraph: &'a str,
    definitions: IndexMap<String, FieldType>,
}

impl<'a> DocumentBuilder<'a> {
    fn new(metadata: &'a FusionMetadata, operation: &'a Operation, subgraph: &'a str) -> Self {
        Self {
            metadata,
            operation,
            subgraph,
            definitions: IndexMap::new(),
        }
    }

    fn local_field_name(&self, type_name: &str, field_name: &str) -> String {
        self.metadata
            .field_bindings(type_name, field_name)
            .iter()
            .find(|binding| binding.subgraph == self.subgraph)
            .map(|binding| binding.field_name.clone())
            .unwrap_or_else(|| field_name.to_string())
    }

    /// Declared types keep the composite inner name here; rendering
    /// rewrites it to the subgraph-local one.
    fn declare_variable(&mut self, name: &str, ty: FieldType) {
        self.definitions.entry(name.to_string()).or_insert(ty);
    }

    fn declare_client_variable(&mut self, name: &str) -> Result<(), PlanError> {
        let (ty, _default) =
            self.operation
                .variables
                .get(name)
                .ok_or_else(|| PlanError::ParseError {
                    reason: format!("variable '${}' is not defined", name),
                })?;
        self.declare_variable(name, ty.clone());
        Ok(())
    }

    fn variable_definitions(&self) -> Vec<(String, FieldType)> {
        self.definitions
            .iter()
            .map(|(name, ty)| (name.clone(), ty.clone()))
            .collect()
    }

    fn rendered_definitions(&self) -> Vec<(String, String)> {
        self.definitions
            .iter()
            .map(|(name, ty)| {
                let rendered = match ty.inner_type_name() {
                    Some(inner) => ty
                        .with_inner_name(self.metadata.local_type_name(self.subgraph, inner))
                        .to_string(),
                    None => ty.to_string(),
                };
                (name.clone(), rendered)
            })
            .collect()
    }

    fn convert_selection_set(
        &mut self,
        selections: &[Selection],
        type_name: &str,
    ) -> Result<Vec<SelectionNode>, PlanError> {
        let mut nodes = Vec::new();
        let mut has_fragments = false;

        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    nodes.push(self.convert_field(field, type_name)?);
                }
                Selection::InlineFragment(fragment) => {
                    let converted = self
                        .convert_selection_set(&fragment.selection_set, &fragment.type_condition)?;
                    let local_condition = self
                        .metadata
                        .local_type_name(self.subgraph, &fragment.type_condition)
                        .to_string();

                    // a fragment on the surrounding type is structural only
                    // and collapses into the parent selection set
                    if fragment.type_condition == type_name
                        && fragment.include_skip.is_passthrough()
                    {
                        nodes.extend(converted);
                        continue;
                    }

                    has_fragments = true;
                    nodes.push(SelectionNode::InlineFragment {
                        type_condition: local_condition,
                        directives: self.directives_for(&fragment.include_skip)?,
                        selection_set: converted,
                    });
                }
            }
        }

        // one __typename disambiguator per polymorphic selection set
        if has_fragments && !has_typename(&nodes) {
            nodes.insert(0, typename_node());
        }

        Ok(nodes)
    }

    fn convert_field(
        &mut self,
        field: &FieldSelection,
        type_name: &str,
    ) -> Result<SelectionNode, PlanError> {
        let local_name = if field.is_introspection() {
            field.name.clone()
        } else {
            self.local_field_name(type_name, &field.name)
        };
        let response_name = field.response_name();
        let alias = (response_name != local_name).then(|| response_name.to_string());

        let mut arguments = Vec::new();
        for argument in &field.arguments {
            arguments.push((
                argument.name.clone(),
                self.convert_argument_value(&argument.value)?,
            ));
        }

        let selection_set = match &field.selection_set {
            Some(children) => {
                let inner_type = field.field_type.inner_type_name().unwrap_or(type_name);
                let mut nodes = self.convert_selection_set(children, inner_type)?;
                // a declared-but-empty selection set is invalid GraphQL
                if nodes.is_empty() {
                    nodes.push(typename_node());
                }
                if let Some(definition) = self.metadata.paged_connection(type_name, &field.name) {
                    ensure_page_info(&mut nodes, &definition.page_info_field);
                }
                nodes
            }
            None => Vec::new(),
        };

        Ok(SelectionNode::Field {
            alias,
            name: local_name,
            arguments,
            directives: self.directives_for(&field.include_skip)?,
            selection_set,
        })
    }

    fn convert_argument_value(&mut self, value: &ArgumentValue) -> Result<ValueNode, PlanError> {
        match value {
            ArgumentValue::Variable(name) => {
                self.declare_client_variable(name)?;
                Ok(ValueNode::Variable(name.clone()))
            }
            ArgumentValue::Value(value) => Ok(ValueNode::Literal(value.clone())),
        }
    }

    /// Variable-conditioned directives are preserved so the subgraph
    /// re-evaluates them; their variables are forwarded regardless of
    /// whether the field itself needed them.
    fn directives_for(&mut self, include_skip: &IncludeSkip) -> Result<Vec<Directive>, PlanError> {
        let mut directives = Vec::new();
        if let Condition::Variable(name) = include_skip.skip_condition() {
            self.declare_client_variable(name)?;
            directives.push(Directive {
                name: "skip".to_string(),
                condition: name.clone(),
            });
        }
        if let Condition::Variable(name) = include_skip.include_condition() {
            self.declare_client_variable(name)?;
            directives.push(Directive {
                name: "include".to_string(),
                condition: name.clone(),
            });
        }
        Ok(directives)
    }

    fn binding_arguments(
        &mut self,
        bindings: &[VariableBinding],
    ) -> Result<Vec<(String, ValueNode)>, PlanError> {
        let mut arguments = Vec::new();
        for binding in bindings {
            let value = match &binding.source {
                VariableSource::Literal(value) => ValueNode::Literal(value.clone()),
                VariableSource::Client => {
                    self.declare_client_variable(&binding.name)?;
                    ValueNode::Variable(binding.name.clone())
                }
                VariableSource::ParentField { .. } | VariableSource::State { .. } => {
                    self.declare_variable(&binding.name, binding.ty.clone());
                    ValueNode::Variable(binding.name.clone())
                }
            };
            arguments.push((binding.requirement.clone(), value));
        }
        Ok(arguments)
    }
}

fn ensure_page_info(nodes: &mut Vec<SelectionNode>, page_info_field: &str) {
    // a client-selected page info keeps its own subfields; the cursor
    // bookkeeping fields are added when missing
    for node in nodes.iter_mut() {
        if let SelectionNode::Field {
            alias: None,
            name,
            selection_set,
            ..
        } = node
        {
            if name == page_info_field {
                ensure_leaf_field(selection_set, PAGE_INFO_HAS_NEXT);
                ensure_leaf_field(selection_set, PAGE_INFO_END_CURSOR);
                return;
            }
        }
    }
    let mut selection_set = Vec::new();
    ensure_leaf_field(&mut selection_set, PAGE_INFO_HAS_NEXT);
    ensure_leaf_field(&mut selection_set, PAGE_INFO_END_CURSOR);
    nodes.push(SelectionNode::Field {
        alias: None,
        name: page_info_field.to_string(),
        arguments: Vec::new(),
        directives: Vec::new(),
        selection_set,
    });
}

fn ensure_leaf_field(nodes: &mut Vec<SelectionNode>, field_name: &str) {
    let present = nodes.iter().any(|node| {
        matches!(
            node,
            SelectionNode::Field { alias: None, name, .. } if name == field_name
        )
    });
    if !present {
        nodes.push(SelectionNode::Field {
            alias: None,
            name: field_name.to_string(),
            arguments: Vec::new(),
            directives: Vec::new(),
            selection_set: Vec::new(),
        });
    }
}

fn has_typename(nodes: &[SelectionNode]) -> bool {
    nodes.iter().any(|node| {
        matches!(
            node,
            SelectionNode::Field { alias: None, name, .. } if name == "__typename"
        )
    })
}

fn typename_node() -> SelectionNode {
    SelectionNode::Field {
        alias: None,
        name: "__typename".to_string(),
        arguments: Vec::new(),
        directives: Vec::new(),
        selection_set: Vec::new(),
    }
}

struct Document {
    kind: OperationKind,
    variables: Vec<(String, String)>,
    selection_set: Vec<SelectionNode>,
}

#[derive(Debug, Clone, PartialEq)]
enum SelectionNode {
    Field {
        alias: Option<String>,
        name: String,
        arguments: Vec<(String, ValueNode)>,
        directives: Vec<Directive>,
        selection_set: Vec<SelectionNode>,
    },
    InlineFragment {
        type_condition: String,
        directives: Vec<Directive>,
        selection_set: Vec<SelectionNode>,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct Directive {
    name: String,
    condition: String,
}

#[derive(Debug, Clone, PartialEq)]
enum ValueNode {
    Variable(String),
    Literal(Value),
}

impl Document {
    /// Every `$var` reference in the tree must have a matching definition.
    fn all_variables_declared(&self) -> bool {
        fn check(nodes: &[SelectionNode], declared: &[(String, String)]) -> bool {
            nodes.iter().all(|node| {
                let (arguments, directives, children) = match node {
                    SelectionNode::Field {
                        arguments,
                        directives,
                        selection_set,
                        ..
                    } => (arguments.as_slice(), directives.as_slice(), selection_set),
                    SelectionNode::InlineFragment {
                        directives,
                        selection_set,
                        ..
                    } => (&[] as &[_], directives.as_slice(), selection_set),
                };
                arguments.iter().all(|(_, value)| match value {
                    ValueNode::Variable(name) => declared.iter().any(|(n, _)| n == name),
                    ValueNode::Literal(_) => true,
                }) && directives
                    .iter()
                    .all(|directive| declared.iter().any(|(n, _)| n == &directive.condition))
                    && check(children, declared)
            })
        }
        check(&self.selection_set, &self.variables)
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.variables.is_empty() {
            write!(f, "(")?;
            for (index, (name, ty)) in self.variables.iter().enumerate() {
                if index > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "${}: {}", name, ty)?;
            }
            write!(f, ")")?;
        }
        write!(f, " ")?;
        write_selection_set(f, &self.selection_set)
    }
}

fn write_selection_set(f: &mut fmt::Formatter, nodes: &[SelectionNode]) -> fmt::Result {
    write!(f, "{{ ")?;
    for (index, node) in nodes.iter().enumerate() {
        if index > 0 {
            write!(f, " ")?;
        }
        write_selection(f, node)?;
    }
    write!(f, " }}")
}

fn write_selection(f: &mut fmt::Formatter, node: &SelectionNode) -> fmt::Result {
    match node {
        SelectionNode::Field {
            alias,
            name,
            arguments,
            directives,
            selection_set,
        } => {
            if let Some(alias) = alias {
                write!(f, "{}: ", alias)?;
            }
            write!(f, "{}", name)?;
            if !arguments.is_empty() {
                write!(f, "(")?;
                for (index, (name, value)) in arguments.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: ", name)?;
                    write_value(f, value)?;
                }
                write!(f, ")")?;
            }
            for directive in directives {
                write!(f, " @{}(if: ${})", directive.name, directive.condition)?;
            }
            if !selection_set.is_empty() {
                write!(f, " ")?;
                write_selection_set(f, selection_set)?;
            }
            Ok(())
        }
        SelectionNode::InlineFragment {
            type_condition,
            directives,
            selection_set,
        } => {
            write!(f, "... on {}", type_condition)?;
            for directive in directives {
                write!(f, " @{}(if: ${})", directive.name, directive.condition)?;
            }
            write!(f, " ")?;
            write_selection_set(f, selection_set)
        }
    }
}

fn write_value(f: &mut fmt::Formatter, value: &ValueNode) -> fmt::Result {
    match value {
        ValueNode::Variable(name) => write!(f, "${}", name),
        ValueNode::Literal(value) => write_literal(f, value),
    }
}

fn write_literal(f: &mut fmt::Formatter, value: &Value) -> fmt::Result {
    match value {
        Value::Null => write!(f, "null"),
        Value::Bool(b) => write!(f, "{}", b),
        Value::Number(n) => write!(f, "{}", n),
        Value::String(s) => {
            write!(f, "\"")?;
            for c in s.as_str().chars() {
                match c {
                    '"' => write!(f, "\\\"")?,
                    '\\' => write!(f, "\\\\")?,
                    '\n' => write!(f, "\\n")?,
                    other => write!(f, "{}", other)?,
                }
            }
            write!(f, "\"")
        }
        Value::Array(values) => {
            write!(f, "[")?;
            for (index, value) in values.iter().enumerate() {
                if index > 0 {
                    write!(f, ", ")?;
                }
                write_literal(f, value)?;
            }
            write!(f, "]")
        }
        Value::Object(object) => {
            write!(f, "{{")?;
            for (index, (key, value)) in object.iter().enumerate() {
                if index > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: ", key.as_str())?;
                write_literal(f, value)?;
            }
            write!(f, "}}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ResolverDefinition, SubgraphBinding};
    use crate::query_planner::classifier::Classifier;
    use crate::query_planner::requirements::resolve_requirements;
    use indexmap::IndexMap;

    fn metadata_with_jump() -> FusionMetadata {
        let mut argument_types = IndexMap::new();
        argument_types.insert("id".to_string(), FieldType::NonNull(Box::new(FieldType::Id)));
        FusionMetadata::builder()
            .field(
                "Query",
                "a",
                FieldType::Named("A".to_string()),
                vec![SubgraphBinding::new("s1", "a")],
            )
            .field(
                "A",
                "id",
                FieldType::NonNull(Box::new(FieldType::Id)),
                vec![SubgraphBinding::new("s1", "id")],
            )
            .field(
                "A",
                "b",
                FieldType::String,
                vec![SubgraphBinding::new("s2", "localB")],
            )
            .resolver(ResolverDefinition {
                id: "aById".to_string(),
                subgraph: "s2".to_string(),
                type_name: "A".to_string(),
                field_name: "aById".to_string(),
                requires: ["id".to_string()].into_iter().collect(),
                argument_types,
            })
            .build()
    }

    fn plan(
        metadata: &FusionMetadata,
        text: &str,
    ) -> (crate::spec::query::Query, Vec<super::RequestDocument>) {
        let query = Query::parse(text, metadata).unwrap();
        let documents = {
            let operation = query.operation(None).unwrap();
            let mut steps = Classifier::classify(operation, metadata).unwrap();
            let requirements = resolve_requirements(&mut steps, operation, metadata).unwrap();
            steps
                .iter()
                .filter(|step| !step.only_introspection)
                .map(|step| format_step(step, &requirements[step.id], operation, metadata).unwrap())
                .collect()
        };
        (query, documents)
    }

    #[test]
    fn entity_jump_document() {
        let metadata = metadata_with_jump();
        let (_query, documents) = plan(&metadata, "{ a { b } }");

        assert_eq!(documents[0].operation, "query { a { id } }");
        assert_eq!(
            documents[1].operation,
            "query($id: ID!) { aById(id: $id) { b: localB } }",
        );
        assert_eq!(documents[1].unwrap.as_deref(), Some("aById"));
        assert_eq!(documents[1].path, Path::from("a"));
    }

    fn paged_metadata() -> FusionMetadata {
        let mut argument_types = IndexMap::new();
        argument_types.insert("id".to_string(), FieldType::NonNull(Box::new(FieldType::Id)));
        FusionMetadata::builder()
            .field(
                "Query",
                "user",
                FieldType::Named("User".to_string()),
                vec![SubgraphBinding::new("social", "user")],
            )
            .field(
                "User",
                "id",
                FieldType::NonNull(Box::new(FieldType::Id)),
                vec![SubgraphBinding::new("social", "id")],
            )
            .field(
                "User",
                "posts",
                FieldType::Named("PostConnection".to_string()),
                vec![SubgraphBinding::new("social", "posts")],
            )
            .field(
                "PostConnection",
                "nodes",
                FieldType::List(Box::new(FieldType::Named("Post".to_string()))),
                vec![SubgraphBinding::new("social", "nodes")],
            )
            .field(
                "Post",
                "title",
                FieldType::String,
                vec![SubgraphBinding::new("social", "title")],
            )
            .resolver(crate::metadata::ResolverDefinition {
                id: "userById".to_string(),
                subgraph: "social".to_string(),
                type_name: "User".to_string(),
                field_name: "userById".to_string(),
                requires: ["id".to_string()].into_iter().collect(),
                argument_types,
            })
            .paged_connection(
                "User",
                "posts",
                crate::metadata::PagedConnectionDefinition {
                    items_field: "nodes".to_string(),
                    page_info_field: "pageInfo".to_string(),
                    cursor_argument: "after".to_string(),
                    resolver: "userById".to_string(),
                },
            )
            .build()
    }

    #[test]
    fn paged_master_document_selects_page_info() {
        let metadata = paged_metadata();
        let (_query, documents) = plan(&metadata, "{ user { id posts { nodes { title } } } }");

        insta::assert_snapshot!(
            documents[0].operation,
            @"query { user { id posts { nodes { title } pageInfo { hasNextPage endCursor } } } }"
        );
    }

    #[test]
    fn an_explicit_page_info_selection_is_completed() {
        let metadata = paged_metadata();
        let (_query, documents) = plan(
            &metadata,
            "{ user { id posts { nodes { title } pageInfo { hasNextPage } } } }",
        );

        assert_eq!(
            documents[0].operation,
            "query { user { id posts { nodes { title } pageInfo { hasNextPage endCursor } } } }",
        );
    }

    #[test]
    fn formatting_is_deterministic() {
        let metadata = metadata_with_jump();
        let (_query, first) = plan(&metadata, "{ a { b } }");
        let (_query, second) = plan(&metadata, "{ a { b } }");
        assert_eq!(first, second);
    }

    #[test]
    fn aliases_only_when_names_differ() {
        let metadata = FusionMetadata::builder()
            .field(
                "Query",
                "user",
                FieldType::Named("User".to_string()),
                vec![SubgraphBinding::new("accounts", "user")],
            )
            .field(
                "User",
                "name",
                FieldType::String,
                vec![SubgraphBinding::new("accounts", "fullName")],
            )
            .build();
        let (_query, documents) = plan(&metadata, "{ u: user { name } }");
        assert_eq!(
            documents[0].operation,
            "query { u: user { name: fullName } }",
        );
    }

    #[test]
    fn variable_directives_force_forwarding() {
        let metadata = FusionMetadata::builder()
            .field(
                "Query",
                "x",
                FieldType::String,
                vec![SubgraphBinding::new("s1", "x")],
            )
            .build();
        let (_query, documents) = plan(
            &metadata,
            "query($hide: Boolean!) { x @skip(if: $hide) }",
        );
        assert_eq!(
            documents[0].operation,
            "query($hide: Boolean!) { x @skip(if: $hide) }",
        );
        assert_eq!(documents[0].variable_definitions.len(), 1);
    }

    #[test]
    fn abstract_types_get_local_fragments_and_typename() {
        let metadata = FusionMetadata::builder()
            .field(
                "Query",
                "pets",
                FieldType::List(Box::new(FieldType::Named("Pet".to_string()))),
                vec![SubgraphBinding::new("zoo", "pets")],
            )
            .field(
                "Cat",
                "meow",
                FieldType::Boolean,
                vec![SubgraphBinding::new("zoo", "meow")],
            )
            .field(
                "Dog",
                "bark",
                FieldType::Boolean,
                vec![SubgraphBinding::new("zoo", "bark")],
            )
            .possible_types("Pet", ["Cat", "Dog"])
            .local_type_name("zoo", "Cat", "ZooCat")
            .build();
        let (_query, documents) = plan(
            &metadata,
            "{ pets { ... on Cat { meow } ... on Dog { bark } } }",
        );
        assert_eq!(
            documents[0].operation,
            "query { pets { __typename ... on ZooCat { meow } ... on Dog { bark } } }",
        );
    }

    #[test]
    fn literal_arguments_are_inlined() {
        let metadata = metadata_with_jump();
        let (_query, documents) = plan(&metadata, "{ a(id: 3) { b } }");
        // the literal satisfies the requirement, so no key field is
        // injected and the emptied parent selection gets the placeholder
        assert_eq!(documents[0].operation, "query { a(id: 3) { __typename } }");
        assert_eq!(
            documents[1].operation,
            "query { aById(id: 3) { b: localB } }",
        );
        assert!(documents[1].variable_definitions.is_empty());
    }

    #[test]
    fn root_resolver_fields_receive_state_arguments() {
        let mut argument_types = IndexMap::new();
        argument_types.insert("userId".to_string(), FieldType::Id);
        let metadata = FusionMetadata::builder()
            .field(
                "Query",
                "me",
                FieldType::Named("User".to_string()),
                vec![SubgraphBinding::new("accounts", "me")],
            )
            .field(
                "User",
                "id",
                FieldType::NonNull(Box::new(FieldType::Id)),
                vec![SubgraphBinding::new("accounts", "id")],
            )
            .field(
                "Query",
                "recommendations",
                FieldType::List(Box::new(FieldType::String)),
                vec![SubgraphBinding::with_resolver(
                    "reco",
                    "recommendations",
                    "recoForUser",
                )],
            )
            .resolver(ResolverDefinition {
                id: "recoForUser".to_string(),
                subgraph: "reco".to_string(),
                type_name: "Query".to_string(),
                field_name: "recommendations".to_string(),
                requires: ["userId".to_string()].into_iter().collect(),
                argument_types,
            })
            .export("User", "id", "userId")
            .build();
        let (_query, documents) = plan(&metadata, "{ me { id } recommendations }");
        let reco = documents
            .iter()
            .find(|doc| doc.operation.contains("recommendations"))
            .unwrap();
        assert_eq!(
            reco.operation,
            "query($_export_0_userId: ID) { recommendations(userId: $_export_0_userId) }",
        );
    }
}
