use crate::prelude::graphql::*;
use crate::spec::fragments::Fragments;
use crate::spec::selection::{parse_selection_set, parse_value};
use apollo_parser::ast;
use indexmap::IndexMap;

/// A GraphQL query as parsed and validated against the composed schema
/// metadata. Shared read-only between the planner and the cache.
#[derive(Debug, Default)]
pub struct Query {
    string: String,
    operations: Vec<Operation>,
}

#[derive(Debug)]
pub(crate) struct Operation {
    pub(crate) name: Option<String>,
    pub(crate) kind: OperationKind,
    pub(crate) selection_set: Vec<Selection>,

    /// Declared variables with their type and optional default value.
    pub(crate) variables: IndexMap<String, (FieldType, Option<Value>)>,
}

impl Query {
    pub fn parse(query: impl Into<String>, metadata: &FusionMetadata) -> Result<Self, PlanError> {
        let string = query.into();

        let parser = apollo_parser::Parser::new(string.as_str());
        let tree = parser.parse();
        let errors = tree
            .errors()
            .map(|err| format!("{:?}", err))
            .collect::<Vec<_>>();
        if !errors.is_empty() {
            failfast_debug!("parsing error(s): {}", errors.join(", "));
            return Err(PlanError::ParseError {
                reason: errors.join(", "),
            });
        }

        let document = tree.document();
        let fragments = Fragments::from_ast(&document);

        let operations = document
            .definitions()
            .filter_map(|definition| match definition {
                ast::Definition::OperationDefinition(operation) => Some(operation),
                _ => None,
            })
            .map(|operation| Operation::from_ast(operation, metadata, &fragments))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Query { string, operations })
    }

    pub fn as_str(&self) -> &str {
        &self.string
    }

    /// Select the operation to execute, by name if the request provides one.
    pub(crate) fn operation(&self, name: Option<&str>) -> Result<&Operation, PlanError> {
        match name {
            Some(name) => self
                .operations
                .iter()
                .find(|operation| operation.name.as_deref() == Some(name))
                .ok_or_else(|| PlanError::UnknownOperation {
                    name: name.to_string(),
                }),
            None => match self.operations.as_slice() {
                [operation] => Ok(operation),
                [] => Err(PlanError::ParseError {
                    reason: "the document defines no operation".to_string(),
                }),
                _ => Err(PlanError::ParseError {
                    reason: "the operation name is required when the document defines several \
                             operations"
                        .to_string(),
                }),
            },
        }
    }

    pub fn contains_mutations(&self) -> bool {
        self.operations
            .iter()
            .any(|operation| operation.kind == OperationKind::Mutation)
    }
}

impl Operation {
    // Spec: https://spec.graphql.org/draft/#sec-Language.Operations
    fn from_ast(
        operation: ast::OperationDefinition,
        metadata: &FusionMetadata,
        fragments: &Fragments,
    ) -> Result<Self, PlanError> {
        let name = operation.name().map(|x| x.text().to_string());

        let kind = operation
            .operation_type()
            .and_then(|operation_type| {
                operation_type
                    .query_token()
                    .map(|_| OperationKind::Query)
                    .or_else(|| {
                        operation_type
                            .mutation_token()
                            .map(|_| OperationKind::Mutation)
                    })
                    .or_else(|| {
                        operation_type
                            .subscription_token()
                            .map(|_| OperationKind::Subscription)
                    })
            })
            .unwrap_or(OperationKind::Query);

        let root_type = metadata
            .root_type_name(kind)
            .ok_or_else(|| PlanError::ParseError {
                reason: format!("the schema does not support {} operations", kind),
            })?
            .to_string();

        let variables = operation
            .variable_definitions()
            .iter()
            .flat_map(|x| x.variable_definitions())
            .map(|definition| {
                let name = definition
                    .variable()
                    .expect("the node Variable is not optional in the spec; qed")
                    .name()
                    .expect("the node Name is not optional in the spec; qed")
                    .text()
                    .to_string();
                let ty = FieldType::from(
                    definition
                        .ty()
                        .expect("the node Type is not optional in the spec; qed"),
                );
                let default = definition
                    .default_value()
                    .and_then(|value| value.value())
                    .and_then(|value| parse_value(&value));
                (name, (ty, default))
            })
            .collect();

        let selection_set = parse_selection_set(
            operation
                .selection_set()
                .expect("the node SelectionSet is not optional in the spec; qed"),
            &root_type,
            metadata,
            fragments,
            0,
        )?;

        Ok(Operation {
            name,
            kind,
            selection_set,
            variables,
        })
    }
}
