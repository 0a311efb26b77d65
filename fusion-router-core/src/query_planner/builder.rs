//! Arranges resolved execution steps into the final plan tree.
//!
//! Steps form a DAG through parent links and export dependencies. The
//! builder peels the DAG into generations: every step whose dependencies
//! are already placed joins the next generation, each generation runs as a
//! `Parallel`, and the generations chain into a `Sequence`.

use crate::prelude::graphql::*;
use crate::query_planner::classifier::ExecutionStep;
use crate::query_planner::formatter::{self, RequestDocument};
use crate::query_planner::requirements::{state_variable_name, StepRequirements, VariableBinding};
use crate::query_planner::{
    ExportBinding, FetchNode, FetchVariable, FlattenNode, PagingConfig, PlanNode, QueryPlan,
    VariableSource,
};
use crate::spec::query::Operation;
use std::collections::{HashMap, HashSet};

#[tracing::instrument(skip_all, level = "debug", name = "build_plan")]
pub(crate) fn build_plan(
    steps: &[ExecutionStep],
    requirements: &[StepRequirements],
    operation: &Operation,
    metadata: &FusionMetadata,
) -> Result<QueryPlan, PlanError> {
    let mut typename_fields = Vec::new();
    let mut unsupported_introspection = Vec::new();
    for step in steps.iter().filter(|step| step.only_introspection) {
        for selection in &step.root_selections {
            if let Selection::Field(field) = selection {
                if field.name == "__typename" {
                    typename_fields.push(field.response_name().to_string());
                } else {
                    unsupported_introspection.push(field.response_name().to_string());
                }
            }
        }
    }

    let mut nodes: HashMap<usize, PlanNode> = HashMap::new();
    for step in steps.iter().filter(|step| !step.only_introspection) {
        let document = formatter::format_step(step, &requirements[step.id], operation, metadata)?;
        let fetch = fetch_node(step, &requirements[step.id], document, operation, metadata)?;
        let node = match step.parent {
            Some(_) => PlanNode::Flatten(FlattenNode {
                path: absolute_path(steps, step),
                node: Box::new(PlanNode::Fetch(fetch)),
            }),
            None => PlanNode::Fetch(fetch),
        };
        nodes.insert(step.id, node);
    }

    let mut pending: Vec<usize> = nodes.keys().copied().collect();
    pending.sort_unstable();
    let mut placed: HashSet<usize> = HashSet::new();
    let mut generations: Vec<PlanNode> = Vec::new();
    while !pending.is_empty() {
        let ready: Vec<usize> = pending
            .iter()
            .copied()
            .filter(|id| {
                let step = &steps[*id];
                step.parent
                    .as_ref()
                    .map_or(true, |link| placed.contains(&link.step_id))
                    && step.depends_on.iter().all(|dep| placed.contains(dep))
            })
            .collect();
        if ready.is_empty() {
            return Err(PlanError::ParseError {
                reason: "circular dependency between execution steps".to_string(),
            });
        }
        pending.retain(|id| !ready.contains(id));
        placed.extend(ready.iter().copied());

        let mut generation: Vec<PlanNode> = ready
            .iter()
            .map(|id| nodes.remove(id).expect("ready ids come from nodes; qed"))
            .collect();
        generations.push(if generation.len() == 1 {
            generation.pop().expect("generation has one node; qed")
        } else {
            PlanNode::Parallel { nodes: generation }
        });
    }

    let root = if generations.len() == 1 {
        generations.pop().expect("one generation; qed")
    } else {
        PlanNode::Sequence { nodes: generations }
    };

    let root_type_name = metadata
        .root_type_name(operation.kind)
        .unwrap_or("Query")
        .to_string();

    Ok(QueryPlan {
        root,
        root_type_name,
        typename_fields,
        unsupported_introspection,
    })
}

fn fetch_node(
    step: &ExecutionStep,
    requirements: &StepRequirements,
    document: RequestDocument,
    operation: &Operation,
    metadata: &FusionMetadata,
) -> Result<FetchNode, PlanError> {
    let variables = executor_variables(
        &document.variable_definitions,
        &requirements.resolver,
        None,
    );

    let exports = step
        .exports
        .iter()
        .map(|export| ExportBinding {
            state_name: state_variable_name(step.id, &export.name),
            logical_name: export.name.clone(),
            path: export.path.clone(),
            ty: export.ty.clone(),
        })
        .collect();

    let mut paging = Vec::new();
    for (index, paged) in step.paged.iter().enumerate() {
        // without a selected items field there is nothing to accumulate
        let items_field = match selected_response_name(paged, &paged.definition.items_field) {
            Some(name) => name,
            None => continue,
        };
        let empty = Vec::new();
        let bindings = requirements.paged.get(index).unwrap_or(&empty);
        let subquery =
            formatter::format_paged_subquery(step, paged, bindings, operation, metadata)?;
        let variables = executor_variables(
            &subquery.variable_definitions,
            bindings,
            Some(&subquery.cursor_variable),
        );
        paging.push(PagingConfig {
            entity_path: paged.entity_path.clone(),
            connection_field: subquery.connection_field,
            items_field,
            page_info_field: paged.definition.page_info_field.clone(),
            operation: subquery.operation,
            variables,
            cursor_variable: subquery.cursor_variable,
            unwrap: subquery.unwrap,
        });
    }

    Ok(FetchNode {
        id: format!("{}_{}", step.subgraph, step.id),
        service_name: step.subgraph.clone(),
        operation: document.operation,
        operation_kind: document.operation_kind,
        variables,
        requires_parent: step.parent.is_some(),
        unwrap: document.unwrap,
        exports,
        paging,
    })
}

/// Pair every declared document variable with the source the executor
/// draws its value from. Variables without an explicit binding are
/// forwarded client variables.
fn executor_variables(
    definitions: &[(String, FieldType)],
    bindings: &[VariableBinding],
    exclude: Option<&str>,
) -> Vec<FetchVariable> {
    definitions
        .iter()
        .filter(|(name, _)| exclude != Some(name.as_str()))
        .map(|(name, _)| {
            let source = bindings
                .iter()
                .find(|binding| &binding.name == name)
                .map(|binding| binding.source.clone())
                .unwrap_or(VariableSource::Client);
            FetchVariable {
                name: name.clone(),
                source,
            }
        })
        .collect()
}

fn selected_response_name(
    paged: &crate::query_planner::classifier::PagedField,
    field_name: &str,
) -> Option<String> {
    fn search(selections: &[Selection], field_name: &str) -> Option<String> {
        for selection in selections {
            match selection {
                Selection::Field(field) if field.name == field_name => {
                    return Some(field.response_name().to_string());
                }
                Selection::InlineFragment(fragment) => {
                    if let Some(found) = search(&fragment.selection_set, field_name) {
                        return Some(found);
                    }
                }
                Selection::Field(_) => {}
            }
        }
        None
    }
    search(
        paged.connection.selection_set.as_deref().unwrap_or(&[]),
        field_name,
    )
}

/// The absolute splice path of a step: the parent-link paths of its
/// ancestor chain, root first.
fn absolute_path(steps: &[ExecutionStep], step: &ExecutionStep) -> Path {
    let mut chain = Vec::new();
    let mut current = step;
    while let Some(link) = &current.parent {
        chain.push(&link.path);
        current = &steps[link.step_id];
    }
    let mut path = Path::empty();
    for segment in chain.into_iter().rev() {
        path = path.join(segment);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{PagedConnectionDefinition, ResolverDefinition, SubgraphBinding};
    use crate::query_planner::QueryPlanner;
    use indexmap::IndexMap;
    use std::sync::Arc;

    fn plan_for(metadata: FusionMetadata, text: &str) -> QueryPlan {
        let metadata = Arc::new(metadata);
        let query = Query::parse(text, &metadata).unwrap();
        QueryPlanner::new(metadata)
            .build_query_plan(&query, None)
            .unwrap()
    }

    fn entity_metadata() -> FusionMetadata {
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
                vec![SubgraphBinding::new("s2", "b")],
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

    #[test]
    fn entity_jump_becomes_sequence_with_flatten() {
        let plan = plan_for(entity_metadata(), "{ a { b } }");

        let nodes = match &plan.root {
            PlanNode::Sequence { nodes } => nodes,
            other => panic!("expected a sequence, got {:?}", other),
        };
        assert_eq!(nodes.len(), 2);
        assert!(matches!(
            &nodes[0],
            PlanNode::Fetch(fetch) if fetch.service_name == "s1" && !fetch.requires_parent
        ));
        match &nodes[1] {
            PlanNode::Flatten(flatten) => {
                assert_eq!(flatten.path, Path::from("a"));
                match flatten.node.as_ref() {
                    PlanNode::Fetch(fetch) => {
                        assert_eq!(fetch.service_name, "s2");
                        assert!(fetch.requires_parent);
                        assert_eq!(fetch.unwrap.as_deref(), Some("aById"));
                        assert_eq!(fetch.variables.len(), 1);
                        assert_eq!(
                            fetch.variables[0].source,
                            VariableSource::ParentField {
                                field: "id".to_string()
                            },
                        );
                    }
                    other => panic!("expected a fetch, got {:?}", other),
                }
            }
            other => panic!("expected a flatten, got {:?}", other),
        }
    }

    #[test]
    fn independent_subgraphs_run_in_parallel() {
        let metadata = FusionMetadata::builder()
            .field(
                "Query",
                "x",
                FieldType::String,
                vec![SubgraphBinding::new("s1", "x")],
            )
            .field(
                "Query",
                "y",
                FieldType::String,
                vec![SubgraphBinding::new("s2", "y")],
            )
            .build();
        let plan = plan_for(metadata, "{ x y }");

        match &plan.root {
            PlanNode::Parallel { nodes } => assert_eq!(nodes.len(), 2),
            other => panic!("expected a parallel, got {:?}", other),
        }
    }

    #[test]
    fn export_dependency_sequences_root_steps() {
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
        let plan = plan_for(metadata, "{ me { id } recommendations }");

        let nodes = match &plan.root {
            PlanNode::Sequence { nodes } => nodes,
            other => panic!("expected a sequence, got {:?}", other),
        };
        assert_eq!(nodes.len(), 2);
        match (&nodes[0], &nodes[1]) {
            (PlanNode::Fetch(first), PlanNode::Fetch(second)) => {
                assert_eq!(first.service_name, "accounts");
                assert_eq!(first.exports.len(), 1);
                assert_eq!(first.exports[0].logical_name, "userId");
                assert_eq!(first.exports[0].state_name, "_export_0_userId");
                assert_eq!(second.service_name, "reco");
                assert_eq!(
                    second.variables[0].source,
                    VariableSource::State {
                        name: "_export_0_userId".to_string()
                    },
                );
            }
            other => panic!("expected two fetches, got {:?}", other),
        }
    }

    #[test]
    fn introspection_only_plan_has_no_fetches() {
        let metadata = FusionMetadata::builder()
            .field(
                "Query",
                "x",
                FieldType::String,
                vec![SubgraphBinding::new("s1", "x")],
            )
            .build();
        let plan = plan_for(metadata, "{ __typename __schema { types { name } } }");

        assert_eq!(plan.root, PlanNode::Sequence { nodes: Vec::new() });
        assert_eq!(plan.typename_fields, ["__typename"]);
        assert_eq!(plan.unsupported_introspection, ["__schema"]);
        assert_eq!(plan.root_type_name, "Query");
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
            .resolver(ResolverDefinition {
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
                PagedConnectionDefinition {
                    items_field: "nodes".to_string(),
                    page_info_field: "pageInfo".to_string(),
                    cursor_argument: "after".to_string(),
                    resolver: "userById".to_string(),
                },
            )
            .build()
    }

    #[test]
    fn paged_connection_gets_a_paging_config() {
        let plan = plan_for(paged_metadata(), "{ user { id posts { nodes { title } } } }");

        let fetch = match &plan.root {
            PlanNode::Fetch(fetch) => fetch,
            other => panic!("expected a fetch, got {:?}", other),
        };
        assert!(fetch.operation.contains("pageInfo { hasNextPage endCursor }"));
        assert_eq!(fetch.paging.len(), 1);

        let paging = &fetch.paging[0];
        assert_eq!(paging.entity_path, Path::from("user"));
        assert_eq!(paging.connection_field, "posts");
        assert_eq!(paging.items_field, "nodes");
        assert_eq!(paging.page_info_field, "pageInfo");
        assert_eq!(paging.cursor_variable, "_cursor");
        assert_eq!(paging.unwrap, "userById");
        assert_eq!(
            paging.operation,
            "query($id: ID!, $_cursor: String) { userById(id: $id) \
             { posts(after: $_cursor) { nodes { title } pageInfo { hasNextPage endCursor } } } }",
        );
        assert_eq!(paging.variables.len(), 1);
        assert_eq!(
            paging.variables[0].source,
            VariableSource::ParentField {
                field: "id".to_string()
            },
        );
    }

    #[test]
    fn paging_is_skipped_without_selected_items() {
        let plan = plan_for(paged_metadata(), "{ user { id posts { pageInfo { hasNextPage } } } }");

        let fetch = match &plan.root {
            PlanNode::Fetch(fetch) => fetch,
            other => panic!("expected a fetch, got {:?}", other),
        };
        assert!(fetch.paging.is_empty());
    }
}
