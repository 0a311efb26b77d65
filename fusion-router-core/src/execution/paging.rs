//! Auto-pages connections to exhaustion after a fetch's first response.
//!
//! Each paged connection keeps an explicit stack of pending subqueries,
//! one per entity whose page info reports more pages. A popped subquery
//! fetches one follow-up page through the connection's entity resolver,
//! appends the page's items to the already-spliced list, and pushes
//! itself back while the subgraph keeps reporting a next page. The stack
//! is seeded in reverse so the first entity in request order pages first.

use crate::prelude::graphql::*;
use crate::query_planner::{VariableSource, PAGE_INFO_END_CURSOR, PAGE_INFO_HAS_NEXT};
use crate::query_planner::{FetchNode, PagingConfig};
use std::sync::Arc;

/// The per-fetch runner: plain fetches complete immediately, fetches with
/// paged connections drain their subquery stacks first.
pub(crate) enum QueryRunner<'a> {
    Simple,
    Paged(PagedQuery<'a>),
}

impl<'a> QueryRunner<'a> {
    pub(crate) fn new(
        fetch: &'a FetchNode,
        service: &'a Arc<dyn SubgraphService>,
        context: &'a Context,
    ) -> Self {
        if fetch.paging.is_empty() {
            QueryRunner::Simple
        } else {
            QueryRunner::Paged(PagedQuery {
                fetch,
                service,
                context,
            })
        }
    }

    /// Complete every paged connection inside one spliced response
    /// subtree. Collected errors carry paths relative to the subtree.
    pub(crate) async fn complete(&mut self, data: &mut Value) -> Vec<Error> {
        match self {
            QueryRunner::Simple => Vec::new(),
            QueryRunner::Paged(paged) => paged.complete(data).await,
        }
    }
}

pub(crate) struct PagedQuery<'a> {
    fetch: &'a FetchNode,
    service: &'a Arc<dyn SubgraphService>,
    context: &'a Context,
}

/// One pending follow-up page for one entity's connection.
struct PagedSubquery {
    entity_path: Path,
    variables: Object,
    cursor: Value,
}

/// One fetched follow-up page.
struct Page {
    items: Vec<Value>,
    page_info: Value,
    errors: Vec<Error>,
}

impl PagedQuery<'_> {
    #[tracing::instrument(skip_all, level = "debug", name = "subfetch")]
    async fn complete(&mut self, data: &mut Value) -> Vec<Error> {
        let mut errors = Vec::new();

        for config in &self.fetch.paging {
            let mut stack: Vec<PagedSubquery> = Vec::new();
            data.select_values_and_paths(&config.entity_path, |path, entity| {
                match self.seed(config, entity) {
                    Ok(Some((variables, cursor))) => stack.push(PagedSubquery {
                        entity_path: path,
                        variables,
                        cursor,
                    }),
                    Ok(None) => {}
                    Err(err) => errors.push(err.to_graphql_error(Some(path))),
                }
            });
            stack.reverse();

            while let Some(mut subquery) = stack.pop() {
                if self.context.cancellation.is_cancelled() {
                    errors.push(
                        FetchError::Cancelled
                            .to_graphql_error(Some(subquery.entity_path.clone())),
                    );
                    break;
                }
                match self.run_page(config, &subquery).await {
                    Ok(mut page) => {
                        errors.extend(
                            std::mem::take(&mut page.errors)
                                .into_iter()
                                .map(|error| error.rebase(&subquery.entity_path)),
                        );
                        let page_info = page.page_info.clone();
                        if let Err(err) =
                            splice_page(data, config, &subquery.entity_path, page)
                        {
                            errors.push(
                                err.to_graphql_error(Some(subquery.entity_path.clone())),
                            );
                            continue;
                        }
                        if let Some(cursor) = next_cursor(&page_info) {
                            // a null cursor would refetch the first page
                            if cursor.is_null() {
                                errors.push(
                                    FetchError::ExecutionInvalidContent {
                                        reason: "connection reported more pages without \
                                                 an end cursor"
                                            .to_string(),
                                    }
                                    .to_graphql_error(Some(subquery.entity_path.clone())),
                                );
                                continue;
                            }
                            // a non-advancing cursor would page forever
                            if cursor == subquery.cursor {
                                errors.push(
                                    FetchError::ExecutionInvalidContent {
                                        reason: "connection cursor did not advance"
                                            .to_string(),
                                    }
                                    .to_graphql_error(Some(subquery.entity_path.clone())),
                                );
                                continue;
                            }
                            subquery.cursor = cursor;
                            stack.push(subquery);
                        }
                    }
                    Err(err) => errors
                        .push(err.to_graphql_error(Some(subquery.entity_path.clone()))),
                }
            }
        }

        errors
    }

    /// Inspect one entity's first page and decide whether it needs
    /// follow-up pages. Absent page info means the connection cannot
    /// page; an absent or false `hasNextPage` means it is complete.
    fn seed(
        &self,
        config: &PagingConfig,
        entity: &Value,
    ) -> Result<Option<(Object, Value)>, FetchError> {
        let page_info = entity
            .as_object()
            .and_then(|entity| entity.get(config.connection_field.as_str()))
            .and_then(|connection| connection.as_object())
            .and_then(|connection| connection.get(config.page_info_field.as_str()));
        let cursor = match page_info.and_then(next_cursor) {
            Some(cursor) => cursor,
            None => return Ok(None),
        };
        if cursor.is_null() {
            return Err(FetchError::ExecutionInvalidContent {
                reason: "connection reported more pages without an end cursor".to_string(),
            });
        }

        let mut variables = Object::default();
        for variable in &config.variables {
            match &variable.source {
                VariableSource::Client => {
                    if let Some(value) =
                        self.context.request.variables.get(variable.name.as_str())
                    {
                        variables.insert(variable.name.as_str(), value.clone());
                    }
                }
                VariableSource::State { name } => {
                    let value = self.context.exports.get(name).ok_or_else(|| {
                        FetchError::DependentStepSkipped {
                            service: self.fetch.service_name.clone(),
                        }
                    })?;
                    variables.insert(variable.name.as_str(), value);
                }
                VariableSource::ParentField { field } => {
                    let value = entity
                        .as_object()
                        .and_then(|object| object.get(field.as_str()))
                        .filter(|value| !value.is_null())
                        .cloned()
                        .ok_or_else(|| FetchError::ExecutionFieldNotFound {
                            field: field.clone(),
                        })?;
                    variables.insert(variable.name.as_str(), value);
                }
                VariableSource::Literal(_) => {}
            }
        }
        Ok(Some((variables, cursor)))
    }

    async fn run_page(
        &self,
        config: &PagingConfig,
        subquery: &PagedSubquery,
    ) -> Result<Page, FetchError> {
        let mut variables = subquery.variables.clone();
        variables.insert(config.cursor_variable.as_str(), subquery.cursor.clone());

        let mut response = self
            .service
            .call(SubgraphRequest {
                service_name: self.fetch.service_name.clone(),
                query: config.operation.clone(),
                variables,
                operation_kind: OperationKind::Query,
            })
            .await?;
        let data = std::mem::take(&mut response.data);
        let errors = std::mem::take(&mut response.errors);

        let entity = super::fetch::unwrap_jump(data, &config.unwrap, &self.fetch.service_name)?;
        let connection = match entity {
            // the entity disappeared between pages; stop quietly
            Value::Null => {
                return Ok(Page {
                    items: Vec::new(),
                    page_info: Value::Null,
                    errors,
                })
            }
            Value::Object(mut object) => object
                .remove(config.connection_field.as_str())
                .ok_or_else(|| FetchError::ExecutionFieldNotFound {
                    field: config.connection_field.clone(),
                })?,
            _ => {
                return Err(FetchError::SubrequestMalformedResponse {
                    service: self.fetch.service_name.clone(),
                    reason: "expected an entity object for a connection page".to_string(),
                })
            }
        };

        let mut connection = match connection {
            Value::Object(object) => object,
            Value::Null => {
                return Ok(Page {
                    items: Vec::new(),
                    page_info: Value::Null,
                    errors,
                })
            }
            _ => {
                return Err(FetchError::ExecutionInvalidContent {
                    reason: "connection page is not an object".to_string(),
                })
            }
        };

        let items = match connection.remove(config.items_field.as_str()) {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(_) => {
                return Err(FetchError::ExecutionInvalidContent {
                    reason: "connection items field is not a list".to_string(),
                })
            }
        };
        let page_info = connection
            .remove(config.page_info_field.as_str())
            .unwrap_or(Value::Null);

        Ok(Page {
            items,
            page_info,
            errors,
        })
    }
}

/// Append a page's items to the spliced connection and replace its page
/// info with the latest one.
fn splice_page(
    data: &mut Value,
    config: &PagingConfig,
    entity_path: &Path,
    page: Page,
) -> Result<(), FetchError> {
    let connection = value_at_path_mut(data, entity_path)
        .and_then(|entity| entity.as_object_mut())
        .and_then(|entity| entity.get_mut(config.connection_field.as_str()))
        .and_then(|connection| connection.as_object_mut())
        .ok_or_else(|| FetchError::ExecutionPathNotFound {
            reason: format!("no connection at {}", entity_path),
        })?;

    match connection.get_mut(config.items_field.as_str()) {
        Some(Value::Array(existing)) => existing.extend(page.items),
        _ => {
            connection.insert(config.items_field.as_str(), Value::Array(page.items));
        }
    }
    connection.insert(config.page_info_field.as_str(), page.page_info);
    Ok(())
}

fn next_cursor(page_info: &Value) -> Option<Value> {
    let object = page_info.as_object()?;
    if object.get(PAGE_INFO_HAS_NEXT) != Some(&Value::Bool(true)) {
        return None;
    }
    Some(
        object
            .get(PAGE_INFO_END_CURSOR)
            .cloned()
            .unwrap_or(Value::Null),
    )
}

/// Concrete paths only; flatten elements never appear here because the
/// selector materialized them into indices.
fn value_at_path_mut<'a>(data: &'a mut Value, path: &Path) -> Option<&'a mut Value> {
    let mut current = data;
    for element in path.iter() {
        current = match element {
            PathElement::Key(key) => current.as_object_mut()?.get_mut(key.as_str())?,
            PathElement::Index(index) => current.as_array_mut()?.get_mut(*index)?,
            PathElement::Flatten => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use crate::metadata::{PagedConnectionDefinition, ResolverDefinition, SubgraphBinding};
    use crate::prelude::graphql::*;
    use crate::service_registry::MockSubgraphService;
    use indexmap::IndexMap;
    use serde_json_bytes::json;
    use std::sync::Arc;
    use test_log::test;

    fn paged_metadata(root_is_list: bool) -> FusionMetadata {
        let mut argument_types = IndexMap::new();
        argument_types.insert("id".to_string(), FieldType::NonNull(Box::new(FieldType::Id)));
        let root_type = if root_is_list {
            FieldType::List(Box::new(FieldType::Named("User".to_string())))
        } else {
            FieldType::Named("User".to_string())
        };
        FusionMetadata::builder()
            .field(
                "Query",
                if root_is_list { "users" } else { "user" },
                root_type,
                vec![SubgraphBinding::new(
                    "social",
                    if root_is_list { "users" } else { "user" },
                )],
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

    fn execute(
        metadata: FusionMetadata,
        text: &str,
        service: MockSubgraphService,
    ) -> impl std::future::Future<Output = Response> {
        let metadata = Arc::new(metadata);
        let query = Query::parse(text, &metadata).unwrap();
        let plan = QueryPlanner::new(Arc::clone(&metadata))
            .build_query_plan(&query, None)
            .unwrap();
        let mut registry = ServiceRegistry::new();
        registry.insert("social", service);
        let context = Context::new(Arc::new(
            Request::builder().query(Some(text.to_string())).build(),
        ));
        async move { plan.execute(&context, &registry).await }
    }

    fn page(titles: &[&str], end_cursor: Option<&str>) -> Value {
        json!({
            "nodes": titles.iter().map(|t| json!({"title": *t})).collect::<Vec<_>>(),
            "pageInfo": {
                "hasNextPage": end_cursor.is_some(),
                "endCursor": end_cursor,
            },
        })
    }

    #[test(tokio::test)]
    async fn pages_until_the_subgraph_is_exhausted() {
        let mut service = MockSubgraphService::new();
        service.expect_call().times(3).returning(|request| {
            let cursor = request
                .variables
                .get("_cursor")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            match cursor {
                "" => Ok(Response::builder()
                    .data(json!({"user": {"id": "u1", "posts": page(&["p1"], Some("c1"))}}))
                    .build()),
                "c1" => Ok(Response::builder()
                    .data(json!({"userById": {"posts": page(&["p2"], Some("c2"))}}))
                    .build()),
                _ => Ok(Response::builder()
                    .data(json!({"userById": {"posts": page(&["p3"], None)}}))
                    .build()),
            }
        });

        let response = execute(
            paged_metadata(false),
            "{ user { id posts { nodes { title } } } }",
            service,
        )
        .await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(
            response.data,
            json!({"user": {"id": "u1", "posts": {
                "nodes": [{"title": "p1"}, {"title": "p2"}, {"title": "p3"}],
                "pageInfo": {"hasNextPage": false, "endCursor": null},
            }}}),
        );
    }

    #[test(tokio::test)]
    async fn absent_page_info_means_no_more_pages() {
        let mut service = MockSubgraphService::new();
        service.expect_call().times(1).returning(|_| {
            Ok(Response::builder()
                .data(json!({"user": {"id": "u1", "posts": {"nodes": [{"title": "p1"}]}}}))
                .build())
        });

        let response = execute(
            paged_metadata(false),
            "{ user { id posts { nodes { title } } } }",
            service,
        )
        .await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(
            response.data,
            json!({"user": {"id": "u1", "posts": {"nodes": [{"title": "p1"}]}}}),
        );
    }

    #[test(tokio::test)]
    async fn items_append_in_request_order_across_entities() {
        let mut service = MockSubgraphService::new();
        service.expect_call().returning(|request| {
            match request.variables.get("id").and_then(|v| v.as_str()) {
                // follow-up pages, one per user
                Some("u1") => Ok(Response::builder()
                    .data(json!({"userById": {"posts": page(&["a2"], None)}}))
                    .build()),
                Some("u2") => Ok(Response::builder()
                    .data(json!({"userById": {"posts": page(&["b2"], None)}}))
                    .build()),
                // the master request
                _ => Ok(Response::builder()
                    .data(json!({"users": [
                        {"id": "u1", "posts": page(&["a1"], Some("ca"))},
                        {"id": "u2", "posts": page(&["b1"], Some("cb"))},
                    ]}))
                    .build()),
            }
        });

        let response = execute(
            paged_metadata(true),
            "{ users { id posts { nodes { title } } } }",
            service,
        )
        .await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(
            response.data,
            json!({"users": [
                {"id": "u1", "posts": {
                    "nodes": [{"title": "a1"}, {"title": "a2"}],
                    "pageInfo": {"hasNextPage": false, "endCursor": null},
                }},
                {"id": "u2", "posts": {
                    "nodes": [{"title": "b1"}, {"title": "b2"}],
                    "pageInfo": {"hasNextPage": false, "endCursor": null},
                }},
            ]}),
        );
    }

    #[test(tokio::test)]
    async fn a_null_cursor_mid_chain_stops_without_refetching() {
        let mut service = MockSubgraphService::new();
        // master page plus exactly one follow-up; the null cursor must not
        // trigger a third call replaying the first page
        service.expect_call().times(2).returning(|request| {
            if request.variables.get("_cursor").is_some() {
                Ok(Response::builder()
                    .data(json!({"userById": {"posts": {
                        "nodes": [{"title": "p2"}],
                        "pageInfo": {"hasNextPage": true, "endCursor": null},
                    }}}))
                    .build())
            } else {
                Ok(Response::builder()
                    .data(json!({"user": {"id": "u1", "posts": page(&["p1"], Some("c1"))}}))
                    .build())
            }
        });

        let response = execute(
            paged_metadata(false),
            "{ user { id posts { nodes { title } } } }",
            service,
        )
        .await;
        assert_eq!(response.errors.len(), 1);
        assert_eq!(
            response.errors[0].extensions.get("code"),
            Some(&Value::String("INVALID_CONTENT".into())),
        );
        assert_eq!(
            response.data.get_path(&Path::from("user/posts/nodes")).unwrap(),
            &json!([{"title": "p1"}, {"title": "p2"}]),
        );
    }

    #[test(tokio::test)]
    async fn a_non_advancing_cursor_stops_paging_with_an_error() {
        let mut service = MockSubgraphService::new();
        service.expect_call().times(2).returning(|request| {
            if request.variables.get("_cursor").is_some() {
                Ok(Response::builder()
                    .data(json!({"userById": {"posts": page(&["p2"], Some("c1"))}}))
                    .build())
            } else {
                Ok(Response::builder()
                    .data(json!({"user": {"id": "u1", "posts": page(&["p1"], Some("c1"))}}))
                    .build())
            }
        });

        let response = execute(
            paged_metadata(false),
            "{ user { id posts { nodes { title } } } }",
            service,
        )
        .await;
        assert_eq!(response.errors.len(), 1);
        assert_eq!(
            response.errors[0].extensions.get("code"),
            Some(&Value::String("INVALID_CONTENT".into())),
        );
        // the first page's items are kept
        assert_eq!(
            response.data.get_path(&Path::from("user/posts/nodes")).unwrap(),
            &json!([{"title": "p1"}, {"title": "p2"}]),
        );
    }
}
