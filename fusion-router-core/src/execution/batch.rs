//! Drives client requests end to end, including batch submissions.
//!
//! A batch is an ordered list of requests executed serially. Values
//! exported while executing entry N become injection candidates for the
//! declared-but-unsupplied variables of entry N+1, matched by the export's
//! logical name. Responses are streamed out as a bracketed JSON array as
//! each entry completes, so a slow late entry never delays earlier ones.

use crate::prelude::graphql::*;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// An exported value carried from one batch entry to the next.
type CarriedExport = (String, FieldType, Value);

pub struct BatchExecutor {
    planner: QueryPlanner,
    cache: QueryCache,
    registry: Arc<ServiceRegistry>,
}

impl BatchExecutor {
    pub fn new(
        metadata: Arc<FusionMetadata>,
        registry: Arc<ServiceRegistry>,
        cache_limit: usize,
    ) -> Self {
        Self {
            planner: QueryPlanner::new(Arc::clone(&metadata)),
            cache: QueryCache::new(cache_limit, metadata),
            registry,
        }
    }

    /// Execute a single request.
    pub async fn execute(&self, request: Request) -> Response {
        self.execute_entry(request, &mut Vec::new()).await
    }

    /// Execute a batch, writing each entry's response to `output` as soon
    /// as it completes.
    #[tracing::instrument(skip_all, level = "debug", name = "batch")]
    pub async fn execute_batch<W>(&self, batch: BatchRequest, output: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        output.write_all(b"[").await?;
        let mut exports: Vec<CarriedExport> = Vec::new();
        for (index, request) in batch.into_iter().enumerate() {
            if index > 0 {
                output.write_all(b",").await?;
            }
            let response = self.execute_entry(request, &mut exports).await;
            let body = serde_json::to_vec(&response)
                .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;
            output.write_all(&body).await?;
        }
        output.write_all(b"]").await?;
        output.flush().await
    }

    /// `exports` carries the previous entry's exported values in and this
    /// entry's exported values out. A failed entry exports nothing.
    async fn execute_entry(
        &self,
        mut request: Request,
        exports: &mut Vec<CarriedExport>,
    ) -> Response {
        let previous = std::mem::take(exports);

        let text = match request.query.as_deref() {
            Some(query) if !query.is_empty() => query.to_string(),
            _ => {
                return PlanError::ParseError {
                    reason: "the request has no query document".to_string(),
                }
                .to_response()
            }
        };
        let query = match self.cache.get_query(&text).await {
            Ok(query) => query,
            Err(err) => return err.to_response(),
        };

        if let Err(err) = inject_exports(&query, &mut request, &previous) {
            failfast_debug!("batch variable injection failed: {}", err);
            return err.to_response();
        }

        let plan = match self
            .planner
            .build_query_plan(&query, request.operation_name.as_deref())
        {
            Ok(plan) => plan,
            Err(err) => return err.to_response(),
        };
        if let Err(response) = plan.validate(&self.registry) {
            return response;
        }

        let context = Context::new(Arc::new(request));
        let response = plan.execute(&context, &self.registry).await;

        for binding in plan.export_bindings() {
            for value in context.exports.all(&binding.state_name) {
                exports.push((binding.logical_name.clone(), binding.ty.clone(), value));
            }
        }
        response
    }
}

/// Fill the operation's declared-but-unsupplied variables from the
/// previous entry's exports, matched by name. A list-typed target
/// collects every same-named export; a scalar target takes the first.
fn inject_exports(
    query: &Query,
    request: &mut Request,
    exports: &[CarriedExport],
) -> Result<(), FetchError> {
    if exports.is_empty() {
        return Ok(());
    }
    let operation = query
        .operation(request.operation_name.as_deref())
        .map_err(FetchError::from)?;

    for (name, (ty, _default)) in operation.variables.iter() {
        if request.variables.contains_key(name.as_str()) {
            continue;
        }
        let candidates: Vec<&Value> = exports
            .iter()
            .filter(|(export, _, _)| export == name)
            .map(|(_, _, value)| value)
            .collect();
        if candidates.is_empty() {
            continue;
        }

        let value = if ty.is_list() {
            Value::Array(candidates.into_iter().cloned().collect())
        } else {
            candidates[0].clone()
        };
        if ty.validate_value(&value).is_err() {
            return Err(if contains_object(&value) {
                FetchError::BatchAutoMapVariableType {
                    name: name.clone(),
                    ty: ty.to_string(),
                }
            } else {
                FetchError::BatchVariableSerialize {
                    name: name.clone(),
                    ty: ty.to_string(),
                }
            });
        }
        Arc::make_mut(&mut request.variables).insert(name.as_str(), value);
    }
    Ok(())
}

fn contains_object(value: &Value) -> bool {
    match value {
        Value::Object(_) => true,
        Value::Array(values) => values.iter().any(contains_object),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::SubgraphBinding;
    use crate::service_registry::MockSubgraphService;
    use serde_json_bytes::json;
    use test_log::test;

    fn export_metadata() -> FusionMetadata {
        FusionMetadata::builder()
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
                "recoByUser",
                FieldType::List(Box::new(FieldType::String)),
                vec![SubgraphBinding::new("reco", "recoByUser")],
            )
            .export("User", "id", "userId")
            .build()
    }

    fn executor(metadata: FusionMetadata, reco: MockSubgraphService) -> BatchExecutor {
        let mut accounts = MockSubgraphService::new();
        accounts.expect_call().returning(|_| {
            Ok(Response::builder()
                .data(json!({"me": {"id": "u1"}}))
                .build())
        });
        let mut registry = ServiceRegistry::new();
        registry.insert("accounts", accounts);
        registry.insert("reco", reco);
        BatchExecutor::new(Arc::new(metadata), Arc::new(registry), 16)
    }

    fn entry(text: &str) -> Request {
        Request::builder().query(Some(text.to_string())).build()
    }

    async fn run_batch(executor: &BatchExecutor, batch: BatchRequest) -> Vec<Response> {
        let mut output = Vec::new();
        executor.execute_batch(batch, &mut output).await.unwrap();
        serde_json::from_slice(&output).unwrap()
    }

    #[test(tokio::test)]
    async fn exports_flow_into_the_next_entry() {
        let mut reco = MockSubgraphService::new();
        reco.expect_call().times(1).returning(|request| {
            assert_eq!(request.variables.get("userId"), Some(&json!("u1")));
            Ok(Response::builder()
                .data(json!({"recoByUser": ["a", "b"]}))
                .build())
        });
        let executor = executor(export_metadata(), reco);

        let responses = run_batch(
            &executor,
            vec![
                entry("{ me { id } }"),
                entry("query($userId: ID) { recoByUser(userId: $userId) }"),
            ],
        )
        .await;

        assert_eq!(responses.len(), 2);
        assert!(responses[0].errors.is_empty(), "{:?}", responses[0].errors);
        assert_eq!(responses[0].data, json!({"me": {"id": "u1"}}));
        assert!(responses[1].errors.is_empty(), "{:?}", responses[1].errors);
        assert_eq!(responses[1].data, json!({"recoByUser": ["a", "b"]}));
    }

    #[test(tokio::test)]
    async fn a_list_target_collects_every_export() {
        let metadata = FusionMetadata::builder()
            .field(
                "Query",
                "users",
                FieldType::List(Box::new(FieldType::Named("User".to_string()))),
                vec![SubgraphBinding::new("accounts", "users")],
            )
            .field(
                "User",
                "id",
                FieldType::NonNull(Box::new(FieldType::Id)),
                vec![SubgraphBinding::new("accounts", "id")],
            )
            .field(
                "Query",
                "recoByUser",
                FieldType::List(Box::new(FieldType::String)),
                vec![SubgraphBinding::new("reco", "recoByUser")],
            )
            .export("User", "id", "userId")
            .build();
        let mut accounts = MockSubgraphService::new();
        accounts.expect_call().returning(|_| {
            Ok(Response::builder()
                .data(json!({"users": [{"id": "u1"}, {"id": "u2"}]}))
                .build())
        });
        let mut reco = MockSubgraphService::new();
        reco.expect_call().times(1).returning(|request| {
            // both users' exports, concatenated in request order
            assert_eq!(request.variables.get("userId"), Some(&json!(["u1", "u2"])));
            Ok(Response::builder().data(json!({"recoByUser": []})).build())
        });
        let mut registry = ServiceRegistry::new();
        registry.insert("accounts", accounts);
        registry.insert("reco", reco);
        let executor = BatchExecutor::new(Arc::new(metadata), Arc::new(registry), 16);

        let responses = run_batch(
            &executor,
            vec![
                entry("{ users { id } }"),
                entry("query($userId: [ID]) { recoByUser(userIds: $userId) }"),
            ],
        )
        .await;
        assert!(responses[0].errors.is_empty(), "{:?}", responses[0].errors);
        assert!(responses[1].errors.is_empty(), "{:?}", responses[1].errors);
    }

    #[test(tokio::test)]
    async fn a_type_mismatch_fails_only_the_relying_entry() {
        let mut reco = MockSubgraphService::new();
        reco.expect_call().never();
        let executor = executor(export_metadata(), reco);

        let responses = run_batch(
            &executor,
            vec![
                entry("{ me { id } }"),
                entry("query($userId: Int!) { recoByUser(userId: $userId) }"),
            ],
        )
        .await;

        assert!(responses[0].errors.is_empty(), "{:?}", responses[0].errors);
        assert_eq!(responses[1].errors.len(), 1);
        assert_eq!(
            responses[1].errors[0].extensions.get("code"),
            Some(&Value::String("BATCH_VAR_SERIALIZE".into())),
        );
    }

    #[test(tokio::test)]
    async fn an_exported_object_cannot_fill_a_scalar_target() {
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
                "recoByUser",
                FieldType::List(Box::new(FieldType::String)),
                vec![SubgraphBinding::new("reco", "recoByUser")],
            )
            .export("Query", "me", "userId")
            .build();
        let mut reco = MockSubgraphService::new();
        reco.expect_call().never();
        let executor = executor(metadata, reco);

        let responses = run_batch(
            &executor,
            vec![
                entry("{ me { id } }"),
                entry("query($userId: ID!) { recoByUser(userId: $userId) }"),
            ],
        )
        .await;
        assert_eq!(
            responses[1].errors[0].extensions.get("code"),
            Some(&Value::String("BATCH_AUTO_MAP_VAR_TYPE".into())),
        );
    }

    #[test(tokio::test)]
    async fn the_batch_output_is_a_json_array() {
        let reco = MockSubgraphService::new();
        let executor = executor(export_metadata(), reco);

        let mut output = Vec::new();
        executor
            .execute_batch(
                vec![entry("{ me { id } }"), entry("{ me { id } }")],
                &mut output,
            )
            .await
            .unwrap();

        assert_eq!(output.first(), Some(&b'['));
        assert_eq!(output.last(), Some(&b']'));
        let parsed: Vec<serde_json::Value> = serde_json::from_slice(&output).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test(tokio::test)]
    async fn a_missing_query_is_a_parse_error() {
        let reco = MockSubgraphService::new();
        let executor = executor(export_metadata(), reco);
        let response = executor
            .execute(Request::builder().query(Option::<String>::None).build())
            .await;
        assert_eq!(
            response.errors[0].extensions.get("code"),
            Some(&Value::String("GRAPHQL_PARSING_FAILED".into())),
        );
    }
}
