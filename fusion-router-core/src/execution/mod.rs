//! Executes a query plan against the subgraph registry.
//!
//! Sequences run their children one after the other, merging each result
//! into the accumulated value. Parallels dispatch their children through a
//! `FuturesUnordered` and merge in completion order; the merge is
//! deterministic because sibling steps write disjoint subtrees. Flattens
//! re-anchor their child at every value selected by their path.

pub mod batch;
pub(crate) mod paging;

use crate::prelude::graphql::*;
use futures::prelude::*;
use tracing::Instrument;

impl QueryPlan {
    /// Execute the plan and assemble the client response.
    #[tracing::instrument(skip_all, level = "debug", name = "execute")]
    pub async fn execute(
        &self,
        context: &Context,
        service_registry: &ServiceRegistry,
    ) -> Response {
        let root = Path::empty();
        let (mut data, mut errors) = self
            .root
            .execute_recursively(&root, context, service_registry, &Value::default())
            .await;

        for name in &self.typename_fields {
            data.deep_merge(Value::from_path(
                &Path(vec![PathElement::Key(name.clone())]),
                Value::String(self.root_type_name.as_str().into()),
            ));
        }
        for name in &self.unsupported_introspection {
            errors.push(
                FetchError::ExecutionInvalidContent {
                    reason: format!("introspection field '{}' is not supported", name),
                }
                .to_graphql_error(Some(Path(vec![PathElement::Key(name.clone())]))),
            );
        }

        Response::builder().data(data).errors(errors).build()
    }
}

impl PlanNode {
    fn execute_recursively<'a>(
        &'a self,
        current_dir: &'a Path,
        context: &'a Context,
        service_registry: &'a ServiceRegistry,
        parent_value: &'a Value,
    ) -> future::BoxFuture<'a, (Value, Vec<Error>)> {
        Box::pin(async move {
            tracing::trace!("executing plan node: {:?}", self);
            let mut value;
            let mut errors = Vec::new();

            match self {
                PlanNode::Sequence { nodes } => {
                    value = parent_value.clone();
                    let span = tracing::info_span!("sequence");
                    for node in nodes {
                        let (v, err) = node
                            .execute_recursively(current_dir, context, service_registry, &value)
                            .instrument(span.clone())
                            .await;
                        value.deep_merge(v);
                        errors.extend(err.into_iter());
                    }
                }
                PlanNode::Parallel { nodes } => {
                    value = Value::default();
                    let span = tracing::info_span!("parallel");
                    let mut stream: stream::FuturesUnordered<_> = nodes
                        .iter()
                        .map(|plan| {
                            plan.execute_recursively(
                                current_dir,
                                context,
                                service_registry,
                                parent_value,
                            )
                            .instrument(span.clone())
                        })
                        .collect();
                    while let Some((v, err)) = stream.next().await {
                        value.deep_merge(v);
                        errors.extend(err.into_iter());
                    }
                }
                PlanNode::Flatten(flatten) => {
                    let (v, err) = flatten
                        .node
                        .execute_recursively(
                            &current_dir.join(&flatten.path),
                            context,
                            service_registry,
                            parent_value,
                        )
                        .instrument(tracing::trace_span!("flatten"))
                        .await;
                    value = v;
                    errors = err;
                }
                PlanNode::Fetch(info) => {
                    match fetch::fetch_node(info, parent_value, current_dir, context, service_registry)
                        .instrument(tracing::info_span!("fetch"))
                        .await
                    {
                        Ok((v, err)) => {
                            value = v;
                            errors = err;
                        }
                        Err(err) => {
                            failfast_error!("fetch error: {}", err);
                            errors = vec![err.to_graphql_error(Some(current_dir.to_owned()))];
                            value = Value::default();
                        }
                    }
                }
            }

            (value, errors)
        })
    }
}

mod fetch {
    use super::paging::QueryRunner;
    use crate::prelude::graphql::*;
    use crate::query_planner::VariableSource;
    use futures::future;
    use std::sync::Arc;

    pub(super) async fn fetch_node(
        fetch: &FetchNode,
        parent_value: &Value,
        current_dir: &Path,
        context: &Context,
        service_registry: &ServiceRegistry,
    ) -> Result<(Value, Vec<Error>), FetchError> {
        if context.cancellation.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let service = service_registry.get(&fetch.service_name).ok_or_else(|| {
            FetchError::ValidationUnknownServiceError {
                service: fetch.service_name.clone(),
            }
        })?;
        let base = base_variables(fetch, context)?;

        if fetch.requires_parent {
            fetch_entities(fetch, parent_value, current_dir, context, &base, &service).await
        } else {
            fetch_once(fetch, context, base, &service).await
        }
    }

    /// A single request for a root-level step.
    async fn fetch_once(
        fetch: &FetchNode,
        context: &Context,
        variables: Object,
        service: &Arc<dyn SubgraphService>,
    ) -> Result<(Value, Vec<Error>), FetchError> {
        let mut response = service
            .call(SubgraphRequest {
                service_name: fetch.service_name.clone(),
                query: fetch.operation.clone(),
                variables,
                operation_kind: fetch.operation_kind,
            })
            .await?;

        let mut data = std::mem::take(&mut response.data);
        if let Some(unwrap) = &fetch.unwrap {
            data = unwrap_jump(data, unwrap, &fetch.service_name)?;
        }
        let mut errors: Vec<Error> = std::mem::take(&mut response.errors);

        let mut runner = QueryRunner::new(fetch, service, context);
        errors.extend(runner.complete(&mut data).await);

        publish_exports(fetch, &data, context);
        Ok((data, errors))
    }

    /// One request per parent entity found at the splice path, issued
    /// concurrently, spliced back in request order.
    async fn fetch_entities(
        fetch: &FetchNode,
        parent_value: &Value,
        current_dir: &Path,
        context: &Context,
        base: &Object,
        service: &Arc<dyn SubgraphService>,
    ) -> Result<(Value, Vec<Error>), FetchError> {
        let unwrap = fetch
            .unwrap
            .as_deref()
            .expect("entity fetches wrap their selection in a jump field; qed");

        let mut targets: Vec<(Path, &Value)> = Vec::new();
        parent_value.select_values_and_paths(current_dir, |path, value| {
            targets.push((path, value));
        });

        let mut errors = Vec::new();
        let mut calls = Vec::new();
        for (path, entity) in targets {
            // a null entity means the parent fetch already failed there
            if !entity.is_object() {
                continue;
            }
            match entity_variables(fetch, base, entity) {
                Ok(variables) => calls.push((path, variables)),
                Err(err) => errors.push(err.to_graphql_error(Some(path))),
            }
        }

        let results = future::join_all(calls.iter().map(|(_, variables)| {
            service.call(SubgraphRequest {
                service_name: fetch.service_name.clone(),
                query: fetch.operation.clone(),
                variables: variables.clone(),
                operation_kind: fetch.operation_kind,
            })
        }))
        .await;

        let mut value = Value::default();
        for ((path, _), result) in calls.iter().zip(results) {
            match result {
                Ok(mut response) => {
                    let data = std::mem::take(&mut response.data);
                    errors.extend(response.errors.drain(..).map(|error| error.rebase(path)));
                    match unwrap_jump(data, unwrap, &fetch.service_name) {
                        Ok(mut data) => {
                            let mut runner = QueryRunner::new(fetch, service, context);
                            errors.extend(
                                runner
                                    .complete(&mut data)
                                    .await
                                    .into_iter()
                                    .map(|error| error.rebase(path)),
                            );
                            publish_exports(fetch, &data, context);
                            value.insert(path, data)?;
                        }
                        Err(err) => errors.push(err.to_graphql_error(Some(path.clone()))),
                    }
                }
                Err(err) => errors.push(err.to_graphql_error(Some(path.clone()))),
            }
        }

        Ok((value, errors))
    }

    /// Variables shared by every request of this fetch. Absent client
    /// variables are omitted so subgraph defaults apply; a missing state
    /// variable means the producing step failed.
    fn base_variables(fetch: &FetchNode, context: &Context) -> Result<Object, FetchError> {
        let mut variables = Object::default();
        for variable in &fetch.variables {
            match &variable.source {
                VariableSource::Client => {
                    if let Some(value) = context.request.variables.get(variable.name.as_str()) {
                        variables.insert(variable.name.as_str(), value.clone());
                    }
                }
                VariableSource::State { name } => {
                    let value = context.exports.get(name).ok_or_else(|| {
                        FetchError::DependentStepSkipped {
                            service: fetch.service_name.clone(),
                        }
                    })?;
                    variables.insert(variable.name.as_str(), value);
                }
                // bound per entity
                VariableSource::ParentField { .. } => {}
                // inlined at plan time
                VariableSource::Literal(_) => {}
            }
        }
        Ok(variables)
    }

    fn entity_variables(
        fetch: &FetchNode,
        base: &Object,
        entity: &Value,
    ) -> Result<Object, FetchError> {
        let mut variables = base.clone();
        for variable in &fetch.variables {
            if let VariableSource::ParentField { field } = &variable.source {
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
        }
        Ok(variables)
    }

    pub(super) fn unwrap_jump(
        data: Value,
        field: &str,
        service_name: &str,
    ) -> Result<Value, FetchError> {
        match data {
            Value::Object(mut object) => {
                object
                    .remove(field)
                    .ok_or_else(|| FetchError::ExecutionFieldNotFound {
                        field: field.to_string(),
                    })
            }
            Value::Null => Ok(Value::Null),
            _ => Err(FetchError::SubrequestMalformedResponse {
                service: service_name.to_string(),
                reason: "expected an object at the response root".to_string(),
            }),
        }
    }

    /// Publish exported values to the store once the fetch result is
    /// final. An export path over a list publishes one value per element,
    /// in request order.
    fn publish_exports(fetch: &FetchNode, data: &Value, context: &Context) {
        for export in &fetch.exports {
            data.select_values_and_paths(&export.path, |_path, value| {
                if !value.is_null() {
                    context
                        .exports
                        .publish(export.state_name.as_str(), value.clone());
                }
            });
        }
    }
}
