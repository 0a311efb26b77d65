//! Turns a parsed client operation into an executable query plan.
//!
//! Planning runs in three passes over immutable metadata: the classifier
//! partitions the selection tree into per-subgraph execution steps, the
//! requirement resolver binds every entity resolver argument to a value
//! source, and the builder formats one sub-operation per step and arranges
//! the steps into dependency generations.

mod builder;
mod classifier;
mod formatter;
mod requirements;

use crate::prelude::graphql::*;
use std::collections::HashSet;
use std::sync::Arc;

pub(crate) use classifier::Classifier;
pub(crate) use formatter::{PAGE_INFO_END_CURSOR, PAGE_INFO_HAS_NEXT};
pub(crate) use requirements::VariableSource;

/// Builds query plans against one composed schema's metadata.
#[derive(Debug, Clone)]
pub struct QueryPlanner {
    metadata: Arc<FusionMetadata>,
}

impl QueryPlanner {
    pub fn new(metadata: Arc<FusionMetadata>) -> Self {
        Self { metadata }
    }

    pub fn metadata(&self) -> &Arc<FusionMetadata> {
        &self.metadata
    }

    #[tracing::instrument(skip_all, level = "debug", name = "plan")]
    pub fn build_query_plan(
        &self,
        query: &Query,
        operation_name: Option<&str>,
    ) -> Result<QueryPlan, PlanError> {
        let operation = query.operation(operation_name)?;
        let mut steps = Classifier::classify(operation, &self.metadata)?;
        let requirements =
            requirements::resolve_requirements(&mut steps, operation, &self.metadata)?;
        builder::build_plan(&steps, &requirements, operation, &self.metadata)
    }
}

/// The executable plan for one client operation.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub root: PlanNode,

    /// The composite root type name, used to answer `__typename` locally.
    pub(crate) root_type_name: String,

    /// Response names of root `__typename` selections answered locally.
    pub(crate) typename_fields: Vec<String>,

    /// Response names of `__schema` / `__type` selections, which this
    /// router does not serve.
    pub(crate) unsupported_introspection: Vec<String>,
}

/// Query plan nodes, composed recursively.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanNode {
    /// Children run one after the other.
    Sequence { nodes: Vec<PlanNode> },

    /// Children run concurrently.
    Parallel { nodes: Vec<PlanNode> },

    /// One subgraph request.
    Fetch(FetchNode),

    /// Runs its child against every value at `path` in the result
    /// assembled so far.
    Flatten(FlattenNode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlattenNode {
    /// The absolute splice path, with `@` over list positions.
    pub(crate) path: Path,

    pub(crate) node: Box<PlanNode>,
}

/// A single subgraph request, with everything the executor needs to bind
/// its variables, splice its response, and page its connections.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchNode {
    pub(crate) id: String,

    pub(crate) service_name: String,

    /// The rendered sub-operation.
    pub(crate) operation: String,

    pub(crate) operation_kind: OperationKind,

    /// Every variable the sub-operation declares, with its value source.
    pub(crate) variables: Vec<FetchVariable>,

    /// Whether the request is issued once per parent entity found at the
    /// splice path instead of once overall.
    pub(crate) requires_parent: bool,

    /// The jump field to strip from the response before splicing.
    pub(crate) unwrap: Option<String>,

    /// Values to publish to the export store after the response merges.
    pub(crate) exports: Vec<ExportBinding>,

    /// Connections the executor pages to exhaustion after the first
    /// response.
    pub(crate) paging: Vec<PagingConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FetchVariable {
    pub(crate) name: String,
    pub(crate) source: VariableSource,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ExportBinding {
    /// The step-scoped state variable name dependent fetches read.
    pub(crate) state_name: String,

    /// The declared export name, used for batch variable injection.
    pub(crate) logical_name: String,

    /// Where the value sits in the fetch result, relative to its splice
    /// point.
    pub(crate) path: Path,

    pub(crate) ty: FieldType,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PagingConfig {
    /// Path from the fetch result's splice point to each entity owning
    /// the connection.
    pub(crate) entity_path: Path,

    /// The connection field's response name on the entity.
    pub(crate) connection_field: String,

    /// The items field's response name inside the connection.
    pub(crate) items_field: String,

    /// The page info field name inside the connection. Always selected
    /// unaliased.
    pub(crate) page_info_field: String,

    /// The re-entry sub-operation fetching one follow-up page.
    pub(crate) operation: String,

    /// Per-entity variables of the re-entry operation, cursor excluded.
    pub(crate) variables: Vec<FetchVariable>,

    pub(crate) cursor_variable: String,

    /// The jump field's response name to strip from each page response.
    pub(crate) unwrap: String,
}

impl QueryPlan {
    /// Validate the plan's service names against the registry before
    /// execution starts.
    pub fn validate(&self, registry: &ServiceRegistry) -> Result<(), Response> {
        let mut errors = Vec::new();
        for service in self.root.service_usage() {
            if !registry.has(service) {
                errors.push(
                    FetchError::ValidationUnknownServiceError {
                        service: service.to_string(),
                    }
                    .to_graphql_error(None),
                );
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Response::builder().errors(errors).build())
        }
    }

    pub fn contains_mutations(&self) -> bool {
        self.root.contains_mutations()
    }

    /// Every export binding declared by the plan's fetch nodes.
    pub(crate) fn export_bindings(&self) -> Vec<&ExportBinding> {
        let mut bindings = Vec::new();
        self.root.collect_exports(&mut bindings);
        bindings
    }
}

impl PlanNode {
    /// The names of the services this plan will fetch from, deduplicated.
    pub fn service_usage(&self) -> impl Iterator<Item = &str> {
        let mut services = Vec::new();
        let mut seen = HashSet::new();
        self.collect_services(&mut services, &mut seen);
        services.into_iter()
    }

    fn collect_services<'a>(
        &'a self,
        services: &mut Vec<&'a str>,
        seen: &mut HashSet<&'a str>,
    ) {
        match self {
            Self::Sequence { nodes } | Self::Parallel { nodes } => {
                for node in nodes {
                    node.collect_services(services, seen);
                }
            }
            Self::Flatten(flatten) => flatten.node.collect_services(services, seen),
            Self::Fetch(fetch) => {
                if seen.insert(fetch.service_name.as_str()) {
                    services.push(fetch.service_name.as_str());
                }
            }
        }
    }

    pub fn contains_mutations(&self) -> bool {
        match self {
            Self::Sequence { nodes } | Self::Parallel { nodes } => {
                nodes.iter().any(|node| node.contains_mutations())
            }
            Self::Flatten(flatten) => flatten.node.contains_mutations(),
            Self::Fetch(fetch) => fetch.operation_kind == OperationKind::Mutation,
        }
    }

    fn collect_exports<'a>(&'a self, out: &mut Vec<&'a ExportBinding>) {
        match self {
            Self::Sequence { nodes } | Self::Parallel { nodes } => {
                for node in nodes {
                    node.collect_exports(out);
                }
            }
            Self::Flatten(flatten) => flatten.node.collect_exports(out),
            Self::Fetch(fetch) => out.extend(fetch.exports.iter()),
        }
    }
}
