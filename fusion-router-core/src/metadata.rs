use crate::prelude::graphql::*;
use crate::query_planner::{PAGE_INFO_END_CURSOR, PAGE_INFO_HAS_NEXT};
use indexmap::{IndexMap, IndexSet};

/// The type name under which a connection's page-info selections resolve.
const PAGE_INFO_TYPE: &str = "PageInfo";

/// One subgraph able to resolve a composed field.
#[derive(Debug, Clone, PartialEq)]
pub struct SubgraphBinding {
    /// The subgraph name.
    pub subgraph: String,

    /// The field name as the subgraph knows it.
    pub field_name: String,

    /// The entity resolver used to jump into the parent entity when this
    /// binding is reached from another subgraph's result, if any.
    pub resolver: Option<String>,
}

/// Static metadata describing how to fetch an entity in a subgraph given a
/// set of required variables. Read-only, schema lifetime, shared across
/// requests.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverDefinition {
    pub id: String,

    /// The subgraph exposing the lookup field.
    pub subgraph: String,

    /// The entity type this resolver fetches.
    pub type_name: String,

    /// The lookup ("jump") field, e.g. `userById`.
    pub field_name: String,

    /// The logical requirement names this resolver needs bound.
    pub requires: IndexSet<String>,

    /// The declared type of each required argument.
    pub argument_types: IndexMap<String, FieldType>,
}

/// Metadata describing a connection field that the executor auto-pages.
#[derive(Debug, Clone, PartialEq)]
pub struct PagedConnectionDefinition {
    /// The field holding the list items, e.g. `nodes`.
    pub items_field: String,

    /// The field holding the page info object, e.g. `pageInfo`.
    pub page_info_field: String,

    /// The argument advancing the page, e.g. `after`.
    pub cursor_argument: String,

    /// The resolver used to re-enter the parent entity for follow-up pages.
    pub resolver: String,
}

/// The metadata oracle: a precomputed, immutable lookup table built once at
/// schema-composition time and injected read-only into the planner.
#[derive(Debug, Default)]
pub struct FusionMetadata {
    field_bindings: IndexMap<(String, String), Vec<SubgraphBinding>>,
    field_types: IndexMap<(String, String), FieldType>,
    possible_types: IndexMap<String, Vec<String>>,
    resolvers: IndexMap<String, ResolverDefinition>,
    local_type_names: IndexMap<(String, String), String>,
    exports: IndexMap<(String, String), String>,
    paged_connections: IndexMap<(String, String), PagedConnectionDefinition>,
    root_query_type: String,
    root_mutation_type: Option<String>,
}

impl FusionMetadata {
    pub fn builder() -> MetadataBuilder {
        MetadataBuilder::default()
    }

    /// The subgraphs able to resolve `type_name.field_name`, in metadata
    /// registration order. Registration order is the documented tie-break
    /// for the classifier's greedy choice.
    pub fn field_bindings(&self, type_name: &str, field_name: &str) -> &[SubgraphBinding] {
        self.field_bindings
            .get(&(type_name.to_string(), field_name.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or_default()
    }

    pub fn field_type(&self, type_name: &str, field_name: &str) -> Option<&FieldType> {
        self.field_types
            .get(&(type_name.to_string(), field_name.to_string()))
    }

    /// The concrete types an abstract type can take. Empty for concrete
    /// types.
    pub fn possible_types(&self, type_name: &str) -> &[String] {
        self.possible_types
            .get(type_name)
            .map(|v| v.as_slice())
            .unwrap_or_default()
    }

    pub fn is_abstract(&self, type_name: &str) -> bool {
        !self.possible_types(type_name).is_empty()
    }

    pub fn resolver(&self, id: &str) -> Option<&ResolverDefinition> {
        self.resolvers.get(id)
    }

    /// The entity resolver for `type_name` exposed by `subgraph`, if any.
    /// When several are registered, the first registered wins.
    pub fn entity_resolver(&self, subgraph: &str, type_name: &str) -> Option<&ResolverDefinition> {
        self.resolvers
            .values()
            .find(|resolver| resolver.subgraph == subgraph && resolver.type_name == type_name)
    }

    /// The name `subgraph` uses for the composite `type_name`. Types may be
    /// named differently per subgraph; falls back to the composite name.
    pub fn local_type_name<'a>(&'a self, subgraph: &str, type_name: &'a str) -> &'a str {
        self.local_type_names
            .get(&(subgraph.to_string(), type_name.to_string()))
            .map(|s| s.as_str())
            .unwrap_or(type_name)
    }

    /// The `@export`-style declaration for a field, if present: selecting
    /// the field publishes its value under the returned variable name.
    pub fn export_name(&self, type_name: &str, field_name: &str) -> Option<&str> {
        self.exports
            .get(&(type_name.to_string(), field_name.to_string()))
            .map(|s| s.as_str())
    }

    pub fn paged_connection(
        &self,
        type_name: &str,
        field_name: &str,
    ) -> Option<&PagedConnectionDefinition> {
        self.paged_connections
            .get(&(type_name.to_string(), field_name.to_string()))
    }

    pub fn root_type_name(&self, kind: OperationKind) -> Option<&str> {
        match kind {
            OperationKind::Query => Some(self.root_query_type.as_str()),
            OperationKind::Mutation => self.root_mutation_type.as_deref(),
            OperationKind::Subscription => None,
        }
    }
}

/// Builder used by the composition layer (and tests) to assemble the
/// lookup table.
#[derive(Debug, Default)]
pub struct MetadataBuilder {
    metadata: FusionMetadata,
}

impl MetadataBuilder {
    pub fn field(
        mut self,
        type_name: &str,
        field_name: &str,
        field_type: FieldType,
        bindings: Vec<SubgraphBinding>,
    ) -> Self {
        let key = (type_name.to_string(), field_name.to_string());
        self.metadata.field_types.insert(key.clone(), field_type);
        self.metadata
            .field_bindings
            .entry(key)
            .or_default()
            .extend(bindings);
        self
    }

    pub fn resolver(mut self, resolver: ResolverDefinition) -> Self {
        self.metadata
            .resolvers
            .insert(resolver.id.clone(), resolver);
        self
    }

    pub fn possible_types<T: Into<String>>(
        mut self,
        type_name: &str,
        concrete: impl IntoIterator<Item = T>,
    ) -> Self {
        self.metadata.possible_types.insert(
            type_name.to_string(),
            concrete.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn local_type_name(mut self, subgraph: &str, type_name: &str, local: &str) -> Self {
        self.metadata.local_type_names.insert(
            (subgraph.to_string(), type_name.to_string()),
            local.to_string(),
        );
        self
    }

    pub fn export(mut self, type_name: &str, field_name: &str, variable: &str) -> Self {
        self.metadata.exports.insert(
            (type_name.to_string(), field_name.to_string()),
            variable.to_string(),
        );
        self
    }

    pub fn paged_connection(
        mut self,
        type_name: &str,
        field_name: &str,
        definition: PagedConnectionDefinition,
    ) -> Self {
        self.metadata.paged_connections.insert(
            (type_name.to_string(), field_name.to_string()),
            definition,
        );
        self
    }

    pub fn root_mutation_type(mut self, type_name: &str) -> Self {
        self.metadata.root_mutation_type = Some(type_name.to_string());
        self
    }

    pub fn build(mut self) -> FusionMetadata {
        if self.metadata.root_query_type.is_empty() {
            self.metadata.root_query_type = "Query".to_string();
        }
        self.register_page_info_fields();
        self.metadata
    }

    /// A connection type resolves its configured page-info field even when
    /// the composition never registered it, so a client selecting it
    /// explicitly classifies the same way as the auto-injected selection.
    fn register_page_info_fields(&mut self) {
        let paged: Vec<((String, String), PagedConnectionDefinition)> = self
            .metadata
            .paged_connections
            .iter()
            .map(|(key, definition)| (key.clone(), definition.clone()))
            .collect();
        for ((parent_type, field_name), definition) in paged {
            let key = (parent_type, field_name);
            let connection_type = match self
                .metadata
                .field_types
                .get(&key)
                .and_then(|ty| ty.inner_type_name())
            {
                Some(name) => name.to_string(),
                None => continue,
            };
            let bindings = self
                .metadata
                .field_bindings
                .get(&key)
                .cloned()
                .unwrap_or_default();

            let page_info_key = (connection_type, definition.page_info_field.clone());
            if !self.metadata.field_types.contains_key(&page_info_key) {
                self.metadata
                    .field_types
                    .insert(page_info_key.clone(), FieldType::Named(PAGE_INFO_TYPE.to_string()));
                self.metadata.field_bindings.insert(
                    page_info_key,
                    bindings
                        .iter()
                        .map(|binding| {
                            SubgraphBinding::new(&binding.subgraph, &definition.page_info_field)
                        })
                        .collect(),
                );
            }
            for (subfield, ty) in [
                (
                    PAGE_INFO_HAS_NEXT,
                    FieldType::NonNull(Box::new(FieldType::Boolean)),
                ),
                (PAGE_INFO_END_CURSOR, FieldType::String),
            ] {
                let key = (PAGE_INFO_TYPE.to_string(), subfield.to_string());
                self.metadata.field_types.entry(key.clone()).or_insert(ty);
                let entry = self.metadata.field_bindings.entry(key).or_default();
                for binding in &bindings {
                    if !entry.iter().any(|known| known.subgraph == binding.subgraph) {
                        entry.push(SubgraphBinding::new(&binding.subgraph, subfield));
                    }
                }
            }
        }
    }
}

impl SubgraphBinding {
    pub fn new(subgraph: &str, field_name: &str) -> Self {
        Self {
            subgraph: subgraph.to_string(),
            field_name: field_name.to_string(),
            resolver: None,
        }
    }

    pub fn with_resolver(subgraph: &str, field_name: &str, resolver: &str) -> Self {
        Self {
            subgraph: subgraph.to_string(),
            field_name: field_name.to_string(),
            resolver: Some(resolver.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_lookup_preserves_registration_order() {
        let metadata = FusionMetadata::builder()
            .field(
                "Query",
                "products",
                FieldType::Named("Product".to_string()),
                vec![
                    SubgraphBinding::new("inventory", "products"),
                    SubgraphBinding::new("reviews", "products"),
                ],
            )
            .build();

        let bindings = metadata.field_bindings("Query", "products");
        assert_eq!(bindings[0].subgraph, "inventory");
        assert_eq!(bindings[1].subgraph, "reviews");
    }

    #[test]
    fn local_type_name_falls_back_to_composite_name() {
        let metadata = FusionMetadata::builder()
            .local_type_name("inventory", "Product", "InventoryProduct")
            .build();
        assert_eq!(
            metadata.local_type_name("inventory", "Product"),
            "InventoryProduct",
        );
        assert_eq!(metadata.local_type_name("reviews", "Product"), "Product");
    }

    #[test]
    fn paged_connections_resolve_their_page_info_field() {
        let metadata = FusionMetadata::builder()
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
            .build();

        assert_eq!(
            metadata.field_type("PostConnection", "pageInfo"),
            Some(&FieldType::Named("PageInfo".to_string())),
        );
        assert_eq!(
            metadata.field_bindings("PostConnection", "pageInfo")[0].subgraph,
            "social",
        );
        assert_eq!(
            metadata.field_type("PageInfo", "hasNextPage"),
            Some(&FieldType::NonNull(Box::new(FieldType::Boolean))),
        );
        assert_eq!(metadata.field_type("PageInfo", "endCursor"), Some(&FieldType::String));
        assert_eq!(
            metadata.field_bindings("PageInfo", "endCursor")[0].subgraph,
            "social",
        );
    }

    #[test]
    fn abstract_types_have_possible_types() {
        let metadata = FusionMetadata::builder()
            .possible_types("Pet", ["Cat", "Dog"])
            .build();
        assert!(metadata.is_abstract("Pet"));
        assert!(!metadata.is_abstract("Cat"));
        assert_eq!(metadata.possible_types("Pet"), ["Cat", "Dog"]);
    }
}
