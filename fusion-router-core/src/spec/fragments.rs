use apollo_parser::ast;
use std::collections::HashMap;

/// Fragment definitions of the document being parsed, keyed by name.
///
/// This is a parse-time structure only: spreads are expanded into inline
/// fragments while building the operation tree, so nothing in the parsed
/// [`Query`](crate::Query) refers back to it.
#[derive(Debug, Default)]
pub(crate) struct Fragments {
    map: HashMap<String, (String, ast::SelectionSet)>,
}

impl Fragments {
    pub(crate) fn from_ast(document: &ast::Document) -> Self {
        let map = document
            .definitions()
            .filter_map(|definition| match definition {
                // Spec: https://spec.graphql.org/draft/#FragmentDefinition
                ast::Definition::FragmentDefinition(fragment_definition) => {
                    let name = fragment_definition
                        .fragment_name()
                        .expect("the node FragmentName is not optional in the spec; qed")
                        .name()
                        .expect("the node Name is not optional in the spec; qed")
                        .text()
                        .to_string();
                    let type_condition = fragment_definition
                        .type_condition()
                        .expect("the node TypeCondition is not optional in the spec; qed")
                        .named_type()
                        .expect("the node NamedType is not optional in the spec; qed")
                        .name()
                        .expect("the node Name is not optional in the spec; qed")
                        .text()
                        .to_string();
                    let selection_set = fragment_definition
                        .selection_set()
                        .expect("the node SelectionSet is not optional in the spec; qed");

                    Some((name, (type_condition, selection_set)))
                }
                _ => None,
            })
            .collect();
        Self { map }
    }

    pub(crate) fn get(&self, name: &str) -> Option<(String, ast::SelectionSet)> {
        self.map.get(name).cloned()
    }
}
