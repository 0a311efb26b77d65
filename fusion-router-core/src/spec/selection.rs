use crate::prelude::graphql::*;
use crate::spec::fragments::Fragments;
use apollo_parser::ast;

const MAX_FRAGMENT_DEPTH: usize = 128;

/// A selection of the client operation, after fragment-spread expansion.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Selection {
    Field(FieldSelection),
    InlineFragment(InlineFragmentSelection),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FieldSelection {
    /// The composed-schema field name.
    pub(crate) name: String,

    /// The client-requested alias, if any.
    pub(crate) alias: Option<String>,

    pub(crate) arguments: Vec<Argument>,

    pub(crate) include_skip: IncludeSkip,

    /// `None` for leaf fields.
    pub(crate) selection_set: Option<Vec<Selection>>,

    pub(crate) field_type: FieldType,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct InlineFragmentSelection {
    pub(crate) type_condition: String,
    pub(crate) include_skip: IncludeSkip,
    pub(crate) selection_set: Vec<Selection>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Argument {
    pub(crate) name: String,
    pub(crate) value: ArgumentValue,
}

/// An argument value: either a reference to a client operation variable or
/// an already-coerced literal.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ArgumentValue {
    Variable(String),
    Value(Value),
}

impl FieldSelection {
    /// The key under which the field appears in the response.
    pub(crate) fn response_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub(crate) fn is_introspection(&self) -> bool {
        self.name.starts_with("__")
    }

    pub(crate) fn argument(&self, name: &str) -> Option<&ArgumentValue> {
        self.arguments
            .iter()
            .find(|argument| argument.name == name)
            .map(|argument| &argument.value)
    }
}

impl Selection {
    pub(crate) fn from_ast(
        selection: ast::Selection,
        current_type: &str,
        metadata: &FusionMetadata,
        fragments: &Fragments,
        depth: usize,
    ) -> Result<Option<Self>, PlanError> {
        if depth > MAX_FRAGMENT_DEPTH {
            return Err(PlanError::ParseError {
                reason: "fragment nesting is too deep".to_string(),
            });
        }
        match selection {
            // Spec: https://spec.graphql.org/draft/#Field
            ast::Selection::Field(field) => {
                let name = field
                    .name()
                    .expect("the node Name is not optional in the spec; qed")
                    .text()
                    .to_string();
                let alias = field.alias().map(|alias| {
                    alias
                        .name()
                        .expect("the node Name is not optional in the spec; qed")
                        .text()
                        .to_string()
                });

                let include_skip = IncludeSkip::parse(field.directives());
                if include_skip.statically_skipped() {
                    return Ok(None);
                }

                let field_type = if name.starts_with("__") {
                    FieldType::Introspection(name.clone())
                } else {
                    metadata
                        .field_type(current_type, &name)
                        .cloned()
                        .ok_or_else(|| PlanError::UnknownField {
                            type_name: current_type.to_string(),
                            field_name: name.clone(),
                        })?
                };

                let arguments = field
                    .arguments()
                    .iter()
                    .flat_map(|x| x.arguments())
                    .map(|argument| {
                        let name = argument
                            .name()
                            .expect("the node Name is not optional in the spec; qed")
                            .text()
                            .to_string();
                        let value = argument
                            .value()
                            .map(|value| ArgumentValue::from_ast(&value))
                            .unwrap_or(ArgumentValue::Value(Value::Null));
                        Argument { name, value }
                    })
                    .collect();

                let selection_set = match (field_type.inner_type_name(), field.selection_set()) {
                    (Some(inner_type), Some(selection_set))
                        if !matches!(field_type, FieldType::Introspection(_)) =>
                    {
                        Some(parse_selection_set(
                            selection_set,
                            inner_type,
                            metadata,
                            fragments,
                            depth + 1,
                        )?)
                    }
                    _ => None,
                };

                Ok(Some(Self::Field(FieldSelection {
                    name,
                    alias,
                    arguments,
                    include_skip,
                    selection_set,
                    field_type,
                })))
            }
            // Spec: https://spec.graphql.org/draft/#InlineFragment
            ast::Selection::InlineFragment(inline_fragment) => {
                let include_skip = IncludeSkip::parse(inline_fragment.directives());
                if include_skip.statically_skipped() {
                    return Ok(None);
                }

                let type_condition = inline_fragment
                    .type_condition()
                    .map(|condition| {
                        condition
                            .named_type()
                            .expect("the node NamedType is not optional in the spec; qed")
                            .name()
                            .expect("the node Name is not optional in the spec; qed")
                            .text()
                            .to_string()
                    })
                    .unwrap_or_else(|| current_type.to_string());

                let selection_set = parse_selection_set(
                    inline_fragment
                        .selection_set()
                        .expect("the node SelectionSet is not optional in the spec; qed"),
                    &type_condition,
                    metadata,
                    fragments,
                    depth + 1,
                )?;

                Ok(Some(Self::InlineFragment(InlineFragmentSelection {
                    type_condition,
                    include_skip,
                    selection_set,
                })))
            }
            // Spec: https://spec.graphql.org/draft/#FragmentSpread
            //
            // Spreads are expanded into inline fragments at parse time, so
            // the classifier only ever sees a concrete selection tree.
            ast::Selection::FragmentSpread(fragment_spread) => {
                let include_skip = IncludeSkip::parse(fragment_spread.directives());
                if include_skip.statically_skipped() {
                    return Ok(None);
                }

                let name = fragment_spread
                    .fragment_name()
                    .expect("the node FragmentName is not optional in the spec; qed")
                    .name()
                    .expect("the node Name is not optional in the spec; qed")
                    .text()
                    .to_string();

                let (type_condition, selection_set) = fragments
                    .get(&name)
                    .ok_or(PlanError::UnknownFragment { name: name.clone() })?;

                let selection_set = parse_selection_set(
                    selection_set,
                    &type_condition,
                    metadata,
                    fragments,
                    depth + 1,
                )?;

                Ok(Some(Self::InlineFragment(InlineFragmentSelection {
                    type_condition,
                    include_skip,
                    selection_set,
                })))
            }
        }
    }
}

pub(crate) fn parse_selection_set(
    selection_set: ast::SelectionSet,
    current_type: &str,
    metadata: &FusionMetadata,
    fragments: &Fragments,
    depth: usize,
) -> Result<Vec<Selection>, PlanError> {
    let mut selections = Vec::new();
    for selection in selection_set.selections() {
        if let Some(selection) =
            Selection::from_ast(selection, current_type, metadata, fragments, depth)?
        {
            selections.push(selection);
        }
    }
    Ok(selections)
}

impl ArgumentValue {
    pub(crate) fn from_ast(value: &ast::Value) -> Self {
        match value {
            ast::Value::Variable(variable) => ArgumentValue::Variable(
                variable
                    .name()
                    .expect("the node Name is not optional in the spec; qed")
                    .text()
                    .to_string(),
            ),
            other => ArgumentValue::Value(parse_value(other).unwrap_or(Value::Null)),
        }
    }
}

pub(crate) fn parse_value(value: &ast::Value) -> Option<Value> {
    match value {
        ast::Value::Variable(_) => None,
        ast::Value::StringValue(s) => {
            let raw = s.to_string();
            let raw = raw.trim();
            let unquoted = raw
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .unwrap_or(raw);
            Some(Value::String(unquoted.to_string().into()))
        }
        ast::Value::FloatValue(f) => f.to_string().trim().parse::<f64>().ok().map(Into::into),
        ast::Value::IntValue(i) => {
            let s = i.to_string();
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .map(Into::into)
                .or_else(|| s.parse::<u64>().ok().map(Into::into))
        }
        ast::Value::BooleanValue(b) => {
            match (b.true_token().is_some(), b.false_token().is_some()) {
                (true, false) => Some(Value::Bool(true)),
                (false, true) => Some(Value::Bool(false)),
                _ => None,
            }
        }
        ast::Value::NullValue(_) => Some(Value::Null),
        ast::Value::EnumValue(e) => e.name().map(|n| n.text().to_string().into()),
        ast::Value::ListValue(l) => l
            .values()
            .map(|v| parse_value(&v))
            .collect::<Option<_>>()
            .map(Value::Array),
        ast::Value::ObjectValue(o) => o
            .object_fields()
            .map(|field| match (field.name(), field.value()) {
                (Some(name), Some(value)) => {
                    parse_value(&value).map(|v| (name.text().to_string().into(), v))
                }
                _ => None,
            })
            .collect::<Option<_>>()
            .map(Value::Object),
    }
}

/// The `@skip`/`@include` state of a selection.
///
/// Literal conditions are evaluated at plan-build time; variable conditions
/// must be preserved in the synthesized document so the subgraph re-evaluates
/// them at execution time.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IncludeSkip {
    include: Condition,
    skip: Condition,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Condition {
    Yes,
    No,
    Variable(String),
}

impl IncludeSkip {
    pub(crate) fn parse(directives: Option<ast::Directives>) -> Self {
        let mut include = None;
        let mut skip = None;
        for directive in directives.iter().flat_map(|x| x.directives()) {
            let name = directive
                .name()
                .map(|name| name.text().to_string())
                .unwrap_or_default();
            if include.is_none() && name == "include" {
                include = Condition::parse(&directive);
            }
            if skip.is_none() && name == "skip" {
                skip = Condition::parse(&directive);
            }
        }
        Self {
            include: include.unwrap_or(Condition::Yes),
            skip: skip.unwrap_or(Condition::No),
        }
    }

    pub(crate) fn passthrough() -> Self {
        Self {
            include: Condition::Yes,
            skip: Condition::No,
        }
    }

    /// A literal `@skip(if: true)` or `@include(if: false)` eliminates the
    /// selection at plan-build time.
    pub(crate) fn statically_skipped(&self) -> bool {
        matches!(self.skip, Condition::Yes) || matches!(self.include, Condition::No)
    }

    /// The variables the conditions depend on; these must be forwarded to
    /// the subgraph even when the underlying field did not need them.
    pub(crate) fn variables(&self) -> impl Iterator<Item = &str> {
        self.skip
            .variable()
            .into_iter()
            .chain(self.include.variable())
    }

    pub(crate) fn skip_condition(&self) -> &Condition {
        &self.skip
    }

    pub(crate) fn include_condition(&self) -> &Condition {
        &self.include
    }

    pub(crate) fn is_passthrough(&self) -> bool {
        matches!(self.include, Condition::Yes) && matches!(self.skip, Condition::No)
    }
}

impl Condition {
    fn parse(directive: &ast::Directive) -> Option<Self> {
        let value = directive
            .arguments()?
            .arguments()
            .find(|argument| {
                argument
                    .name()
                    .map(|name| name.text() == "if")
                    .unwrap_or_default()
            })?
            .value()?;
        match value {
            ast::Value::Variable(variable) => Some(Condition::Variable(
                variable
                    .name()
                    .expect("the node Name is not optional in the spec; qed")
                    .text()
                    .to_string(),
            )),
            ast::Value::BooleanValue(boolean) => {
                match (boolean.true_token().is_some(), boolean.false_token().is_some()) {
                    (true, false) => Some(Condition::Yes),
                    (false, true) => Some(Condition::No),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    pub(crate) fn variable(&self) -> Option<&str> {
        match self {
            Condition::Variable(name) => Some(name.as_str()),
            _ => None,
        }
    }
}
