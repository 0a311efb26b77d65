use crate::prelude::graphql::*;
use displaydoc::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for planning.
///
/// Planning errors are fatal to the request: execution never starts, and the
/// error is surfaced as a single top-level error.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlanError {
    /// could not resolve requirement '{name}' for subgraph '{subgraph}'
    ArgumentVariableExpected {
        /// The name of the unresolved requirement.
        name: String,

        /// The subgraph whose resolver requires it.
        subgraph: String,
    },

    /// the formatted selection set for subgraph '{subgraph}' is empty
    SelectionSetEmpty {
        /// The subgraph the document was formatted for.
        subgraph: String,
    },

    /// unknown field '{type_name}.{field_name}'
    UnknownField {
        type_name: String,
        field_name: String,
    },

    /// no subgraph can resolve field '{type_name}.{field_name}'
    NoSubgraphForField {
        type_name: String,
        field_name: String,
    },

    /// fragment '{name}' is not defined in the operation
    UnknownFragment { name: String },

    /// query parsing failed: {reason}
    ParseError { reason: String },

    /// operation '{name}' was not found in the document
    UnknownOperation { name: String },
}

impl PlanError {
    pub fn extension_code(&self) -> &'static str {
        match self {
            PlanError::ArgumentVariableExpected { .. } => "ARGUMENT_VARIABLE_EXPECTED",
            PlanError::SelectionSetEmpty { .. } => "SELECTION_SET_EMPTY",
            PlanError::UnknownField { .. } => "UNKNOWN_FIELD",
            PlanError::NoSubgraphForField { .. } => "NO_SUBGRAPH_FOR_FIELD",
            PlanError::UnknownFragment { .. } => "UNKNOWN_FRAGMENT",
            PlanError::ParseError { .. } => "GRAPHQL_PARSING_FAILED",
            PlanError::UnknownOperation { .. } => "UNKNOWN_OPERATION",
        }
    }

    /// Convert the plan error to a GraphQL error.
    pub fn to_graphql_error(&self) -> Error {
        let mut extensions = match serde_json_bytes::to_value(self) {
            Ok(Value::Object(object)) => object,
            _ => Object::default(),
        };
        extensions.insert("code", Value::String(self.extension_code().into()));
        Error {
            message: self.to_string(),
            locations: Default::default(),
            path: None,
            extensions,
        }
    }

    /// Convert the error to a response that never reached execution.
    pub fn to_response(&self) -> Response {
        Response::builder()
            .errors(vec![self.to_graphql_error()])
            .build()
    }
}

/// Error types for execution.
///
/// Note that these are not actually returned to the client, but are instead
/// converted to JSON for [`struct@Error`].
#[derive(Error, Display, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[ignore_extra_doc_attributes]
#[serde(tag = "type")]
pub enum FetchError {
    /// query references unknown subgraph '{service}'
    ValidationUnknownServiceError {
        /// The subgraph that was unknown.
        service: String,
    },

    /// subgraph fetch failed from '{service}': {reason}
    ///
    /// Note that this relates to a transport error and not a GraphQL error.
    SubrequestHttpError {
        /// The subgraph that failed.
        service: String,

        /// The reason the fetch failed.
        reason: String,
    },

    /// subgraph '{service}' response was malformed: {reason}
    SubrequestMalformedResponse {
        /// The subgraph that responded with the malformed response.
        service: String,

        /// The reason the deserialization failed.
        reason: String,
    },

    /// exported variable '{name}' cannot be serialized to the declared type '{ty}'
    BatchVariableSerialize {
        /// Name of the target variable.
        name: String,

        /// The declared type of the target variable.
        ty: String,
    },

    /// exported object for variable '{name}' cannot be mapped to the declared type '{ty}'
    BatchAutoMapVariableType {
        /// Name of the target variable.
        name: String,

        /// The declared type of the target variable.
        ty: String,
    },

    /// subquery requires field '{field}' but it was not found in the current response
    ExecutionFieldNotFound {
        /// The field that is not found.
        field: String,
    },

    /// invalid content: {reason}
    ExecutionInvalidContent { reason: String },

    /// could not find path: {reason}
    ExecutionPathNotFound { reason: String },

    /// step depending on subgraph '{service}' was skipped because its parent produced no data
    DependentStepSkipped {
        /// The subgraph the skipped step was bound to.
        service: String,
    },

    /// request was cancelled
    Cancelled,

    /// an unexpected error occurred
    ///
    /// Internal details are deliberately withheld from the client.
    UnexpectedError,
}

impl FetchError {
    pub fn extension_code(&self) -> &'static str {
        match self {
            FetchError::ValidationUnknownServiceError { .. } => "UNKNOWN_SUBGRAPH",
            FetchError::SubrequestHttpError { .. } => "SUBREQUEST_HTTP_ERROR",
            FetchError::SubrequestMalformedResponse { .. } => "SUBREQUEST_MALFORMED_RESPONSE",
            FetchError::BatchVariableSerialize { .. } => "BATCH_VAR_SERIALIZE",
            FetchError::BatchAutoMapVariableType { .. } => "BATCH_AUTO_MAP_VAR_TYPE",
            FetchError::ExecutionFieldNotFound { .. } => "FIELD_NOT_FOUND",
            FetchError::ExecutionInvalidContent { .. } => "INVALID_CONTENT",
            FetchError::ExecutionPathNotFound { .. } => "PATH_NOT_FOUND",
            FetchError::DependentStepSkipped { .. } => "DEPENDENT_STEP_SKIPPED",
            FetchError::Cancelled => "REQUEST_CANCELLED",
            FetchError::UnexpectedError => "UNEXPECTED_ERROR",
        }
    }

    /// Convert the fetch error to a GraphQL error.
    pub fn to_graphql_error(&self, path: Option<Path>) -> Error {
        let mut extensions = match serde_json_bytes::to_value(self) {
            Ok(Value::Object(object)) => object,
            _ => Object::default(),
        };
        extensions.insert("code", Value::String(self.extension_code().into()));
        Error {
            message: self.to_string(),
            locations: Default::default(),
            path,
            extensions,
        }
    }

    /// Convert the error to an appropriate response envelope.
    pub fn to_response(&self) -> Response {
        Response::builder()
            .errors(vec![self.to_graphql_error(None)])
            .build()
    }
}

impl From<PlanError> for FetchError {
    fn from(err: PlanError) -> Self {
        FetchError::ExecutionInvalidContent {
            reason: err.to_string(),
        }
    }
}

/// Any error.
#[derive(Error, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[error("{message}")]
#[serde(rename_all = "camelCase")]
pub struct Error {
    /// The error message.
    pub message: String,

    /// The locations of the error from the originating request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,

    /// The path of the error, relative to the original client operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,

    /// The optional graphql extensions; always carries a stable `code`.
    #[serde(default, skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

impl Error {
    /// Rebase the error path by prefixing the splice path of the step that
    /// produced it, so the client sees locations relative to the original
    /// query rather than the internal sub-document.
    pub fn rebase(mut self, prefix: &Path) -> Self {
        self.path = Some(match self.path.take() {
            Some(path) => prefix.join(path),
            None => prefix.clone(),
        });
        self
    }

    pub(crate) fn from_value(service_name: &str, value: Value) -> Result<Error, FetchError> {
        serde_json_bytes::from_value(value).map_err(|error| {
            FetchError::SubrequestMalformedResponse {
                service: service_name.to_string(),
                reason: error.to_string(),
            }
        })
    }
}

/// A location in the request that triggered a graphql error.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// The line number.
    pub line: i32,

    /// The column number.
    pub column: i32,
}
