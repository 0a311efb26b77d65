use crate::prelude::graphql::*;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// A graphql response.
/// Used for federated and subgraph queries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(setter(into)))]
pub struct Response {
    /// The response data.
    #[serde(skip_serializing_if = "skip_data_if", default)]
    #[builder(default = Value::Object(Default::default()))]
    pub data: Value,

    /// The path that the data should be merged at.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    pub path: Option<Path>,

    /// The optional indicator that there may be more data to fetch.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    pub has_next: Option<bool>,

    /// The optional graphql errors encountered.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub errors: Vec<Error>,

    /// The optional graphql extensions.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    #[builder(default)]
    pub extensions: Object,
}

fn skip_data_if(value: &Value) -> bool {
    match value {
        Value::Object(o) => o.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

impl Response {
    /// append_errors default the errors `path` with the one provided.
    pub fn append_errors(&mut self, errors: &mut Vec<Error>) {
        self.errors.append(errors)
    }

    pub fn from_bytes(service_name: &str, b: Bytes) -> Result<Response, FetchError> {
        let value =
            Value::from_bytes(b).map_err(|error| FetchError::SubrequestMalformedResponse {
                service: service_name.to_string(),
                reason: error.to_string(),
            })?;

        let mut object = match value {
            Value::Object(o) => o,
            _ => {
                return Err(FetchError::SubrequestMalformedResponse {
                    service: service_name.to_string(),
                    reason: "expected a JSON object".to_string(),
                })
            }
        };

        let data = object.remove("data").unwrap_or_default();

        let errors = match object.remove("errors") {
            Some(Value::Array(v)) => v
                .into_iter()
                .map(|v| Error::from_value(service_name, v))
                .collect::<Result<Vec<Error>, FetchError>>()?,
            _ => Vec::new(),
        };

        let extensions = match object.remove("extensions") {
            Some(Value::Object(o)) => o,
            _ => Object::new(),
        };

        Ok(Response {
            data,
            path: None,
            has_next: None,
            errors,
            extensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json_bytes::json;

    #[test]
    fn test_response_from_bytes() {
        let body = serde_json::json!({
            "data": { "me": { "name": "ada" } },
            "errors": [{
                "message": "could not fetch name",
                "path": ["me", "name"],
            }],
        })
        .to_string();

        let response = Response::from_bytes("accounts", body.into()).unwrap();
        assert_eq!(response.data, json!({ "me": { "name": "ada" } }));
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].path, Some(Path::from("me/name")));
    }

    #[test]
    fn test_malformed_response() {
        let err = Response::from_bytes("accounts", Bytes::from_static(b"[1, 2]")).unwrap_err();
        assert!(matches!(
            err,
            FetchError::SubrequestMalformedResponse { service, .. } if service == "accounts"
        ));
    }

    #[test]
    fn test_append_errors() {
        let mut response = Response::builder().build();
        let mut errors = vec![Error {
            message: "boom".to_string(),
            ..Default::default()
        }];
        response.append_errors(&mut errors);
        assert_eq!(response.errors.len(), 1);
        assert!(errors.is_empty());
    }
}
