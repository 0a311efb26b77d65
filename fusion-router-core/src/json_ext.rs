use crate::prelude::graphql::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A JSON object.
pub type Object = serde_json_bytes::Map<serde_json_bytes::ByteString, Value>;

pub use serde_json_bytes::ByteString;
pub use serde_json_bytes::Value;

const FLATTEN_TOKEN: &str = "@";

/// A path element for a [`Path`].
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// A path element that given an array will flatmap the content.
    #[serde(
        deserialize_with = "deserialize_flatten",
        serialize_with = "serialize_flatten"
    )]
    Flatten,

    /// An index path element.
    Index(usize),

    /// A key path element.
    Key(String),
}

fn deserialize_flatten<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserializer.deserialize_str(FlattenVisitor)
}

struct FlattenVisitor;

impl<'de> serde::de::Visitor<'de> for FlattenVisitor {
    type Value = ();

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "a string that is '{}'", FLATTEN_TOKEN)
    }

    fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        if s == FLATTEN_TOKEN {
            Ok(())
        } else {
            Err(serde::de::Error::custom(format!(
                "expected '{}'",
                FLATTEN_TOKEN
            )))
        }
    }
}

fn serialize_flatten<S>(serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(FLATTEN_TOKEN)
}

/// A path into the result document where a partial value is spliced.
///
/// This can be composed of strings and numbers, e.g. `/books/3/name`.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Path {
        Path(Default::default())
    }

    pub fn from_slice<T: AsRef<str>>(s: &[T]) -> Self {
        Self(
            s.iter()
                .map(|x| x.as_ref())
                .map(|s| {
                    if let Ok(index) = s.parse::<usize>() {
                        PathElement::Index(index)
                    } else if s == FLATTEN_TOKEN {
                        PathElement::Flatten
                    } else {
                        PathElement::Key(s.to_string())
                    }
                })
                .collect(),
        )
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PathElement> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn parent(&self) -> Option<Path> {
        if self.is_empty() {
            None
        } else {
            Some(Path(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn join(&self, other: impl AsRef<Self>) -> Self {
        let other = other.as_ref();
        let mut new = Vec::with_capacity(self.0.len() + other.0.len());
        new.extend(self.0.iter().cloned());
        new.extend(other.0.iter().cloned());
        Path(new)
    }

    pub fn push(&mut self, element: PathElement) {
        self.0.push(element)
    }
}

impl AsRef<Path> for Path {
    fn as_ref(&self) -> &Path {
        self
    }
}

impl<T> From<T> for Path
where
    T: AsRef<str>,
{
    fn from(s: T) -> Self {
        Self(
            s.as_ref()
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| {
                    if let Ok(index) = s.parse::<usize>() {
                        PathElement::Index(index)
                    } else if s == FLATTEN_TOKEN {
                        PathElement::Flatten
                    } else {
                        PathElement::Key(s.to_string())
                    }
                })
                .collect(),
        )
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for element in self.iter() {
            write!(f, "/")?;
            match element {
                PathElement::Index(index) => write!(f, "{}", index)?,
                PathElement::Key(key) => write!(f, "{}", key)?,
                PathElement::Flatten => write!(f, "{}", FLATTEN_TOKEN)?,
            }
        }
        Ok(())
    }
}

/// Extension trait for the opaque JSON tree the planner and executor work on.
pub trait ValueExt {
    /// Build a tree of objects that nests `value` at `path`.
    fn from_path(path: &Path, value: Value) -> Value;

    /// Deep merge the provided value into `self`.
    ///
    /// Objects merge key by key, arrays index by index. Index alignment
    /// assumes the subgraph preserved the requested order.
    fn deep_merge(&mut self, other: Value);

    /// Call `f` with every value selected by `path`, together with the
    /// concrete (flattened) path where it was found. Missing keys are
    /// skipped, they are not an error at this layer.
    fn select_values_and_paths<'a, F>(&'a self, path: &Path, f: F)
    where
        F: FnMut(Path, &'a Value);

    /// Insert `value` at `path`, creating the intermediate containers.
    fn insert(&mut self, path: &Path, value: Value) -> Result<(), FetchError>;

    /// Get the single value at `path`.
    fn get_path<'a>(&'a self, path: &Path) -> Result<&'a Value, FetchError>;
}

impl ValueExt for Value {
    fn from_path(path: &Path, value: Value) -> Value {
        path.iter().rev().fold(value, |acc, element| match element {
            PathElement::Key(key) => {
                let mut object = Object::default();
                object.insert(key.as_str(), acc);
                Value::Object(object)
            }
            PathElement::Index(index) => {
                let mut array = vec![Value::Null; *index];
                array.push(acc);
                Value::Array(array)
            }
            PathElement::Flatten => Value::Array(vec![acc]),
        })
    }

    fn deep_merge(&mut self, other: Value) {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => {
                for (key, value) in b.into_iter() {
                    match a.get_mut(&key) {
                        Some(current) => current.deep_merge(value),
                        None => {
                            a.insert(key, value);
                        }
                    }
                }
            }
            (Value::Array(a), Value::Array(b)) => {
                for (current, value) in a.iter_mut().zip(b.into_iter()) {
                    current.deep_merge(value);
                }
            }
            (_, Value::Null) => {}
            (a @ Value::Object(_), other) => {
                failfast_debug!("trying to replace an object with {:?}", other);
                if !other.is_null() {
                    *a = other;
                }
            }
            (a, other) => {
                *a = other;
            }
        }
    }

    fn select_values_and_paths<'a, F>(&'a self, path: &Path, mut f: F)
    where
        F: FnMut(Path, &'a Value),
    {
        iterate_path(&Path::empty(), &path.0, self, &mut f)
    }

    fn insert(&mut self, path: &Path, value: Value) -> Result<(), FetchError> {
        let mut current = self;

        for element in path.iter() {
            match element {
                PathElement::Flatten => {
                    return Err(FetchError::ExecutionInvalidContent {
                        reason: "cannot insert under a flatten path element".to_string(),
                    });
                }
                PathElement::Index(index) => {
                    if current.is_null() {
                        *current = Value::Array(vec![Value::Null; index + 1]);
                    }
                    match current.as_array_mut() {
                        Some(array) => {
                            if array.len() <= *index {
                                array.resize(index + 1, Value::Null);
                            }
                            current = &mut array[*index];
                        }
                        None => {
                            return Err(FetchError::ExecutionInvalidContent {
                                reason: "expected an array".to_string(),
                            });
                        }
                    }
                }
                PathElement::Key(key) => {
                    if current.is_null() {
                        *current = Value::Object(Object::default());
                    }
                    match current.as_object_mut() {
                        Some(object) => {
                            current = object
                                .entry(key.as_str())
                                .or_insert(Value::Null);
                        }
                        None => {
                            return Err(FetchError::ExecutionInvalidContent {
                                reason: "expected an object".to_string(),
                            });
                        }
                    }
                }
            }
        }

        current.deep_merge(value);
        Ok(())
    }

    fn get_path<'a>(&'a self, path: &Path) -> Result<&'a Value, FetchError> {
        let mut current = self;
        for element in path.iter() {
            current = match element {
                PathElement::Flatten => {
                    return Err(FetchError::ExecutionPathNotFound {
                        reason: "a flatten path element selects multiple values".to_string(),
                    });
                }
                PathElement::Index(index) => current.as_array().and_then(|a| a.get(*index)).ok_or(
                    FetchError::ExecutionPathNotFound {
                        reason: format!("index {} not found", index),
                    },
                )?,
                PathElement::Key(key) => current.as_object().and_then(|o| o.get(key.as_str())).ok_or(
                    FetchError::ExecutionPathNotFound {
                        reason: format!("key {} not found", key),
                    },
                )?,
            };
        }
        Ok(current)
    }
}

fn iterate_path<'a, F>(parent: &Path, path: &[PathElement], data: &'a Value, f: &mut F)
where
    F: FnMut(Path, &'a Value),
{
    match path.get(0) {
        None => f(parent.clone(), data),
        Some(PathElement::Flatten) => {
            if let Some(array) = data.as_array() {
                for (i, value) in array.iter().enumerate() {
                    iterate_path(
                        &parent.join(Path(vec![PathElement::Index(i)])),
                        &path[1..],
                        value,
                        f,
                    );
                }
            }
        }
        Some(PathElement::Index(i)) => {
            if let Value::Array(array) = data {
                if let Some(value) = array.get(*i) {
                    iterate_path(
                        &parent.join(Path(vec![PathElement::Index(*i)])),
                        &path[1..],
                        value,
                        f,
                    );
                }
            }
        }
        Some(PathElement::Key(k)) => {
            if let Value::Object(object) = data {
                if let Some(value) = object.get(k.as_str()) {
                    iterate_path(
                        &parent.join(Path(vec![PathElement::Key(k.clone())])),
                        &path[1..],
                        value,
                        f,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json_bytes::json;

    #[test]
    fn path_from_str() {
        assert_eq!(
            Path::from("users/@/friends/3/name"),
            Path(vec![
                PathElement::Key("users".to_string()),
                PathElement::Flatten,
                PathElement::Key("friends".to_string()),
                PathElement::Index(3),
                PathElement::Key("name".to_string()),
            ]),
        );
    }

    #[test]
    fn path_serialization() {
        let path = Path::from("users/@/friends/3");
        assert_eq!(
            serde_json::to_value(&path).unwrap(),
            serde_json::json!(["users", "@", "friends", 3]),
        );
        let back: Path = serde_json::from_value(serde_json::json!(["users", "@", "friends", 3]))
            .unwrap();
        assert_eq!(back, path);
    }

    #[test]
    fn deep_merge_objects() {
        let mut a = json!({"a": {"b": 1}, "c": [{"x": 1}, {"x": 2}]});
        a.deep_merge(json!({"a": {"d": 2}, "c": [{"y": 10}, {"y": 20}]}));
        assert_eq!(
            a,
            json!({"a": {"b": 1, "d": 2}, "c": [{"x": 1, "y": 10}, {"x": 2, "y": 20}]}),
        );
    }

    #[test]
    fn deep_merge_ignores_null() {
        let mut a = json!({"a": 1});
        a.deep_merge(json!({"a": null}));
        assert_eq!(a, json!({"a": 1}));
    }

    #[test]
    fn insert_at_path_creates_containers() {
        let mut value = Value::default();
        value
            .insert(&Path::from("users/1/name"), json!("ada"))
            .unwrap();
        assert_eq!(value, json!({"users": [null, {"name": "ada"}]}));
    }

    #[test]
    fn select_values_flattens_arrays() {
        let data = json!({"users": [{"id": 1}, {"id": 2}]});
        let mut paths = Vec::new();
        let mut values = Vec::new();
        data.select_values_and_paths(&Path::from("users/@"), |path, value| {
            paths.push(path);
            values.push(value.clone());
        });
        assert_eq!(
            paths,
            vec![Path::from("users/0"), Path::from("users/1")],
        );
        assert_eq!(values, vec![json!({"id": 1}), json!({"id": 2})]);
    }

    #[test]
    fn select_values_skips_missing_keys() {
        let data = json!({"users": [{"id": 1}, {"other": 2}]});
        let mut seen = Vec::new();
        data.select_values_and_paths(&Path::from("users/@/id"), |path, _value| {
            seen.push(path);
        });
        assert_eq!(seen, vec![Path::from("users/0/id")]);
    }

    #[test]
    fn from_path_nests_value() {
        assert_eq!(
            Value::from_path(&Path::from("a/b"), json!(1)),
            json!({"a": {"b": 1}}),
        );
    }
}
