use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::mem;

/// Opaque telemetry payload.
///
/// The proxy never interprets these values beyond a few well-known fields the
/// native SDK reads (`name`, `message`, `severityLevel`). Whatever shape the
/// caller builds is what the client receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TelemetryProps {
  inner: Value,
}

impl TelemetryProps {
  pub fn new() -> Self {
    Self {
      inner: Value::Object(Map::new()),
    }
  }

  pub fn from_str(value: &str) -> Self {
    Self {
      inner: Value::String(value.to_string()),
    }
  }

  pub fn from_number<T: Into<Number>>(value: T) -> Self {
    Self {
      inner: Value::Number(value.into()),
    }
  }

  pub fn from_bool(value: bool) -> Self {
    Self {
      inner: Value::Bool(value),
    }
  }

  /// Payload with a single `name` field, the minimum most SDK calls accept.
  pub fn named(name: impl ToString) -> Self {
    let mut props = Self::new();
    props.insert("name", Some(name.to_string()));
    props
  }

  pub fn insert<T>(&mut self, key: impl ToString, value: Option<T>) -> &mut Self
  where
    T: Into<TelemetryProps>
  {
    if let Some(props) = value {
      match &mut self.inner {
        Value::Object(map) => {
          map.insert(key.to_string(), props.into().inner);
        }
        _ => {
          let mut map = Map::new();
          map.insert(key.to_string(), props.into().inner);
          self.inner = Value::Object(map);
        }
      }
    }
    self
  }

  /// Chainable form of [`TelemetryProps::insert`] for building payloads inline.
  pub fn with<T>(mut self, key: impl ToString, value: T) -> Self
  where
    T: Into<TelemetryProps>
  {
    self.insert(key, Some(value));
    self
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.inner.as_object().and_then(|map| map.get(key))
  }

  pub fn get_str(&self, key: &str) -> Option<&str> {
    self.get(key).and_then(Value::as_str)
  }

  pub fn as_value(&self) -> &Value {
    &self.inner
  }

  pub fn to_inner(self) -> Value {
    self.inner
  }

  pub fn to_map(self) -> Option<Map<String, Value>> {
    if let Value::Object(map) = self.inner {
      return Some(map)
    }
    None
  }

  pub fn take(&mut self) -> Self {
    mem::take(self)
  }
}

impl From<&str> for TelemetryProps {
  fn from(value: &str) -> Self {
      TelemetryProps::from_str(value)
  }
}

impl From<String> for TelemetryProps {
  fn from(value: String) -> Self {
      Self { inner: Value::String(value) }
  }
}

impl From<Number> for TelemetryProps {
  fn from(value: Number) -> Self {
      TelemetryProps::from_number(value)
  }
}

impl From<i64> for TelemetryProps {
  fn from(value: i64) -> Self {
      TelemetryProps::from_number(value)
  }
}

impl From<f64> for TelemetryProps {
  fn from(value: f64) -> Self {
      Number::from_f64(value)
        .map(TelemetryProps::from_number)
        .unwrap_or_else(|| Self { inner: Value::Null })
  }
}

impl From<bool> for TelemetryProps {
  fn from(value: bool) -> Self {
      TelemetryProps::from_bool(value)
  }
}

impl From<Value> for TelemetryProps {
  fn from(value: Value) -> Self {
      Self { inner: value }
  }
}

impl From<Vec<TelemetryProps>> for TelemetryProps {
  fn from(values: Vec<TelemetryProps>) -> Self {
      Self {
        inner: Value::Array(values.into_iter().map(|v| v.inner).collect()),
      }
  }
}

impl Default for TelemetryProps {
  fn default() -> Self {
      Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn insert_skips_none_and_promotes_scalars_to_objects() {
    let mut props = TelemetryProps::from_str("scalar");
    props.insert::<&str>("ignored", None);
    assert_eq!(props.as_value(), &json!("scalar"));

    props.insert("name", Some("click"));
    assert_eq!(props.as_value(), &json!({"name": "click"}));
  }

  #[test]
  fn builder_accepts_mixed_values() {
    let props = TelemetryProps::named("checkout")
      .with("items", 3i64)
      .with("total", 12.5)
      .with("guest", true);

    assert_eq!(props.get_str("name"), Some("checkout"));
    assert_eq!(
      props.to_inner(),
      json!({"name": "checkout", "items": 3, "total": 12.5, "guest": true})
    );
  }

  #[test]
  fn serializes_transparently() {
    let props = TelemetryProps::named("home");
    assert_eq!(serde_json::to_string(&props).unwrap(), r#"{"name":"home"}"#);
  }
}
