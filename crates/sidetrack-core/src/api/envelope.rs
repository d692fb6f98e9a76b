//! Response body decoding.
//!
//! The backend wraps most responses as `{ success, message, data }`, but some
//! endpoints answer with a bare body. Both shapes are decoded once here.

use serde::Deserialize;
use serde_json::Value;

use super::ApiError;

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Enveloped {
        success: bool,
        message: Option<String>,
        data: Value,
    },
    Raw(Value),
}

impl Payload {
    /// Decode a 2xx body. Empty bodies become `null`, non-JSON bodies are
    /// kept as a JSON string.
    pub fn decode(body: &str) -> Self {
        if body.trim().is_empty() {
            return Payload::Raw(Value::Null);
        }
        match serde_json::from_str::<Value>(body) {
            Ok(value) => Self::from_value(value),
            Err(_) => Payload::Raw(Value::String(body.to_string())),
        }
    }

    pub fn from_value(value: Value) -> Self {
        // Only an object with a boolean `success` and a `data` key counts as
        // an envelope. `data: null` is still an envelope.
        let is_envelope = value
            .as_object()
            .map(|obj| obj.get("success").is_some_and(Value::is_boolean) && obj.contains_key("data"))
            .unwrap_or(false);

        if is_envelope {
            if let Ok(envelope) = serde_json::from_value::<Envelope>(value.clone()) {
                return Payload::Enveloped {
                    success: envelope.success,
                    message: envelope.message,
                    data: envelope.data,
                };
            }
        }
        Payload::Raw(value)
    }

    /// Unwrap to the payload the caller asked for. An envelope reporting
    /// `success: false` is turned into an error.
    pub fn into_data(self) -> Result<Value, ApiError> {
        match self {
            Payload::Enveloped {
                success: true,
                data,
                ..
            } => Ok(data),
            Payload::Enveloped {
                success: false,
                message,
                ..
            } => Err(ApiError::Server(
                message.unwrap_or_else(|| "Request was not successful".to_string()),
            )),
            Payload::Raw(value) => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_unwraps_to_data() {
        let payload = Payload::decode(r#"{"success":true,"message":"ok","data":{"foo":1}}"#);
        assert_eq!(payload.into_data().unwrap(), json!({"foo": 1}));
    }

    #[test]
    fn test_raw_body_passes_through() {
        let payload = Payload::decode(r#"{"foo":1,"bar":[1,2]}"#);
        assert_eq!(payload, Payload::Raw(json!({"foo": 1, "bar": [1, 2]})));
        assert_eq!(payload.into_data().unwrap(), json!({"foo": 1, "bar": [1, 2]}));
    }

    #[test]
    fn test_success_must_be_boolean() {
        let body = json!({"success": "yes", "data": 5});
        assert_eq!(Payload::from_value(body.clone()), Payload::Raw(body));
    }

    #[test]
    fn test_missing_data_is_raw() {
        let body = json!({"success": true, "message": "done"});
        assert_eq!(Payload::from_value(body.clone()), Payload::Raw(body));
    }

    #[test]
    fn test_null_data_is_still_an_envelope() {
        let payload = Payload::decode(r#"{"success":true,"message":"deleted","data":null}"#);
        assert!(matches!(payload, Payload::Enveloped { .. }));
        assert_eq!(payload.into_data().unwrap(), Value::Null);
    }

    #[test]
    fn test_bare_string_and_empty_bodies() {
        assert_eq!(Payload::decode(r#""tok2""#).into_data().unwrap(), json!("tok2"));
        assert_eq!(Payload::decode("").into_data().unwrap(), Value::Null);
        assert_eq!(
            Payload::decode("plain text").into_data().unwrap(),
            json!("plain text")
        );
    }

    #[test]
    fn test_unsuccessful_envelope_is_error() {
        let payload = Payload::decode(r#"{"success":false,"message":"sync failed","data":null}"#);
        assert_eq!(
            payload.into_data(),
            Err(ApiError::Server("sync failed".to_string()))
        );
    }
}
