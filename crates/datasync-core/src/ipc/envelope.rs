// SPDX-License-Identifier: AGPL-3.0
// DataSync Core - IPC message envelopes

use crate::types::AppError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Controller -> service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandEnvelope {
    pub command: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl CommandEnvelope {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_data<T: Serialize>(command: impl Into<String>, data: &T) -> Result<Self, AppError> {
        Ok(Self {
            data: Some(serde_json::to_value(data)?),
            ..Self::new(command)
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, AppError> {
        serde_json::to_vec(self).map_err(AppError::from)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, AppError> {
        serde_json::from_slice(bytes).map_err(AppError::from)
    }

    /// Decode the payload. A JSON string holding a JSON document is unwrapped
    /// first, for controllers that double-encode their data.
    pub fn payload<T: DeserializeOwned>(&self) -> Option<Result<T, AppError>> {
        let data = self.data.as_ref().filter(|d| !d.is_null())?;
        let decoded = match data {
            Value::String(inner) => serde_json::from_str(inner)
                .or_else(|_| serde_json::from_value(data.clone())),
            other => serde_json::from_value(other.clone()),
        };
        Some(decoded.map_err(AppError::from))
    }
}

/// Service -> controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseEnvelope {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ResponseEnvelope {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::ok(message)
        }
    }

    /// Attach a payload. Serialization problems turn the response into a failure.
    pub fn with_data<T: Serialize>(mut self, data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => {
                self.data = Some(value);
                self
            }
            Err(e) => Self::failure(format!("Failed to encode response data: {}", e)),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, AppError> {
        serde_json::to_vec(self).map_err(AppError::from)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, AppError> {
        serde_json::from_slice(bytes).map_err(AppError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_round_trip() {
        let envelope = CommandEnvelope::with_data(
            "UPDATE_CONNECTION",
            &json!({"Protocol": "FTP", "Host": "example.com"}),
        )
        .unwrap();
        let decoded = CommandEnvelope::from_slice(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, envelope);

        let bare = CommandEnvelope::new("PING");
        assert_eq!(CommandEnvelope::from_slice(&bare.to_bytes().unwrap()).unwrap(), bare);
    }

    #[test]
    fn test_response_round_trip() {
        let response = ResponseEnvelope::ok("Done").with_data(&vec![1, 2, 3]);
        let decoded = ResponseEnvelope::from_slice(&response.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, response);

        let failure = ResponseEnvelope::failure("Nope");
        let decoded = ResponseEnvelope::from_slice(&failure.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, failure);
    }

    #[test]
    fn test_wire_field_names() {
        let text = String::from_utf8(ResponseEnvelope::ok("Pong").to_bytes().unwrap()).unwrap();
        assert!(text.contains("\"Success\":true"));
        assert!(text.contains("\"Message\":\"Pong\""));
        assert!(text.contains("\"Timestamp\""));
        assert!(text.contains("\"Data\":null"));

        let text = String::from_utf8(CommandEnvelope::new("PING").to_bytes().unwrap()).unwrap();
        assert!(text.contains("\"Command\":\"PING\""));
        assert!(text.contains("\"Data\":null"));
    }

    #[test]
    fn test_payload_decoding() {
        let nested: CommandEnvelope =
            serde_json::from_str(r#"{"Command":"GET_LOGS","Data":"{\"Filter\":\"x\"}"}"#).unwrap();
        let value: Value = nested.payload().unwrap().unwrap();
        assert_eq!(value["Filter"], "x");

        let null: CommandEnvelope =
            serde_json::from_str(r#"{"Command":"PING","Data":null}"#).unwrap();
        assert!(null.payload::<Value>().is_none());

        let wrong: CommandEnvelope =
            serde_json::from_str(r#"{"Command":"X","Data":[1]}"#).unwrap();
        assert!(wrong.payload::<std::collections::HashMap<String, u8>>().unwrap().is_err());
    }
}
