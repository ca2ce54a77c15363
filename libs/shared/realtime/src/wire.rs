use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Inbound frames that could not be dispatched. The display strings double
/// as the client-visible `error` envelope messages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InboundError {
    #[error("Invalid JSON format")]
    InvalidJson,
    #[error("Missing message type")]
    MissingType,
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("Invalid {0} payload")]
    MalformedPayload(String),
}

/// The one outbound encoding boundary. Event structs already carry ids and
/// timestamps in string form, so this never meets a non-JSON-native value.
pub fn encode<T: Serialize>(event: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

/// Two-step inbound parse: JSON first, then the `type` discriminator against
/// the socket's known set, then the typed payload. Each step maps onto its
/// own client-visible error.
pub fn decode<T: DeserializeOwned>(text: &str, known_types: &[&str]) -> Result<T, InboundError> {
    let value: Value = serde_json::from_str(text).map_err(|_| InboundError::InvalidJson)?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(InboundError::MissingType)?;
    if !known_types.contains(&kind) {
        return Err(InboundError::UnknownType(kind.to_string()));
    }

    let kind = kind.to_string();
    serde_json::from_value(value).map_err(|_| InboundError::MalformedPayload(kind))
}
