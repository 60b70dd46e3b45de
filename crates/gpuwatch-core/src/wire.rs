use crate::error::DecodeError;
use crate::model::Snapshot;
use serde_json::Value;

pub const FRAME_TYPE_FIELD: &str = "type";
pub const STATUS_FRAME_TYPE: &str = "status";
pub const PING_FRAME_TYPE: &str = "ping";

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Status(Snapshot),
    Control(String),
}

impl Frame {
    pub fn is_ping(&self) -> bool {
        matches!(self, Frame::Control(kind) if kind == PING_FRAME_TYPE)
    }
}

/// Decodes one push message or poll response body.
///
/// A frame without a `type` field, or with `type = "status"`, is a status
/// report and must validate as a [`Snapshot`]. Every other `type` value is a
/// control frame that carries no telemetry.
pub fn decode_frame(raw: &[u8]) -> Result<Frame, DecodeError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|err| DecodeError::Json(err.to_string()))?;
    let Value::Object(map) = &value else {
        return Err(DecodeError::NotAnObject);
    };
    match map.get(FRAME_TYPE_FIELD) {
        None | Some(Value::Null) => {}
        Some(Value::String(kind)) if kind == STATUS_FRAME_TYPE => {}
        Some(Value::String(kind)) => return Ok(Frame::Control(kind.clone())),
        Some(_) => return Err(DecodeError::InvalidDiscriminator),
    }
    let snapshot: Snapshot =
        serde_json::from_value(value).map_err(|err| DecodeError::Schema(err.to_string()))?;
    snapshot.validate()?;
    Ok(Frame::Status(snapshot))
}
