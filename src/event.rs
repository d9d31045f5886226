//! Event decoder — turns raw inbound frames into typed change events.
//!
//! Wire shape (one JSON text frame per event):
//!
//! ```json
//! { "type": "issue.created" | "issue.updated" | "issue.deleted",
//!   "data": { "id": "...", "project_id": "...", ... } }
//! ```
//!
//! `created`/`updated` frames must carry a complete record (`id` and
//! `project_id` both present) or they are rejected whole — a partial payload
//! must never leak into projection membership. `deleted` needs only `id`.

use serde_json::Value;
use uuid::Uuid;

use crate::error::DecodeError;
use crate::types::Issue;

pub const KIND_CREATED: &str = "issue.created";
pub const KIND_UPDATED: &str = "issue.updated";
pub const KIND_DELETED: &str = "issue.deleted";

/// A typed change event, consumed exactly once by the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// Full record for a newly created issue.
    Created(Issue),
    /// Full post-mutation record for an existing issue.
    Updated(Issue),
    /// Only the identifier survives deletion.
    Deleted { id: Uuid },
}

impl ChangeEvent {
    pub fn issue_id(&self) -> Uuid {
        match self {
            ChangeEvent::Created(issue) | ChangeEvent::Updated(issue) => issue.id,
            ChangeEvent::Deleted { id } => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Created(_) => KIND_CREATED,
            ChangeEvent::Updated(_) => KIND_UPDATED,
            ChangeEvent::Deleted { .. } => KIND_DELETED,
        }
    }
}

/// Decode one raw text frame.
///
/// Any error is non-fatal to the channel: the caller logs it, drops the
/// frame, and keeps reading.
pub fn decode(raw: &str) -> Result<ChangeEvent, DecodeError> {
    let frame: Value = serde_json::from_str(raw)?;

    let kind = frame
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingKind)?;

    let data = frame.get("data").cloned().unwrap_or(Value::Null);

    match kind {
        KIND_CREATED => Ok(ChangeEvent::Created(decode_record(KIND_CREATED, data)?)),
        KIND_UPDATED => Ok(ChangeEvent::Updated(decode_record(KIND_UPDATED, data)?)),
        KIND_DELETED => {
            require_field(KIND_DELETED, &data, "id")?;
            let id: Uuid = serde_json::from_value(data["id"].clone())?;
            Ok(ChangeEvent::Deleted { id })
        }
        other => Err(DecodeError::UnknownKind(other.to_string())),
    }
}

/// Decode a full issue record, insisting on `id` and `project_id` up front
/// so an incomplete payload is reported as such rather than as a generic
/// deserialization failure.
fn decode_record(kind: &'static str, data: Value) -> Result<Issue, DecodeError> {
    require_field(kind, &data, "id")?;
    require_field(kind, &data, "project_id")?;
    Ok(serde_json::from_value(data)?)
}

fn require_field(
    kind: &'static str,
    data: &Value,
    field: &'static str,
) -> Result<(), DecodeError> {
    match data.get(field) {
        Some(value) if !value.is_null() => Ok(()),
        _ => Err(DecodeError::IncompletePayload { kind, field }),
    }
}
