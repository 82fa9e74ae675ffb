/// Response body decoder
///
/// Turns raw HTTP bodies from either polling contract into typed values.
/// Decoding never looks at the status code; callers pick the decoder that
/// matches the status they received.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::protocol::*;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field {field} has unexpected shape")]
    InvalidField { field: &'static str },
}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// Reason carried by a `410 Gone` from the batched endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GoneReason {
    /// The log has no entries yet.
    LogEmpty,
    /// The requested bound was pruned; `min_available` is the oldest seq still held.
    TooOld { min_available: Option<Seq> },
    Unknown(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotBody {
    latest_seq: Option<i64>,
    snapshot: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestSeqBody {
    latest_seq: Option<i64>,
}

#[derive(Deserialize)]
struct UpdateBody {
    update: Option<Value>,
    seq: Option<i64>,
}

#[derive(Deserialize)]
struct MessageBody {
    message: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchBody {
    updates: Option<Vec<UpdateEvent>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoneBody {
    error: Option<String>,
    min_available_seq: Option<i64>,
    min_from_exclusive: Option<i64>,
}

/// Stateless decoder for every body the feed consumes
pub struct Decoder;

impl Decoder {
    /// `POST snapshot` success body
    pub fn snapshot(body: &[u8]) -> DecodeResult<Snapshot> {
        let parsed: SnapshotBody = serde_json::from_slice(body)?;
        let raw_seq = parsed.latest_seq.ok_or(DecodeError::MissingField("latestSeq"))?;
        let state = match parsed.snapshot {
            None | Some(Value::Null) => return Err(DecodeError::MissingField("snapshot")),
            // Some servers hand the state over as an embedded JSON document.
            Some(Value::String(text)) => serde_json::from_str(&text)?,
            Some(other) => other,
        };
        Ok(Snapshot::new(seq_from_wire(raw_seq), state))
    }

    /// `GET latest-seq` body; `None` for the empty-log sentinel
    pub fn latest_seq(body: &[u8]) -> DecodeResult<Option<Seq>> {
        let parsed: LatestSeqBody = serde_json::from_slice(body)?;
        let raw = parsed.latest_seq.ok_or(DecodeError::MissingField("latestSeq"))?;
        Ok(seq_from_wire(raw))
    }

    /// Exact-seq endpoint success body
    pub fn update(body: &[u8]) -> DecodeResult<UpdateEvent> {
        let parsed: UpdateBody = serde_json::from_slice(body)?;
        let mut update = match parsed.update {
            Some(Value::Object(map)) => map,
            Some(_) => return Err(DecodeError::InvalidField { field: "update" }),
            None => return Err(DecodeError::MissingField("update")),
        };
        if !update.contains_key("seq") && !update.contains_key("updateId") {
            let seq = parsed
                .seq
                .and_then(seq_from_wire)
                .ok_or(DecodeError::MissingField("seq"))?;
            update.insert("seq".to_string(), Value::from(seq));
        }
        Ok(serde_json::from_value(Value::Object(update))?)
    }

    /// Error code carried in `message.errorCode`.
    ///
    /// The message may be a JSON object or a string holding one.
    pub fn error_code(body: &[u8]) -> DecodeResult<Option<i64>> {
        let parsed: MessageBody = serde_json::from_slice(body)?;
        let message = match parsed.message {
            Some(Value::String(text)) => match serde_json::from_str::<Value>(&text) {
                Ok(value) => value,
                Err(_) => return Ok(None),
            },
            Some(value) => value,
            None => return Err(DecodeError::MissingField("message")),
        };
        Ok(message.get("errorCode").and_then(Value::as_i64))
    }

    /// Events of a batched endpoint success body
    pub fn batch(body: &[u8]) -> DecodeResult<Vec<UpdateEvent>> {
        let parsed: BatchBody = serde_json::from_slice(body)?;
        parsed.updates.ok_or(DecodeError::MissingField("updates"))
    }

    /// Batched endpoint `410 Gone` body
    pub fn gone(body: &[u8]) -> DecodeResult<GoneReason> {
        let parsed: GoneBody = serde_json::from_slice(body)?;
        let error = parsed.error.ok_or(DecodeError::MissingField("error"))?;

        let reason = match error.as_str() {
            MIN_SEQ_UNAVAILABLE => GoneReason::LogEmpty,
            FROM_TOO_OLD => {
                let min_available = match (parsed.min_available_seq, parsed.min_from_exclusive) {
                    (Some(min), _) => seq_from_wire(min),
                    (None, Some(from)) => seq_from_wire(from.saturating_add(1)),
                    (None, None) => None,
                };
                GoneReason::TooOld { min_available }
            }
            _ => GoneReason::Unknown(error),
        };
        Ok(reason)
    }
}
