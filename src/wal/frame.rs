//! WAL frame and payload types.
//!
//! One frame per line:
//!
//! ```text
//! {"seq":1,"label":"tx1","kind":"BEGIN"}
//! {"seq":2,"label":"tx1","kind":"OP","payload":{"op":"put","id":"red","vector":[...],"metadata":{},"at":1700000000000}}
//! {"seq":3,"label":"tx1","kind":"END"}
//! ```

use serde::{Deserialize, Serialize};

use crate::concept::Metadata;
use crate::error::WalError;
use crate::vsa::HyperVec;

/// Frame kind within a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FrameKind {
    Begin,
    Op,
    End,
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameKind::Begin => write!(f, "BEGIN"),
            FrameKind::Op => write!(f, "OP"),
            FrameKind::End => write!(f, "END"),
        }
    }
}

/// A store mutation recorded in an OP frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Upsert a concept. `at` becomes `updated_at` (and `created_at` for new ids).
    Put {
        id: String,
        vector: HyperVec,
        #[serde(default)]
        metadata: Metadata,
        at: u64,
    },
    /// Remove a concept.
    Delete { id: String, at: u64 },
}

impl Operation {
    /// Put operation stamped with the current time.
    pub fn put(id: impl Into<String>, vector: HyperVec, metadata: Metadata) -> Self {
        Operation::Put {
            id: id.into(),
            vector,
            metadata,
            at: crate::concept::now_millis(),
        }
    }

    /// Delete operation stamped with the current time.
    pub fn delete(id: impl Into<String>) -> Self {
        Operation::Delete {
            id: id.into(),
            at: crate::concept::now_millis(),
        }
    }

    /// The concept id this operation touches.
    pub fn concept_id(&self) -> &str {
        match self {
            Operation::Put { id, .. } | Operation::Delete { id, .. } => id,
        }
    }
}

/// A single WAL record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub seq: u64,
    pub label: String,
    pub kind: FrameKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Operation>,
}

impl Frame {
    pub fn begin(seq: u64, label: impl Into<String>) -> Self {
        Self {
            seq,
            label: label.into(),
            kind: FrameKind::Begin,
            payload: None,
        }
    }

    pub fn op(seq: u64, label: impl Into<String>, payload: Operation) -> Self {
        Self {
            seq,
            label: label.into(),
            kind: FrameKind::Op,
            payload: Some(payload),
        }
    }

    pub fn end(seq: u64, label: impl Into<String>) -> Self {
        Self {
            seq,
            label: label.into(),
            kind: FrameKind::End,
            payload: None,
        }
    }

    /// Encode as one line, including the trailing newline.
    pub fn encode_line(&self) -> Result<Vec<u8>, WalError> {
        let mut line = serde_json::to_vec(self).map_err(|e| WalError::Serialization {
            message: format!("failed to encode {} frame {}: {e}", self.kind, self.seq),
        })?;
        line.push(b'\n');
        Ok(line)
    }

    /// Check the payload shape: OP frames carry a payload, BEGIN/END do not.
    pub fn validate_shape(&self) -> Result<(), String> {
        match (self.kind, self.payload.is_some()) {
            (FrameKind::Op, false) => Err("OP frame without payload".into()),
            (FrameKind::Begin | FrameKind::End, true) => {
                Err(format!("{} frame carries a payload", self.kind))
            }
            _ if self.label.is_empty() => Err("frame with empty label".into()),
            _ => Ok(()),
        }
    }
}

/// Outcome of decoding one WAL line.
#[derive(Debug)]
pub enum DecodedLine {
    /// A well-formed frame.
    Frame(Frame),
    /// A malformed frame; `label` is set when it could still be recovered.
    Corrupt {
        label: Option<String>,
        message: String,
    },
}

/// Decode a single line (without its newline).
pub fn decode_line(line: &str) -> DecodedLine {
    match serde_json::from_str::<Frame>(line) {
        Ok(frame) => match frame.validate_shape() {
            Ok(()) => DecodedLine::Frame(frame),
            Err(message) => DecodedLine::Corrupt {
                label: Some(frame.label),
                message,
            },
        },
        Err(e) => {
            // The line may still be valid JSON with a damaged payload; salvage the
            // label so only that transaction is poisoned.
            let label = serde_json::from_str::<serde_json::Value>(line)
                .ok()
                .and_then(|v| v.get("label").and_then(|l| l.as_str()).map(str::to_owned));
            DecodedLine::Corrupt {
                label,
                message: e.to_string(),
            }
        }
    }
}
