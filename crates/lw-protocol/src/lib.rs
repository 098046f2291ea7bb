// lw-protocol: Log broker wire types and serialization.
//
// Everything a producer sends, a subscriber receives, or an error response
// carries is defined here.  All JSON bodies use camelCase field names; the
// server and the test suites share these types so the wire contract has a
// single source of truth.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Levels
// ---------------------------------------------------------------------------

/// Severity label derived from the numeric level.
///
/// The numeric scale is the pino convention: 10 trace, 20 debug, 30 info,
/// 40 warn, 50 error, 60 fatal.  Any other value maps to `Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelLabel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LevelLabel {
    pub fn from_level(level: i64) -> Self {
        match level {
            10 => LevelLabel::Trace,
            20 => LevelLabel::Debug,
            30 => LevelLabel::Info,
            40 => LevelLabel::Warn,
            50 => LevelLabel::Error,
            60 => LevelLabel::Fatal,
            _ => LevelLabel::Info,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LevelLabel::Trace => "trace",
            LevelLabel::Debug => "debug",
            LevelLabel::Info => "info",
            LevelLabel::Warn => "warn",
            LevelLabel::Error => "error",
            LevelLabel::Fatal => "fatal",
        }
    }
}

/// Numeric level assumed when a record does not carry one.
pub const DEFAULT_LEVEL: i64 = 30;

/// Placeholder message body for encrypted entries.
pub const ENCRYPTED_PLACEHOLDER: &str = "[Encrypted]";

// ---------------------------------------------------------------------------
// Canonical entry
// ---------------------------------------------------------------------------

/// The canonical log entry delivered to subscribers.
///
/// Producers send heterogeneous records (see [`IncomingRecord`]); the server
/// normalizes each into this shape before fan-out.  `data` holds every
/// producer field that is not one of the normalized keys.  For encrypted
/// entries `msg` is the literal `"[Encrypted]"`, `data` is empty and
/// `encrypted_data` carries the opaque blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    pub level: i64,
    pub level_label: LevelLabel,
    /// Milliseconds since the Unix epoch.
    pub time: i64,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub channel: String,
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_data: Option<String>,
}

impl LogEntry {
    pub fn is_encrypted(&self) -> bool {
        self.encrypted == Some(true)
    }
}

// ---------------------------------------------------------------------------
// Producer-facing records
// ---------------------------------------------------------------------------

/// An opaque, client-side-encrypted record.  The server never inspects the
/// blob; it is forwarded through fan-out unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    pub encrypted: String,
}

/// One incoming record as posted by a producer.
///
/// Dispatch is by shape: an object whose `encrypted` field is a string is an
/// encrypted blob; any other object is a free-form record whose recognized
/// keys (`level`, `time`, `msg`/`message`, `namespace`/`name`, `channel`)
/// are lifted during normalization and whose remaining keys flow into
/// [`LogEntry::data`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IncomingRecord {
    Encrypted(EncryptedRecord),
    Plain(Map<String, Value>),
}

/// Batch request wrapper: `{"logs": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogBatch {
    pub logs: Vec<IncomingRecord>,
}

/// An ingest request body: either a batch wrapper or a single record.
///
/// `Batch` is tried first so that `{"logs": [...]}` is never mistaken for a
/// free-form record with a `logs` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IngestRequest {
    Batch(LogBatch),
    Single(IncomingRecord),
}

/// Success body for `POST /api/logs`.
///
/// `channel` echoes the request-level default; per-record channel overrides
/// do not change it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestAck {
    pub received: usize,
    pub channel: String,
}

// ---------------------------------------------------------------------------
// SSE frames
// ---------------------------------------------------------------------------

/// SSE event name for an outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Ping,
    Log,
    Batch,
    Channels,
    ChannelAdded,
    Clear,
}

impl FrameKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            FrameKind::Ping => "ping",
            FrameKind::Log => "log",
            FrameKind::Batch => "batch",
            FrameKind::Channels => "channels",
            FrameKind::ChannelAdded => "channelAdded",
            FrameKind::Clear => "clear",
        }
    }
}

/// A single outbound SSE frame.
///
/// `data` is the payload serialized exactly once at publish time; cloning a
/// frame for each subscriber of a channel shares the serialization by
/// reference instead of repeating it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub data: Arc<str>,
    pub id: Option<String>,
}

impl Frame {
    pub fn new(kind: FrameKind, data: impl Into<Arc<str>>, id: Option<String>) -> Self {
        Self {
            kind,
            data: data.into(),
            id,
        }
    }
}

// ---------------------------------------------------------------------------
// Error envelope and channel snapshots
// ---------------------------------------------------------------------------

/// JSON body for every error response.
///
/// | Status | `error` |
/// |--------|---------|
/// | 400    | `Invalid JSON` / descriptive text |
/// | 401    | `Unauthorized` |
/// | 413    | `Payload Too Large` |
/// | 429    | `Too Many Requests` (carries `retryAfter`) |
/// | 503    | `Service Unavailable` |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Milliseconds until the client may retry (429 only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Per-channel bookkeeping as exposed by `GET /api/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSnapshot {
    pub name: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub last_activity: i64,
    pub log_count: u64,
}
