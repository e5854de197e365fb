//! Audit trail for access decisions
//!
//! Denials, silently dropped write fields, validation failures, and broken
//! rules are recorded through an [`AuditSink`]. Recording never changes a
//! decision: a failing sink is logged and ignored.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use docguard_api::Action;
use serde::Serialize;
use thiserror::Error;

use crate::context::RequestId;

/// Audit event for one access decision
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// RFC 3339 timestamp
    pub timestamp: String,
    pub event_type: AuditEventType,
    /// Request the event belongs to, as `req-N`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_collection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    pub details: AuditDetails,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, details: AuditDetails) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            event_type,
            request: None,
            collection: None,
            sub_collection: None,
            action: None,
            details,
        }
    }

    /// Attach the collection and action
    pub fn on(mut self, collection: impl Into<String>, action: Action) -> Self {
        self.collection = Some(collection.into());
        self.action = Some(action);
        self
    }

    pub fn with_sub_collection(mut self, sub_collection: Option<&str>) -> Self {
        self.sub_collection = sub_collection.map(String::from);
        self
    }

    pub fn with_request(mut self, request: RequestId) -> Self {
        self.request = Some(request.to_string());
        self
    }
}

/// Type of audit event
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// The route guard denied an action
    GuardDenied,
    /// A base filter made every document unreachable
    FilterDenied,
    /// Write payload fields were removed by the field mask
    FieldsDropped,
    /// The validation hook rejected a payload
    ValidationFailed,
    /// The global permissions resolver failed
    IdentityResolutionFailed,
    /// A user-supplied rule, resolver, or hook failed
    EvaluationFailed,
}

/// Event-specific payload
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AuditDetails {
    Denial,
    Fields { paths: Vec<String> },
    Validation { errors: Vec<String> },
    Failure {
        #[serde(skip_serializing_if = "Option::is_none")]
        location: Option<String>,
        message: String,
    },
}

/// Error type for audit operations
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to write audit log: {0}")]
    WriteError(#[from] std::io::Error),

    #[error("Failed to serialize audit event: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Audit sink not available: {0}")]
    Unavailable(String),
}

/// Destination for audit events
///
/// # Example
///
/// ```rust
/// use docguard_engine::audit::{AuditError, AuditEvent, AuditSink};
///
/// struct StderrAuditSink;
///
/// impl AuditSink for StderrAuditSink {
///     fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
///         eprintln!("{}", serde_json::to_string(&event)?);
///         Ok(())
///     }
///
///     fn flush(&self) -> Result<(), AuditError> {
///         Ok(())
///     }
/// }
/// ```
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;

    fn flush(&self) -> Result<(), AuditError>;

    fn is_healthy(&self) -> bool {
        true
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// JSON Lines file sink
pub struct FileAuditSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileAuditSink {
    /// Open (or create) the log file, creating parent directories
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let line = serde_json::to_string(&event)?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{}", line)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()?;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.path.parent().map(|p| p.exists()).unwrap_or(true)
    }
}

impl fmt::Debug for FileAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileAuditSink")
            .field("path", &self.path)
            .finish()
    }
}

/// Bounded in-memory sink, oldest events evicted first
pub struct MemoryAuditSink {
    events: RwLock<Vec<AuditEvent>>,
    max_events: usize,
}

impl MemoryAuditSink {
    /// Sink holding up to 1000 events
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: RwLock::new(Vec::with_capacity(max_events.min(1000))),
            max_events,
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn clear(&self) {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn find_by_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn find_by_collection(&self, collection: &str) -> Vec<AuditEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.collection.as_deref() == Some(collection))
            .cloned()
            .collect()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        if self.max_events == 0 {
            return Ok(());
        }
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        if events.len() >= self.max_events {
            events.remove(0);
        }
        events.push(event);
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

impl fmt::Debug for MemoryAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAuditSink")
            .field("count", &self.count())
            .field("max_events", &self.max_events)
            .finish()
    }
}

/// Discards every event
#[derive(Debug, Default)]
pub struct NullAuditSink;

impl NullAuditSink {
    pub fn new() -> Self {
        Self
    }
}

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Fans events out to several sinks
#[derive(Default)]
pub struct CompositeAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl CompositeAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AuditSink for CompositeAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        for sink in &self.sinks {
            sink.record(event.clone())?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        for sink in &self.sinks {
            sink.flush()?;
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.sinks.iter().all(|s| s.is_healthy())
    }
}

impl fmt::Debug for CompositeAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeAuditSink")
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

// ============================================================================
// Helper functions
// ============================================================================

pub fn guard_denied(collection: &str, action: Action, sub_collection: Option<&str>) -> AuditEvent {
    AuditEvent::new(AuditEventType::GuardDenied, AuditDetails::Denial)
        .on(collection, action)
        .with_sub_collection(sub_collection)
}

pub fn filter_denied(collection: &str, action: Action, sub_collection: Option<&str>) -> AuditEvent {
    AuditEvent::new(AuditEventType::FilterDenied, AuditDetails::Denial)
        .on(collection, action)
        .with_sub_collection(sub_collection)
}

pub fn fields_dropped(collection: &str, action: Action, paths: Vec<String>) -> AuditEvent {
    AuditEvent::new(AuditEventType::FieldsDropped, AuditDetails::Fields { paths }).on(collection, action)
}

pub fn validation_failed(collection: &str, action: Action, errors: &[String]) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::ValidationFailed,
        AuditDetails::Validation {
            errors: errors.to_vec(),
        },
    )
    .on(collection, action)
}

pub fn identity_resolution_failed(message: &str) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::IdentityResolutionFailed,
        AuditDetails::Failure {
            location: None,
            message: message.to_string(),
        },
    )
}

pub fn evaluation_failed(location: &str, message: &str) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::EvaluationFailed,
        AuditDetails::Failure {
            location: Some(location.to_string()),
            message: message.to_string(),
        },
    )
}
