use std::fmt;

use serde::Serialize;
use tracing::info;

use crate::error::SaveResult;

/// Visible state of the save pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    Saved,
    Dirty,
    Saving,
    Error,
}

impl SaveStatus {
    pub fn label(self) -> &'static str {
        match self {
            SaveStatus::Saved => "Saved",
            SaveStatus::Dirty => "Unsaved changes",
            SaveStatus::Saving => "Saving…",
            SaveStatus::Error => "Save failed",
        }
    }
}

impl fmt::Display for SaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Receives user-visible status text.
pub trait StatusSink: Send + Sync {
    fn set_status(&self, message: &str);
}

/// Discards every message.
pub struct NoOpSink;

impl StatusSink for NoOpSink {
    fn set_status(&self, _message: &str) {}
}

/// Forwards status text to the log.
pub struct LogSink;

impl StatusSink for LogSink {
    fn set_status(&self, message: &str) {
        info!(status = message, "status");
    }
}

/// Produces the document the save manager writes.
///
/// Implementors serialize the persistent part of the application state
/// only; ephemeral data never reaches the manager.
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self) -> SaveResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        assert_eq!(SaveStatus::Saved.to_string(), "Saved");
        assert_eq!(SaveStatus::Dirty.label(), "Unsaved changes");
    }
}
