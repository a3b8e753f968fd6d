//! Append-only structured audit log.
//!
//! The sink is fire-and-forget: `append` never propagates failures back into
//! the caller's control flow. Write errors go to stderr instead.

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;

use crate::Result;

const AUDIT_MAX_TEXT: usize = 500;

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuditEvent {
    fn base(event: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event: event.to_string(),
            user_id: None,
            command: None,
            reason: None,
            retry_after_secs: None,
            recipient: None,
            total: None,
            delivered: None,
            failed: None,
            elapsed_ms: None,
            message: None,
        }
    }

    pub fn command(user_id: i64, command: &str) -> Self {
        Self {
            user_id: Some(user_id),
            command: Some(command.to_string()),
            ..Self::base("command")
        }
    }

    pub fn unauthorized(user_id: i64, command: &str) -> Self {
        Self {
            user_id: Some(user_id),
            command: Some(command.to_string()),
            reason: Some("insufficient role".to_string()),
            ..Self::base("unauthorized")
        }
    }

    pub fn rate_limited(user_id: i64, retry_after_secs: u64) -> Self {
        Self {
            user_id: Some(user_id),
            retry_after_secs: Some(retry_after_secs),
            ..Self::base("rate_limited")
        }
    }

    pub fn broadcast_failure(recipient: i64, reason: &str) -> Self {
        Self {
            recipient: Some(recipient),
            reason: Some(truncate_text(reason, AUDIT_MAX_TEXT)),
            ..Self::base("broadcast_failure")
        }
    }

    pub fn broadcast_summary(
        total: usize,
        delivered: usize,
        failed: usize,
        elapsed_ms: u64,
        message: &str,
    ) -> Self {
        Self {
            total: Some(total),
            delivered: Some(delivered),
            failed: Some(failed),
            elapsed_ms: Some(elapsed_ms),
            message: Some(truncate_text(message, AUDIT_MAX_TEXT)),
            ..Self::base("broadcast_summary")
        }
    }
}

/// JSON-lines audit logger.
#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event. Failures are swallowed and reported on stderr only.
    pub fn append(&self, event: AuditEvent) {
        if let Err(e) = self.write(&event) {
            eprintln!("[AUDIT] failed to append {} event: {e}", event.event);
        }
    }

    fn write(&self, event: &AuditEvent) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let line = serde_json::to_string(event)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}
