use async_trait::async_trait;

use crate::{
    broadcast::BroadcastProgress,
    domain::{UserId, UserRecord},
    Result,
};

/// Registry of known users.
///
/// `list_users` has snapshot semantics: the returned set is fixed at call
/// time and is not re-queried mid-broadcast. `upsert` is idempotent on id.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn list_users(&self) -> Result<Vec<UserRecord>>;
    async fn upsert(&self, record: UserRecord) -> Result<()>;

    /// Bump the user's command counter and refresh `last_active`.
    async fn record_command(&self, id: UserId) -> Result<()>;
}

/// Outbound message transport. Used exactly once per recipient per
/// broadcast batch entry.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    async fn send_text(&self, user: UserId, text: &str) -> Result<()>;
}

/// Best-effort progress reporting (e.g. editing a status message).
/// Callers swallow errors; a dead status message must not abort a job.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, progress: BroadcastProgress) -> Result<()>;
}

/// Progress sink that drops every snapshot.
pub struct NullProgress;

#[async_trait]
impl ProgressSink for NullProgress {
    async fn report(&self, _progress: BroadcastProgress) -> Result<()> {
        Ok(())
    }
}
