use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chat-platform user id (numeric).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub i64);

/// A registered user as stored in the directory.
///
/// `id` is the primary key; re-registering an existing id merges fields
/// instead of duplicating the record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub language_code: String,
    #[serde(default)]
    pub command_count: u64,
    pub last_active: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(id: UserId, language_code: impl Into<String>) -> Self {
        Self {
            id,
            language_code: language_code.into(),
            command_count: 0,
            last_active: Utc::now(),
        }
    }
}
