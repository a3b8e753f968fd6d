//! JSON-file user directory.
//!
//! The whole registry is one JSON map (id -> record), loaded at startup and
//! rewritten after every mutation. Fine for the user counts a single bot
//! serves; anything larger belongs behind a real database and a different
//! `UserDirectory` impl.

use std::{collections::HashMap, fs, path::PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::{
    domain::{UserId, UserRecord},
    ports::UserDirectory,
    Result,
};

pub struct JsonFileDirectory {
    path: PathBuf,
    default_language: String,
    state: Mutex<HashMap<UserId, UserRecord>>,
}

impl JsonFileDirectory {
    pub fn open(path: impl Into<PathBuf>, default_language: impl Into<String>) -> Result<Self> {
        let path = path.into();

        let users = if path.exists() {
            let txt = fs::read_to_string(&path)?;
            serde_json::from_str::<HashMap<UserId, UserRecord>>(&txt)?
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            default_language: default_language.into(),
            state: Mutex::new(users),
        })
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    fn persist(&self, users: &HashMap<UserId, UserRecord>) -> Result<()> {
        let txt = serde_json::to_string(users)?;
        fs::write(&self.path, txt)?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for JsonFileDirectory {
    async fn list_users(&self) -> Result<Vec<UserRecord>> {
        let users = self.state.lock().await;
        let mut out: Vec<UserRecord> = users.values().cloned().collect();
        out.sort_by_key(|u| u.id);
        Ok(out)
    }

    async fn upsert(&self, record: UserRecord) -> Result<()> {
        let mut users = self.state.lock().await;

        match users.get_mut(&record.id) {
            Some(existing) => {
                // Merge: the counter survives re-registration.
                if !record.language_code.is_empty() {
                    existing.language_code = record.language_code;
                }
                existing.last_active = record.last_active;
            }
            None => {
                let mut record = record;
                if record.language_code.is_empty() {
                    record.language_code = self.default_language.clone();
                }
                users.insert(record.id, record);
            }
        }

        self.persist(&users)
    }

    async fn record_command(&self, id: UserId) -> Result<()> {
        let mut users = self.state.lock().await;

        let Some(user) = users.get_mut(&id) else {
            // Unknown id: nothing to count. `/start` is what registers users.
            return Ok(());
        };
        user.command_count += 1;
        user.last_active = Utc::now();

        self.persist(&users)
    }
}
