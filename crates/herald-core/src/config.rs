use std::{env, fs, path::Path, path::PathBuf, time::Duration};

use crate::{errors::Error, Result};

/// Typed configuration, loaded from the environment (plus an optional
/// `.env` file that never overrides already-set variables).
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub bot_token: String,
    pub owner_id: i64,
    pub admin_ids: Vec<i64>,
    pub default_language: String,

    // Flood control
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
    pub rate_limit_sweep_interval: Duration,

    // Broadcast
    pub broadcast_batch_size: usize,
    pub broadcast_batch_delay: Duration,

    // Persistence
    pub users_file: PathBuf,
    pub audit_log_path: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let bot_token = env_str("BOT_TOKEN").unwrap_or_default();
        if bot_token.trim().is_empty() {
            return Err(Error::Config(
                "BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let owner_id = env_i64("OWNER_ID").ok_or_else(|| {
            Error::Config("OWNER_ID environment variable is required".to_string())
        })?;
        let admin_ids = parse_csv_i64(env_str("ADMIN_IDS"));

        let default_language = env_str("DEFAULT_LANGUAGE")
            .and_then(non_empty)
            .unwrap_or_else(|| "en".to_string());

        // Flood control. Non-positive values are *not* rejected here: the
        // limiter fails open on them rather than taking the bot down.
        let rate_limit_requests = env_u32("RATE_LIMIT_REQUESTS").unwrap_or(5);
        let rate_limit_window =
            Duration::from_millis(env_u64("RATE_LIMIT_WINDOW_MS").unwrap_or(60_000));
        let rate_limit_sweep_interval =
            Duration::from_secs(env_u64("RATE_LIMIT_SWEEP_SECS").unwrap_or(300).max(1));

        // Broadcast. A zero batch size is a hard startup error.
        let broadcast_batch_size = env_usize("BROADCAST_BATCH_SIZE").unwrap_or(30);
        if broadcast_batch_size == 0 {
            return Err(Error::Config(
                "BROADCAST_BATCH_SIZE must be positive".to_string(),
            ));
        }
        let broadcast_batch_delay =
            Duration::from_millis(env_u64("BROADCAST_BATCH_DELAY_MS").unwrap_or(1000));

        let users_file =
            PathBuf::from(env_str("USERS_FILE").unwrap_or("/tmp/herald-users.json".to_string()));
        let audit_log_path = PathBuf::from(
            env_str("AUDIT_LOG_PATH").unwrap_or("/tmp/herald-audit.log".to_string()),
        );

        Ok(Self {
            bot_token,
            owner_id,
            admin_ids,
            default_language,
            rate_limit_requests,
            rate_limit_window,
            rate_limit_sweep_interval,
            broadcast_batch_size,
            broadcast_batch_delay,
            users_file,
            audit_log_path,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key).and_then(|s| s.trim().parse::<i64>().ok())
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_parsing_skips_blanks_and_garbage() {
        assert_eq!(
            parse_csv_i64(Some("1, 2,,x, 3 ".to_string())),
            vec![1, 2, 3]
        );
        assert!(parse_csv_i64(None).is_empty());
    }
}
