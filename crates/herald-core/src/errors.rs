/// Core error type.
///
/// Adapter crates map their specific errors into this type so the bot core
/// can handle failures consistently. Admission rejection and permission
/// denial are *not* errors; they are normal control-flow outcomes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, Error>;
