use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use herald_core::{
    audit::AuditLogger, config::Config, directory::JsonFileDirectory, ports::UserDirectory,
};

#[tokio::main]
async fn main() -> Result<(), herald_core::Error> {
    herald_core::logging::init("herald")?;

    let cfg = Arc::new(Config::load()?);

    let directory: Arc<dyn UserDirectory> = Arc::new(JsonFileDirectory::open(
        cfg.users_file.clone(),
        cfg.default_language.clone(),
    )?);
    let audit = Arc::new(AuditLogger::new(cfg.audit_log_path.clone()));

    // One token for /shutdown and Ctrl-C alike.
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }

    herald_telegram::router::run_polling(cfg, directory, audit, shutdown)
        .await
        .map_err(|e| herald_core::Error::Transport(format!("telegram bot failed: {e}")))?;

    Ok(())
}
