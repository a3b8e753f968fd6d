use std::{sync::Arc, time::Duration};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tokio_util::sync::CancellationToken;

use herald_core::{
    audit::{AuditEvent, AuditLogger},
    config::Config,
    domain::UserId,
    flood::{Admission, FloodControl},
    ports::{OutboundSender, UserDirectory},
    roles::classify,
};

use herald_core::roles::Roles;

use crate::registry::{parse_command, CommandRegistry, CommandSpec, Scope};
use crate::{handlers, TelegramSender};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub directory: Arc<dyn UserDirectory>,
    pub flood: Arc<FloodControl>,
    pub audit: Arc<AuditLogger>,
    pub sender: Arc<dyn OutboundSender>,
    pub registry: Arc<CommandRegistry>,
    pub shutdown: CancellationToken,
}

pub async fn run_polling(
    cfg: Arc<Config>,
    directory: Arc<dyn UserDirectory>,
    audit: Arc<AuditLogger>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.bot_token.clone());

    // Basic startup info.
    if let Ok(me) = bot.get_me().await {
        println!("herald started: @{}", me.username());
    }
    println!("Owner: {}, admins: {}", cfg.owner_id, cfg.admin_ids.len());

    let flood = Arc::new(FloodControl::new(
        cfg.rate_limit_requests,
        cfg.rate_limit_window,
    ));
    let _sweeper = flood.spawn_sweeper(cfg.rate_limit_sweep_interval, shutdown.clone());

    let sender: Arc<dyn OutboundSender> = Arc::new(TelegramSender::new(bot.clone()));

    let state = Arc::new(AppState {
        cfg,
        directory,
        flood,
        audit,
        sender,
        registry: Arc::new(CommandRegistry::standard()),
        shutdown: shutdown.clone(),
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_message));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build();

    tokio::select! {
        _ = dispatcher.dispatch() => {}
        _ = shutdown.cancelled() => {
            // Bounded grace period so buffered audit writes land before exit.
            println!("Shutdown requested, draining");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    Ok(())
}

/// Per inbound command: resolve the handler, run admission, then the
/// permission gate, short-circuiting on denial. No handler body executes
/// before both gates pass.
pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let user_id = UserId(user.id.0 as i64);

    let Some(text) = msg.text() else {
        return Ok(());
    };
    let Some((name, args)) = parse_command(text) else {
        return Ok(());
    };

    let roles = classify(user_id, state.cfg.owner_id, &state.cfg.admin_ids);

    // Admission covers every inbound command, recognized or not: unknown
    // command names must not be a free way around the flood gate.
    let admission = state.flood.admit(user_id, roles.is_exempt()).await;

    let spec = match gate(admission, state.registry.resolve(&name), roles) {
        Gate::Pass(spec) => spec,
        Gate::RateLimited { retry_after_secs } => {
            state
                .audit
                .append(AuditEvent::rate_limited(user_id.0, retry_after_secs));
            let _ = bot
                .send_message(
                    msg.chat.id,
                    format!("Too many requests. Try again in {retry_after_secs} s."),
                )
                .await;
            return Ok(());
        }
        Gate::Unknown => {
            let _ = bot
                .send_message(msg.chat.id, "Unknown command. Try /help.")
                .await;
            return Ok(());
        }
        Gate::Denied => {
            state.audit.append(AuditEvent::unauthorized(user_id.0, &name));
            // Fixed denial text: does not reveal which roles exist or who holds them.
            let _ = bot
                .send_message(msg.chat.id, "You are not allowed to use this command.")
                .await;
            return Ok(());
        }
    };

    state.audit.append(AuditEvent::command(user_id.0, &name));
    if let Err(e) = state.directory.record_command(user_id).await {
        eprintln!("[DIRECTORY] failed to count command for {}: {e}", user_id.0);
    }

    handlers::dispatch(bot, msg, state, spec.command, &args).await
}

/// Outcome of the pre-handler gates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Gate {
    Pass(CommandSpec),
    RateLimited { retry_after_secs: u64 },
    Unknown,
    Denied,
}

/// Admission is checked first: a rate-limited caller learns nothing about
/// which commands exist or what scope they carry.
fn gate(admission: Admission, spec: Option<CommandSpec>, roles: Roles) -> Gate {
    if let Admission::Rejected { .. } = admission {
        return Gate::RateLimited {
            retry_after_secs: admission.retry_after_secs(),
        };
    }

    let Some(spec) = spec else {
        return Gate::Unknown;
    };

    let allowed = match spec.scope {
        Scope::Public => true,
        Scope::Admin => roles.admin,
        Scope::Owner => roles.owner,
    };
    if allowed {
        Gate::Pass(spec)
    } else {
        Gate::Denied
    }
}
