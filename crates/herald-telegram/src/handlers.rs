use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId};

use herald_core::{
    broadcast::{run_broadcast, BroadcastOptions, BroadcastProgress},
    domain::{UserId, UserRecord},
    ports::{NullProgress, ProgressSink},
    roles::classify,
    Error, Result as CoreResult,
};

use crate::registry::Command;
use crate::router::AppState;

pub async fn dispatch(
    bot: Bot,
    msg: Message,
    state: Arc<AppState>,
    command: Command,
    args: &str,
) -> ResponseResult<()> {
    match command {
        Command::Start => start(bot, msg, state).await,
        Command::Help => help(bot, msg, state).await,
        Command::Stats => stats(bot, msg, state).await,
        Command::Broadcast => broadcast(bot, msg, state, args).await,
        Command::Shutdown => shutdown(bot, msg, state).await,
    }
}

async fn start(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };

    let record = UserRecord {
        id: UserId(user.id.0 as i64),
        language_code: user.language_code.clone().unwrap_or_default(),
        command_count: 0,
        last_active: Utc::now(),
    };
    if let Err(e) = state.directory.upsert(record).await {
        eprintln!("[DIRECTORY] failed to register user {}: {e}", user.id.0);
    }

    let _ = bot
        .send_message(
            msg.chat.id,
            "Welcome! You are registered. Use /help to see what I can do.",
        )
        .await;
    Ok(())
}

async fn help(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let roles = classify(
        UserId(user.id.0 as i64),
        state.cfg.owner_id,
        &state.cfg.admin_ids,
    );

    let lines: Vec<String> = state
        .registry
        .visible_names(roles.admin, roles.owner)
        .iter()
        .map(|n| format!("/{n}"))
        .collect();
    let _ = bot
        .send_message(
            msg.chat.id,
            format!("Available commands:\n{}", lines.join("\n")),
        )
        .await;
    Ok(())
}

async fn stats(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let users = state.directory.list_users().await.unwrap_or_default();
    let total_commands: u64 = users.iter().map(|u| u.command_count).sum();
    let tracked = state.flood.tracked_users().await;

    let text = format!(
        "\u{1F465} Users: {}\nCommands handled: {}\nRate-limit windows tracked: {}",
        users.len(),
        total_commands,
        tracked
    );
    let _ = bot.send_message(msg.chat.id, text).await;
    Ok(())
}

async fn broadcast(
    bot: Bot,
    msg: Message,
    state: Arc<AppState>,
    args: &str,
) -> ResponseResult<()> {
    let message = args.trim();
    if message.is_empty() {
        let _ = bot
            .send_message(msg.chat.id, "Usage: /broadcast <message>")
            .await;
        return Ok(());
    }

    // Recipient snapshot is taken once; joins mid-broadcast are not included.
    let recipients: Vec<UserId> = match state.directory.list_users().await {
        Ok(users) => users.iter().map(|u| u.id).collect(),
        Err(e) => {
            eprintln!("[BROADCAST] failed to read the user directory: {e}");
            let _ = bot
                .send_message(msg.chat.id, "Could not read the user directory.")
                .await;
            return Ok(());
        }
    };

    if recipients.is_empty() {
        let _ = bot
            .send_message(msg.chat.id, "No recipients registered.")
            .await;
        return Ok(());
    }

    let opts = match BroadcastOptions::new(
        state.cfg.broadcast_batch_size,
        state.cfg.broadcast_batch_delay,
    ) {
        Ok(v) => v,
        Err(e) => {
            let _ = bot
                .send_message(msg.chat.id, format!("Broadcast refused: {e}"))
                .await;
            return Ok(());
        }
    };

    let status = bot
        .send_message(
            msg.chat.id,
            format!("\u{1F4E3} Broadcasting to {} users...", recipients.len()),
        )
        .await;
    let progress: Box<dyn ProgressSink> = match status {
        Ok(m) => Box::new(StatusMessageProgress {
            bot: bot.clone(),
            chat_id: m.chat.id,
            message_id: m.id,
        }),
        // No status message to edit; run without live progress.
        Err(_) => Box::new(NullProgress),
    };

    let report = run_broadcast(
        message,
        &recipients,
        state.sender.clone(),
        progress.as_ref(),
        &state.audit,
        opts,
    )
    .await;

    let summary = format!(
        "\u{2705} Broadcast complete\nDelivered: {}\nFailed: {}\nSuccess rate: {}%\nElapsed: {:.1}s",
        report.delivered,
        report.failed,
        report.success_rate(),
        report.elapsed.as_secs_f64()
    );
    let _ = bot.send_message(msg.chat.id, summary).await;
    Ok(())
}

async fn shutdown(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let _ = bot.send_message(msg.chat.id, "Shutting down.").await;
    state.shutdown.cancel();
    Ok(())
}

/// Progress sink that edits the broadcast status message in place.
struct StatusMessageProgress {
    bot: Bot,
    chat_id: ChatId,
    message_id: MessageId,
}

#[async_trait]
impl ProgressSink for StatusMessageProgress {
    async fn report(&self, p: BroadcastProgress) -> CoreResult<()> {
        let text = format!(
            "\u{1F4E3} Broadcasting... {}% ({} delivered, {} failed, {:.0}s elapsed)",
            p.percent(),
            p.delivered,
            p.failed,
            p.elapsed.as_secs_f64()
        );
        self.bot
            .edit_message_text(self.chat_id, self.message_id, text)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(())
    }
}
