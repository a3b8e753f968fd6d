//! Telegram adapter for the herald bot core.
//!
//! Implements the core's outbound ports on top of teloxide and hosts the
//! command router.

mod handlers;
pub mod registry;
pub mod router;
mod sender;

pub use sender::TelegramSender;
