//! Telegram-facing layer: dispatch, handlers, rendering, ingress

pub mod dispatch;
pub mod handlers;
pub mod keyboards;
pub mod messages;
pub mod rate_limit;
pub mod steps;
pub mod transport;
pub mod validators;
pub mod webhook;

pub use dispatch::AppState;
pub use transport::{TelegramTransport, Transport};
