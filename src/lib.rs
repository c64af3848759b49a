//! Simbazar - Telegram marketplace bot for phone-number-backed messaging accounts
//!
//! This library provides all the core functionality for the Simbazar bot:
//! the step-driven dialogue engine, account provisioning over MTProto,
//! inventory lifecycle management, and payment entry points.
//!
//! # Module Structure
//!
//! - `core`: Core utilities, configuration, errors, and logging
//! - `storage`: Database persistence and the in-process scratchpad
//! - `telegram`: Dialogue dispatch, handlers, and the webhook ingress
//! - `provision`: MTProto clients, login workers, and lifecycle checks
//! - `payment`: Checkout gateways for balance top-ups

#![allow(clippy::too_many_arguments)]

pub mod core;
pub mod payment;
pub mod provision;
pub mod storage;
pub mod telegram;

// Re-export commonly used types for convenience
pub use core::{config, init_logger, AppError, AppResult};
pub use storage::{create_pool, get_connection, DbPool};
pub use telegram::{AppState, TelegramTransport, Transport};
