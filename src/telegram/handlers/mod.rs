//! Update handlers, split by role and update kind

pub mod admin_callback;
pub mod admin_step;
pub mod menu;
pub mod user_callback;
pub mod user_input;
