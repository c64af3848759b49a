//! Rendering and delivery of stored screens
//!
//! Screen text may carry `{placeholder}` slots filled at send time. Missing
//! placeholders are left verbatim so content editors can spot them.

use crate::core::AppResult;
use crate::storage::db::{self, DbPool, TemplateMessage};
use crate::telegram::keyboards;
use crate::telegram::transport::Transport;

/// Substitute `{name}` placeholders.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

/// Deliver one stored screen to a chat.
pub async fn deliver(transport: &dyn Transport, chat_id: i64, msg: &TemplateMessage, vars: &[(&str, &str)]) {
    let text = render(&msg.text, vars);
    transport.send_message(chat_id, &text, keyboards::markup_for(msg)).await;
}

/// Send the screen registered under a step name, with placeholders.
///
/// Returns false when no screen carries that name; the caller decides
/// whether that is an error or a silent no-op.
pub async fn send_step(
    transport: &dyn Transport,
    pool: &DbPool,
    chat_id: i64,
    step: &str,
    vars: &[(&str, &str)],
) -> AppResult<bool> {
    match db::message_by_step(pool, step)? {
        Some(msg) => {
            deliver(transport, chat_id, &msg, vars).await;
            Ok(true)
        }
        None => {
            log::warn!("No stored screen for step '{}'", step);
            Ok(false)
        }
    }
}

/// Screens triggered by a menu key, with admin screens hidden from
/// non-staff users.
pub fn menu_matches(pool: &DbPool, key: &str, is_staff: bool) -> AppResult<Vec<TemplateMessage>> {
    let msgs = db::messages_by_menu_key(pool, key)?
        .into_iter()
        .filter(|msg| is_staff || !msg.step.starts_with("admin"))
        .collect();
    Ok(msgs)
}
