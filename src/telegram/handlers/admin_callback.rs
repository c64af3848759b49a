//! Admin callback handling: ticket moderation, maintenance toggle, and the
//! add-session country picker.

use serde_json::json;

use crate::core::AppResult;
use crate::storage::db;
use crate::telegram::dispatch::DialogueContext;
use crate::telegram::handlers::admin_step::ticket_user_id;
use crate::telegram::messages;
use crate::telegram::steps::{self, callback};

pub async fn handle(ctx: &mut DialogueContext<'_>) -> AppResult<()> {
    let data = ctx.callback.as_ref().map(|c| c.data.clone()).unwrap_or_default();
    match data.as_str() {
        callback::BLOCK_USER => set_ticket_user_blocked(ctx, true).await,
        callback::UNBLOCK_USER => set_ticket_user_blocked(ctx, false).await,
        callback::ENABLE_BOT => set_maintenance(ctx, false).await,
        callback::UPDATE_BOT => set_maintenance(ctx, true).await,
        data if data.starts_with(callback::ADD_SESSION_COUNTRY_PREFIX) => choose_country(ctx, data).await,
        _ => Ok(()),
    }
}

/// Block/unblock buttons under a ticket header act on the ticket's author,
/// parsed out of the header text.
async fn set_ticket_user_blocked(ctx: &mut DialogueContext<'_>, blocked: bool) -> AppResult<()> {
    let Some(target) = ticket_user_id(&ctx.text) else {
        ctx.answer_callback("❌ No user id in this ticket", false).await;
        return Ok(());
    };
    db::set_user_active(&ctx.state.pool, target, !blocked)?;
    let note = if blocked {
        format!("User {target} blocked ❌")
    } else {
        format!("User {target} unblocked ✅")
    };
    log::info!("Admin {} set chat {} blocked={}", ctx.chat_id, target, blocked);
    ctx.answer_callback(&note, false).await;
    Ok(())
}

async fn set_maintenance(ctx: &mut DialogueContext<'_>, enabled: bool) -> AppResult<()> {
    db::set_bot_update_status(&ctx.state.pool, enabled)?;
    let note = if enabled { "disabled 🚫" } else { "enabled ✅" };
    ctx.answer_callback(note, false).await;
    Ok(())
}

/// `add-session-country-<code>-<phone_code>`: remember the country and show
/// the prompt matching the input kind chosen on the menu.
async fn choose_country(ctx: &mut DialogueContext<'_>, data: &str) -> AppResult<()> {
    let rest = data.trim_start_matches(callback::ADD_SESSION_COUNTRY_PREFIX);
    let Some((country_code, phone_code)) = rest.rsplit_once('-') else {
        return Ok(());
    };

    ctx.state.transport.delete_message(ctx.chat_id, ctx.message_id).await;

    let session_type = ctx
        .state
        .scratchpad
        .get_field_str(ctx.chat_id, steps::scratch::ADD_SESSION, "type")
        .unwrap_or_else(|| "add-phone".to_string());
    let screen = match session_type.as_str() {
        "add-file" => steps::ADMIN_GET_SESSION_FILE,
        "add-string" => steps::ADMIN_GET_SESSION_STRING,
        _ => steps::ADMIN_GET_SESSION_PHONE,
    };

    messages::send_step(
        ctx.state.transport.as_ref(),
        &ctx.state.pool,
        ctx.chat_id,
        screen,
        &[("country_phone_code", phone_code)],
    )
    .await?;

    ctx.state.scratchpad.set_field(
        ctx.chat_id,
        steps::scratch::ADD_SESSION,
        "country_code",
        json!(country_code),
        None,
    );
    db::update_user_step(&ctx.state.pool, ctx.chat_id, screen)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #[test]
    fn country_payload_splits_on_last_dash() {
        let rest = "add-session-country-us-1".trim_start_matches(super::callback::ADD_SESSION_COUNTRY_PREFIX);
        assert_eq!(rest.rsplit_once('-'), Some(("us", "1")));
    }
}
