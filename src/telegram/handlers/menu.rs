//! Menu-key presses
//!
//! A menu key works from any step. All screens registered under the pressed
//! key are sent in definition order, and the chat's step moves to the last
//! one. A handful of screens carry dynamic content; they are customized by
//! step name before sending.

use serde_json::json;

use crate::core::AppResult;
use crate::storage::db::{self, SessionStatus, TemplateMessage};
use crate::telegram::dispatch::DialogueContext;
use crate::telegram::keyboards;
use crate::telegram::messages;
use crate::telegram::steps;
use crate::telegram::validators::{self, Validator};

pub async fn handle_menu_press(ctx: &mut DialogueContext<'_>) -> AppResult<()> {
    let matched = messages::menu_matches(&ctx.state.pool, &ctx.text, ctx.user.is_staff)?;
    if matched.is_empty() {
        return Ok(());
    }

    if let Some(last) = matched.last() {
        db::update_user_step(&ctx.state.pool, ctx.chat_id, &last.step)?;
    }

    for msg in matched {
        send_customized(ctx, msg).await?;
    }
    Ok(())
}

async fn send_customized(ctx: &mut DialogueContext<'_>, mut msg: TemplateMessage) -> AppResult<()> {
    match msg.step.as_str() {
        "user_profile" => {
            let user_id = ctx.chat_id.to_string();
            let total_order = db::count_user_orders(&ctx.state.pool, ctx.user.id)?.to_string();
            let total_pay = db::user_total_paid(&ctx.state.pool, ctx.user.id)?.to_string();
            let balance = ctx.user.balance.to_string();
            msg.text = messages::render(
                &msg.text,
                &[
                    ("user_id", &user_id),
                    ("total_order", &total_order),
                    ("total_pay", &total_pay),
                    ("balance", &balance),
                ],
            );
        }

        "buy_phone_number" => {
            let checks = [Validator::Balance, Validator::InventoryExists];
            if !validators::run(&checks, ctx).await? {
                return Ok(());
            }
            let Some(listing) = country_listing(ctx)? else {
                return Ok(());
            };
            msg = listing;
        }

        "admin_statistics" => {
            msg.text = admin_statistics_text(ctx, &msg.text)?;
        }

        "admin_bot_status" => {
            let (is_update, _) = db::bot_update_status(&ctx.state.pool)?;
            let status = if is_update { "disabled 🚫" } else { "enabled ✅" };
            msg.text = messages::render(&msg.text, &[("status", status)]);
        }

        "admin_add_session_file_get_country" => {
            remember_session_type(ctx, "add-file");
            msg = admin_country_listing(ctx, msg)?;
        }
        "admin_add_session_string_get_country" => {
            remember_session_type(ctx, "add-string");
            msg = admin_country_listing(ctx, msg)?;
        }
        "admin_add_session_phone_get_country" => {
            remember_session_type(ctx, "add-phone");
            msg = admin_country_listing(ctx, msg)?;
        }

        "admin_back_to_add_session" => {
            // Abandoning the flow must tear the login worker down
            ctx.state.logins.close(ctx.chat_id);
            ctx.state.scratchpad.remove(ctx.chat_id, steps::scratch::ADD_SESSION);
        }

        _ => {}
    }

    messages::deliver(ctx.state.transport.as_ref(), ctx.chat_id, &msg, &[]).await;
    Ok(())
}

fn remember_session_type(ctx: &DialogueContext<'_>, session_type: &str) {
    ctx.state
        .scratchpad
        .set_field(ctx.chat_id, steps::scratch::ADD_SESSION, "type", json!(session_type), None);
}

/// The buy screen with one button per country that has inventory.
pub fn country_listing(ctx: &DialogueContext<'_>) -> AppResult<Option<TemplateMessage>> {
    let Some(mut msg) = db::message_by_step(&ctx.state.pool, "buy_phone_number")? else {
        return Ok(None);
    };
    let mut keys = String::new();
    for product in db::active_countries(&ctx.state.pool)? {
        keys.push_str(&format!(
            "\n{} | {}:{}{}",
            product.price,
            product.name,
            steps::callback::COUNTRY_PREFIX,
            product.country_code
        ));
    }
    msg.keys = Some(keys.trim().to_string());
    msg.is_inline_keyboard = true;
    Ok(Some(msg))
}

/// The admin country picker used by all three add-session entry points.
fn admin_country_listing(ctx: &DialogueContext<'_>, mut msg: TemplateMessage) -> AppResult<TemplateMessage> {
    let mut keys = String::new();
    for product in db::all_products(&ctx.state.pool)? {
        keys.push_str(&format!(
            "\n{}:{}{}-{}",
            product.name,
            steps::callback::ADD_SESSION_COUNTRY_PREFIX,
            product.country_code,
            product.phone_code
        ));
    }
    msg.keys = Some(keys.trim().to_string());
    msg.is_inline_keyboard = true;
    Ok(msg)
}

fn admin_statistics_text(ctx: &DialogueContext<'_>, template: &str) -> AppResult<String> {
    let pool = &ctx.state.pool;
    let users = db::count_users(pool)?.to_string();
    let sell_count = db::count_orders(pool)?.to_string();
    let enable_account = db::count_sessions_by_status(pool, SessionStatus::Active)?.to_string();
    let disable_account = db::count_sessions_by_status(pool, SessionStatus::Disabled)?.to_string();
    let per_day = db::count_users_joined_since(pool, 1)?.to_string();
    let per_week = db::count_users_joined_since(pool, 7)?.to_string();
    let per_month = db::count_users_joined_since(pool, 31)?.to_string();
    Ok(messages::render(
        template,
        &[
            ("users", &users),
            ("sell_count", &sell_count),
            ("enable_account", &enable_account),
            ("disable_account", &disable_account),
            ("total_users_per_day", &per_day),
            ("total_users_per_week", &per_week),
            ("total_users_per_month", &per_month),
        ],
    ))
}

/// Edit an existing message back into the country list (used by the buy
/// flow's back button and its failure paths).
pub async fn edit_to_country_listing(ctx: &DialogueContext<'_>) -> AppResult<()> {
    let checks = [Validator::InventoryExists];
    if !validators::run(&checks, ctx).await? {
        return Ok(());
    }
    if let Some(msg) = country_listing(ctx)? {
        let markup = msg
            .keys
            .as_deref()
            .map(|keys| keyboards::inline_markup(keys, msg.keys_per_row));
        ctx.state
            .transport
            .edit_message_text(ctx.chat_id, ctx.message_id, &msg.text, markup)
            .await;
    }
    Ok(())
}
