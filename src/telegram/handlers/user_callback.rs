//! Callback-query handling for regular users
//!
//! Payload resolution is exact-match first, then the first registered
//! prefix that matches. The buy flow lives here: reserving a number,
//! proving it still answers, charging the buyer, and later pulling login
//! codes for it.

use crate::core::config;
use crate::core::AppResult;
use crate::provision::manager;
use crate::storage::db;
use crate::telegram::dispatch::DialogueContext;
use crate::telegram::handlers::menu;
use crate::telegram::keyboards;
use crate::telegram::messages;
use crate::telegram::steps::{self, callback};

fn payload(ctx: &DialogueContext<'_>) -> String {
    ctx.callback.as_ref().map(|c| c.data.clone()).unwrap_or_default()
}

/// First contact ends when a language button lands.
pub async fn store_language_choice(ctx: &mut DialogueContext<'_>) -> AppResult<()> {
    let language = match payload(ctx).as_str() {
        callback::LANG_ENGLISH => "en",
        callback::LANG_PERSIAN => "fa",
        _ => return Ok(()),
    };
    db::set_user_language(&ctx.state.pool, ctx.chat_id, language)?;
    ctx.reload_user()?;
    messages::send_step(
        ctx.state.transport.as_ref(),
        &ctx.state.pool,
        ctx.chat_id,
        steps::HOME_PAGE,
        &[],
    )
    .await?;
    Ok(())
}

pub async fn handle(ctx: &mut DialogueContext<'_>) -> AppResult<()> {
    let data = payload(ctx);
    match data.as_str() {
        callback::BACK_TO_COUNTRIES => menu::edit_to_country_listing(ctx).await,
        data if data.starts_with(callback::COUNTRY_PREFIX) => select_country(ctx, data).await,
        data if data.starts_with(callback::LOGIN_CODE_PREFIX) => get_login_code(ctx, data).await,
        _ => Ok(()),
    }
}

/// A country button: reserve one of its numbers and sell it.
///
/// The reservation is atomic; two buyers racing for the last number cannot
/// both win. Any failure after the reservation leaves the session out of
/// rotation and sends the buyer back to the country list.
async fn select_country(ctx: &mut DialogueContext<'_>, data: &str) -> AppResult<()> {
    let country_code = data.trim_start_matches(callback::COUNTRY_PREFIX);

    let Some(session) = db::reserve_random_active_session(&ctx.state.pool, country_code)? else {
        return menu::edit_to_country_listing(ctx).await;
    };

    // The check must not release the reservation: the row stays at `wait`
    // until the order flips it to `purchased`
    let check = manager::check_reserved_session(&ctx.state.pool, &ctx.state.client_factory, session.id).await?;
    if !check.usable {
        ctx.answer_callback("❌ Session Problem", false).await;
        return menu::edit_to_country_listing(ctx).await;
    }

    let Some(order) = db::create_order(&ctx.state.pool, &session, &ctx.user, session_price(ctx, &session)?) else {
        ctx.answer_callback("❌ Order problem", false).await;
        return menu::edit_to_country_listing(ctx).await;
    };
    log::info!(
        "Order {} created: session {} sold to chat {}",
        order.id,
        session.id,
        ctx.chat_id
    );

    // Seed the login-code counter for this purchase
    ctx.state.scratchpad.counter_get_or_init(
        &steps::scratch::login_code_key(ctx.chat_id, &session.phone),
        config::rate_limit::login_code_window(),
    );

    if let Some(mut msg) = db::message_by_step(&ctx.state.pool, "show-phone-number")? {
        if let Some(keys) = msg.keys.take() {
            msg.keys = Some(messages::render(&keys, &[("phone", &session.phone)]));
        }
        let text = messages::render(&msg.text, &[("phone", &session.phone)]);
        let markup = msg
            .keys
            .as_deref()
            .map(|keys| keyboards::inline_markup(keys, msg.keys_per_row));
        ctx.state
            .transport
            .edit_message_text(ctx.chat_id, ctx.message_id, &text, markup)
            .await;
    }
    Ok(())
}

fn session_price(ctx: &DialogueContext<'_>, session: &db::AccountSession) -> AppResult<i64> {
    let product = db::all_products(&ctx.state.pool)?
        .into_iter()
        .find(|p| p.id == session.product_id);
    Ok(product.map(|p| p.price).unwrap_or(0))
}

/// The "get code" button under a purchased number.
async fn get_login_code(ctx: &mut DialogueContext<'_>, data: &str) -> AppResult<()> {
    let phone = data.trim_start_matches(callback::LOGIN_CODE_PREFIX).to_string();

    let counter_key = steps::scratch::login_code_key(ctx.chat_id, &phone);
    if ctx.state.scratchpad.counter_value(&counter_key) > *config::rate_limit::LOGIN_CODE_LIMIT {
        let text = db::message_by_step(&ctx.state.pool, "limit-login-code-error")?
            .map(|msg| msg.text)
            .unwrap_or_else(|| "Login code limit reached".to_string());
        ctx.answer_callback(&text, true).await;
        return Ok(());
    }

    let Some(session) = db::session_by_phone(&ctx.state.pool, &phone)? else {
        ctx.answer_callback("❌ Number not found", false).await;
        return Ok(());
    };

    let Some(code) = manager::retrieve_login_code(&ctx.state.pool, &ctx.state.client_factory, &phone).await? else {
        ctx.answer_callback("❌ Code not found", false).await;
        return Ok(());
    };

    // The code belongs on the order record whatever its status is
    if let Some(order) = db::order_by_session(&ctx.state.pool, session.id)? {
        db::update_order_login_code(&ctx.state.pool, order.id, &code)?;
    }

    if let Some(mut msg) = db::message_by_step(&ctx.state.pool, "show-login-code")? {
        if let Some(keys) = msg.keys.take() {
            msg.keys = Some(messages::render(&keys, &[("phone", &phone)]));
        }
        messages::deliver(
            ctx.state.transport.as_ref(),
            ctx.chat_id,
            &msg,
            &[("code", code.as_str()), ("password", session.password.as_str())],
        )
        .await;
    }
    ctx.answer_callback("✅", false).await;
    ctx.state
        .scratchpad
        .counter_incr(&counter_key, config::rate_limit::login_code_window());
    Ok(())
}
