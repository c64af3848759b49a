//! Admin step continuations: user lookup, the add-session flow, and the
//! staged phone-number login.
//!
//! The add-session flow is a chain of steps sharing one scratchpad
//! namespace: country and input kind are chosen first, then the session
//! material arrives (token, file, or phone), then api credentials and a
//! proxy, and finally, for phone logins, the code/password exchange against
//! the chat's login worker.

use serde_json::json;
use std::path::PathBuf;

use crate::core::config;
use crate::core::AppResult;
use crate::provision::registry::{LoginCommand, StageOutcome};
use crate::provision::{manager, CodeChannel, SignInErrorKind};
use crate::storage::db::{self, SessionStatus};
use crate::telegram::dispatch::DialogueContext;
use crate::telegram::messages;
use crate::telegram::steps;
use crate::telegram::validators::{self, Validator};

pub async fn handle(ctx: &mut DialogueContext<'_>) -> AppResult<()> {
    match ctx.user.step.as_str() {
        steps::ADMIN_GET_USER_INFO => user_info(ctx).await,
        steps::ADMIN_GET_SESSION_STRING => add_session_string(ctx).await,
        steps::ADMIN_GET_SESSION_FILE => add_session_file(ctx).await,
        steps::ADMIN_GET_SESSION_PHONE => add_session_phone(ctx).await,
        steps::ADMIN_GET_API_ID_HASH => get_api_id_and_hash(ctx).await,
        steps::ADMIN_GET_PROXY => get_proxy(ctx).await,
        steps::ADMIN_GET_LOGIN_CODE_APP => login_code_sign_in(ctx).await,
        steps::ADMIN_GET_LOGIN_CODE_SMS => login_code_sign_up(ctx).await,
        steps::ADMIN_GET_LOGIN_PASSWORD => login_password(ctx).await,
        _ => Ok(()),
    }
}

async fn send_screen(ctx: &DialogueContext<'_>, step: &str, vars: &[(&str, &str)]) -> AppResult<()> {
    messages::send_step(ctx.state.transport.as_ref(), &ctx.state.pool, ctx.chat_id, step, vars).await?;
    Ok(())
}

async fn user_info(ctx: &mut DialogueContext<'_>) -> AppResult<()> {
    let Some(target) = db::find_user(&ctx.state.pool, ctx.text.trim())? else {
        ctx.state.transport.send_message(ctx.chat_id, "❌ User not found", None).await;
        return Ok(());
    };

    if let Some(msg) = db::message_by_step(&ctx.state.pool, "admin-user-info")? {
        let user_id = target.chat_id.to_string();
        let balance = target.balance.to_string();
        let total_pay = db::user_total_paid(&ctx.state.pool, target.id)?.to_string();
        let total_orders = db::count_user_orders(&ctx.state.pool, target.id)?.to_string();
        let username = target.username.clone().unwrap_or_default();
        let text = messages::render(
            &msg.text,
            &[
                ("user_id", &user_id),
                ("name", &target.first_name),
                ("last_name", &target.last_name),
                ("username", &username),
                ("balance", &balance),
                ("total_pay", &total_pay),
                ("created", &target.created_at),
                ("total_orders_cnt", &total_orders),
            ],
        );
        ctx.state.transport.send_message(ctx.chat_id, &text, None).await;
    }
    Ok(())
}

/// Country code chosen earlier in the flow, or reset the flow if the
/// scratchpad entry is gone.
async fn flow_product(ctx: &DialogueContext<'_>) -> AppResult<Option<db::Product>> {
    let country_code = ctx
        .state
        .scratchpad
        .get_field_str(ctx.chat_id, steps::scratch::ADD_SESSION, "country_code");
    let product = match country_code {
        Some(code) => db::product_by_country(&ctx.state.pool, &code)?,
        None => None,
    };
    if product.is_none() {
        send_screen(ctx, "admin-back-to-add-session", &[]).await?;
        db::update_user_step(&ctx.state.pool, ctx.chat_id, steps::ADMIN_HOME)?;
    }
    Ok(product)
}

/// Stash the created session and advance to the api-credentials prompt.
async fn advance_to_api_prompt(ctx: &DialogueContext<'_>, session_id: i64, session_type: &str) -> AppResult<()> {
    ctx.state
        .scratchpad
        .set_field(ctx.chat_id, steps::scratch::ADD_SESSION, "session_id", json!(session_id), None);
    ctx.state
        .scratchpad
        .set_field(ctx.chat_id, steps::scratch::ADD_SESSION, "type", json!(session_type), None);
    send_screen(ctx, steps::ADMIN_GET_API_ID_HASH, &[]).await?;
    db::update_user_step(&ctx.state.pool, ctx.chat_id, steps::ADMIN_GET_API_ID_HASH)?;
    Ok(())
}

async fn add_session_string(ctx: &mut DialogueContext<'_>) -> AppResult<()> {
    if !validators::run(&[Validator::SessionStringFormat], ctx).await? {
        return Ok(());
    }
    let Some(product) = flow_product(ctx).await? else {
        return Ok(());
    };

    let session = db::create_session(&ctx.state.pool, product.id, "", ctx.text.trim(), SessionStatus::Unknown)?;
    let check = manager::check_session_status(&ctx.state.pool, &ctx.state.client_factory, session.id).await?;
    if !check.usable {
        return send_screen(ctx, "general-format-error", &[]).await;
    }
    if let Some(phone) = check.phone {
        db::update_session_phone(&ctx.state.pool, session.id, &phone)?;
    }
    advance_to_api_prompt(ctx, session.id, "add-string").await
}

async fn add_session_file(ctx: &mut DialogueContext<'_>) -> AppResult<()> {
    if !validators::run(&[Validator::FileFormat], ctx).await? {
        return Ok(());
    }
    let Some(product) = flow_product(ctx).await? else {
        return Ok(());
    };
    let Some(doc) = ctx.document.clone() else {
        return Ok(());
    };

    let Some(content) = ctx.state.transport.download_file(&doc.file_id).await else {
        return send_screen(ctx, "general-format-error", &[]).await;
    };

    let dir = PathBuf::from(&*config::SESSION_FILES_DIR);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(&doc.file_name);
    std::fs::write(&path, &content)?;

    let extracted = manager::extract_from_session_file(&ctx.state.client_factory, &path).await?;
    let _ = std::fs::remove_file(&path);

    let Some(extracted) = extracted else {
        return send_screen(ctx, "general-format-error", &[]).await;
    };

    let session = db::create_session(
        &ctx.state.pool,
        product.id,
        &extracted.phone,
        &extracted.session_string,
        SessionStatus::Active,
    )?;
    advance_to_api_prompt(ctx, session.id, "add-file").await
}

async fn add_session_phone(ctx: &mut DialogueContext<'_>) -> AppResult<()> {
    let checks = [Validator::PhoneFormat, Validator::PhoneCountryCode];
    if !validators::run(&checks, ctx).await? {
        return Ok(());
    }
    let Some(product) = flow_product(ctx).await? else {
        return Ok(());
    };

    let phone = validators::strip_phone(&ctx.text);
    let session = db::create_session(&ctx.state.pool, product.id, &phone, "", SessionStatus::Unknown)?;
    advance_to_api_prompt(ctx, session.id, "add-phone").await
}

fn flow_session_id(ctx: &DialogueContext<'_>) -> Option<i64> {
    ctx.state
        .scratchpad
        .get_field_i64(ctx.chat_id, steps::scratch::ADD_SESSION, "session_id")
}

async fn get_api_id_and_hash(ctx: &mut DialogueContext<'_>) -> AppResult<()> {
    if !validators::run(&[Validator::ApiIdHash], ctx).await? {
        return Ok(());
    }
    let Some(session_id) = flow_session_id(ctx) else {
        send_screen(ctx, "admin-back-to-add-session", &[]).await?;
        db::update_user_step(&ctx.state.pool, ctx.chat_id, steps::ADMIN_HOME)?;
        return Ok(());
    };

    if !ctx.text.contains(config::provisioning::USE_DEFAULT_SENTINEL) {
        let mut parts = ctx.text.trim().split('\n');
        let api_id: i64 = parts.next().unwrap_or_default().trim().parse().unwrap_or_default();
        let api_hash = parts.next().unwrap_or_default().trim();
        db::update_session_credentials(&ctx.state.pool, session_id, api_id, api_hash)?;
    }

    send_screen(ctx, steps::ADMIN_GET_PROXY, &[]).await?;
    db::update_user_step(&ctx.state.pool, ctx.chat_id, steps::ADMIN_GET_PROXY)?;
    Ok(())
}

async fn get_proxy(ctx: &mut DialogueContext<'_>) -> AppResult<()> {
    if !validators::run(&[Validator::Proxy], ctx).await? {
        return Ok(());
    }
    let Some(session_id) = flow_session_id(ctx) else {
        send_screen(ctx, "admin-back-to-add-session", &[]).await?;
        db::update_user_step(&ctx.state.pool, ctx.chat_id, steps::ADMIN_HOME)?;
        return Ok(());
    };

    if !ctx.text.contains(config::provisioning::USE_DEFAULT_SENTINEL) {
        db::update_session_proxy(&ctx.state.pool, session_id, ctx.text.trim())?;
    }

    let session_type = ctx
        .state
        .scratchpad
        .get_field_str(ctx.chat_id, steps::scratch::ADD_SESSION, "type")
        .unwrap_or_default();

    if session_type != "add-phone" {
        // Token and file sessions are already authorized; the record is done
        send_screen(ctx, "admin-add-session-success", &[]).await?;
        db::update_user_step(&ctx.state.pool, ctx.chat_id, steps::ADMIN_ADD_SESSION)?;
        return Ok(());
    }

    send_login_code(ctx, session_id).await
}

/// Start the phone login: spin up the chat's worker and request a code.
async fn send_login_code(ctx: &mut DialogueContext<'_>, session_id: i64) -> AppResult<()> {
    let Some(session) = db::session_by_id(&ctx.state.pool, session_id)? else {
        return Ok(());
    };

    let wait_msg = ctx.state.transport.send_message(ctx.chat_id, "⏳", None).await;
    ctx.state.logins.begin(ctx.chat_id);

    let phone = session.phone.clone();
    let config = manager::config_for(&session);
    let result = ctx
        .state
        .logins
        .execute(ctx.chat_id, |reply| LoginCommand::SendCode { config, phone, reply })
        .await;

    if let Some(message_id) = wait_msg {
        ctx.state.transport.delete_message(ctx.chat_id, message_id).await;
    }

    match result {
        Some(Ok(StageOutcome::CodeSent { channel })) => {
            let next_step = match channel {
                CodeChannel::Sms => steps::ADMIN_GET_LOGIN_CODE_SMS,
                CodeChannel::App => steps::ADMIN_GET_LOGIN_CODE_APP,
            };
            send_screen(ctx, next_step, &[]).await?;
            db::update_user_step(&ctx.state.pool, ctx.chat_id, next_step)?;
        }
        Some(Err(_)) | None => {
            ctx.state.logins.close(ctx.chat_id);
            send_screen(ctx, "invalid-phone-error", &[]).await?;
        }
        Some(Ok(other)) => {
            log::error!("Unexpected send-code outcome: {:?}", other);
            ctx.state.logins.close(ctx.chat_id);
        }
    }
    Ok(())
}

/// Persist the exported token and finish the flow.
async fn finish_authorized(ctx: &DialogueContext<'_>, token: &str, password: Option<&str>) -> AppResult<()> {
    if let Some(session_id) = flow_session_id(ctx) {
        db::store_session_token(&ctx.state.pool, session_id, token, password)?;
    }
    ctx.state.logins.close(ctx.chat_id);
    ctx.state.scratchpad.remove(ctx.chat_id, steps::scratch::ADD_SESSION);
    send_screen(ctx, "admin-add-session-success", &[]).await?;
    db::update_user_step(&ctx.state.pool, ctx.chat_id, steps::ADMIN_ADD_SESSION)?;
    Ok(())
}

async fn login_code_sign_in(ctx: &mut DialogueContext<'_>) -> AppResult<()> {
    let checks = [Validator::LoginCode, Validator::LoginWorkerPresent];
    if !validators::run(&checks, ctx).await? {
        return Ok(());
    }

    let phone = flow_phone(ctx)?;
    let code = crate::telegram::dispatch::normalize_digits(ctx.text.trim());
    let result = ctx
        .state
        .logins
        .execute(ctx.chat_id, |reply| LoginCommand::SignIn { phone, code, reply })
        .await;

    match result {
        Some(Ok(StageOutcome::Authorized { session_string })) => finish_authorized(ctx, &session_string, None).await,
        Some(Err(SignInErrorKind::PasswordRequired { hint })) => {
            send_screen(ctx, steps::ADMIN_GET_LOGIN_PASSWORD, &[("hint", &hint)]).await?;
            db::update_user_step(&ctx.state.pool, ctx.chat_id, steps::ADMIN_GET_LOGIN_PASSWORD)?;
            Ok(())
        }
        Some(Err(e)) => {
            ctx.state.transport.send_message(ctx.chat_id, &e.to_string(), None).await;
            Ok(())
        }
        Some(Ok(other)) => {
            log::error!("Unexpected sign-in outcome: {:?}", other);
            Ok(())
        }
        None => reset_expired_flow(ctx).await,
    }
}

async fn login_code_sign_up(ctx: &mut DialogueContext<'_>) -> AppResult<()> {
    let checks = [Validator::LoginCode, Validator::LoginWorkerPresent];
    if !validators::run(&checks, ctx).await? {
        return Ok(());
    }

    let phone = flow_phone(ctx)?;
    let code = crate::telegram::dispatch::normalize_digits(ctx.text.trim());
    let first_name = pick_first_name();
    let result = ctx
        .state
        .logins
        .execute(ctx.chat_id, |reply| LoginCommand::SignUp {
            phone,
            code,
            first_name,
            reply,
        })
        .await;

    match result {
        Some(Ok(StageOutcome::Authorized { session_string })) => finish_authorized(ctx, &session_string, None).await,
        Some(Err(e)) => {
            ctx.state.transport.send_message(ctx.chat_id, &e.to_string(), None).await;
            Ok(())
        }
        Some(Ok(other)) => {
            log::error!("Unexpected sign-up outcome: {:?}", other);
            Ok(())
        }
        None => reset_expired_flow(ctx).await,
    }
}

async fn login_password(ctx: &mut DialogueContext<'_>) -> AppResult<()> {
    if !validators::run(&[Validator::LoginWorkerPresent], ctx).await? {
        return Ok(());
    }

    let password = ctx.text.trim().to_string();
    let result = ctx
        .state
        .logins
        .execute(ctx.chat_id, |reply| LoginCommand::CheckPassword {
            password: password.clone(),
            reply,
        })
        .await;

    match result {
        Some(Ok(StageOutcome::Authorized { session_string })) => {
            finish_authorized(ctx, &session_string, Some(&password)).await
        }
        Some(Err(SignInErrorKind::InvalidPassword)) => {
            send_screen(ctx, steps::ADMIN_GET_LOGIN_PASSWORD, &[("hint", "❌ Invalid Password")]).await
        }
        Some(Err(e)) => {
            ctx.state.transport.send_message(ctx.chat_id, &e.to_string(), None).await;
            Ok(())
        }
        Some(Ok(other)) => {
            log::error!("Unexpected password outcome: {:?}", other);
            Ok(())
        }
        None => reset_expired_flow(ctx).await,
    }
}

fn flow_phone(ctx: &DialogueContext<'_>) -> AppResult<String> {
    let session = flow_session_id(ctx).and_then(|id| db::session_by_id(&ctx.state.pool, id).ok().flatten());
    Ok(session.map(|s| s.phone).unwrap_or_default())
}

async fn reset_expired_flow(ctx: &DialogueContext<'_>) -> AppResult<()> {
    send_screen(ctx, "admin-back-to-add-session", &[]).await?;
    db::update_user_step(&ctx.state.pool, ctx.chat_id, steps::ADMIN_HOME)?;
    Ok(())
}

const SIGNUP_FIRST_NAMES: &[&str] = &["Alex", "Sam", "Jamie", "Taylor", "Jordan", "Casey", "Robin", "Charlie"];

fn pick_first_name() -> String {
    use rand::seq::SliceRandom;
    let mut rng = rand::thread_rng();
    SIGNUP_FIRST_NAMES
        .choose(&mut rng)
        .copied()
        .unwrap_or("Alex")
        .to_string()
}

/// An admin reply to a forwarded ticket is copied back to its author. The
/// ticket header carries the author's chat id on its first line.
pub async fn respond_to_ticket(ctx: &DialogueContext<'_>) -> AppResult<()> {
    let Some(reply) = &ctx.reply_to else {
        return Ok(());
    };
    let Some(target) = ticket_user_id(&reply.text) else {
        log::warn!("Ticket reply in chat {} has no parseable user id", ctx.chat_id);
        return Ok(());
    };

    ctx.state.transport.copy_message(target, ctx.chat_id, ctx.message_id).await;
    send_screen(ctx, "admin-respond-success-ticket", &[]).await?;
    Ok(())
}

/// Chat id from a ticket header line shaped like `user_id: 12345`.
pub fn ticket_user_id(text: &str) -> Option<i64> {
    for line in text.lines() {
        if !line.to_lowercase().contains("user") {
            continue;
        }
        let digits: String = line.chars().filter(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            return digits.parse().ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ticket_user_id() {
        assert_eq!(ticket_user_id("user_id: 12345\nname: Alice"), Some(12345));
        assert_eq!(ticket_user_id("User 777 sent a ticket\nmore"), Some(777));
        assert_eq!(ticket_user_id("no id here"), None);
    }
}
