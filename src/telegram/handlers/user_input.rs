//! Step continuations for regular users
//!
//! Free text only means something when the chat is parked on a step that
//! expects input. Unknown steps are a deliberate no-op: replying "I don't
//! understand" to every stray message is worse than silence.

use serde_json::json;

use crate::core::config;
use crate::core::AppResult;
use crate::storage::db;
use crate::telegram::dispatch::{normalize_digits, DialogueContext};
use crate::telegram::messages;
use crate::telegram::rate_limit;
use crate::telegram::steps;
use crate::telegram::validators::{self, MinAmountKind, Validator};

pub async fn handle(ctx: &mut DialogueContext<'_>) -> AppResult<()> {
    match ctx.user.step.as_str() {
        steps::PM_GET_EVOUCHER => perfectmoney_get_evoucher(ctx).await,
        steps::PM_GET_ACTIVATION_CODE => perfectmoney_get_activation_code(ctx).await,
        steps::CRYPTO_GET_AMOUNT => checkout_amount(ctx, MinAmountKind::Dollar).await,
        steps::RIAL_GET_AMOUNT => checkout_amount(ctx, MinAmountKind::Rial).await,
        step if step.starts_with(steps::TICKET_ADMIN_PREFIX) => ticket_message(ctx).await,
        _ => Ok(()),
    }
}

const PM_NAMESPACE: &str = "perfectmoney";

async fn perfectmoney_get_evoucher(ctx: &mut DialogueContext<'_>) -> AppResult<()> {
    if !rate_limit::allow_payment_attempt(ctx).await? {
        return Ok(());
    }
    if !validators::run(&[Validator::EvoucherLength], ctx).await? {
        return Ok(());
    }

    let evoucher = normalize_digits(ctx.text.trim());
    let payment_id = db::create_voucher_payment(&ctx.state.pool, ctx.user.id, &evoucher)?;
    ctx.state.scratchpad.set_field(
        ctx.chat_id,
        PM_NAMESPACE,
        "payment_id",
        json!(payment_id),
        Some(config::rate_limit::payment_window()),
    );

    messages::send_step(
        ctx.state.transport.as_ref(),
        &ctx.state.pool,
        ctx.chat_id,
        "perfectmoney-get-evcode",
        &[],
    )
    .await?;
    db::update_user_step(&ctx.state.pool, ctx.chat_id, steps::PM_GET_ACTIVATION_CODE)?;
    Ok(())
}

async fn perfectmoney_get_activation_code(ctx: &mut DialogueContext<'_>) -> AppResult<()> {
    if !validators::run(&[Validator::ActivationCodeLength], ctx).await? {
        return Ok(());
    }

    let Some(payment_id) = ctx.state.scratchpad.get_field_i64(ctx.chat_id, PM_NAMESPACE, "payment_id") else {
        messages::send_step(
            ctx.state.transport.as_ref(),
            &ctx.state.pool,
            ctx.chat_id,
            "expired_order",
            &[],
        )
        .await?;
        db::update_user_step(&ctx.state.pool, ctx.chat_id, steps::HOME_PAGE)?;
        return Ok(());
    };

    let activation_code = normalize_digits(ctx.text.trim());
    db::set_voucher_activation_code(&ctx.state.pool, payment_id, &activation_code)?;
    ctx.state.scratchpad.remove(ctx.chat_id, PM_NAMESPACE);

    db::update_user_step(&ctx.state.pool, ctx.chat_id, steps::HOME_PAGE)?;
    messages::send_step(
        ctx.state.transport.as_ref(),
        &ctx.state.pool,
        ctx.chat_id,
        "perfectmoney-success-recive-data",
        &[],
    )
    .await?;
    Ok(())
}

/// Shared shape of the two checkout flows: validate the amount, create the
/// transaction, hand over the payment URL screen.
async fn checkout_amount(ctx: &mut DialogueContext<'_>, kind: MinAmountKind) -> AppResult<()> {
    if !rate_limit::allow_payment_attempt(ctx).await? {
        return Ok(());
    }
    if !validators::run(&[Validator::MinAmount { min_key: kind }], ctx).await? {
        return Ok(());
    }

    let amount: f64 = match normalize_digits(ctx.text.trim()).parse() {
        Ok(amount) => amount,
        Err(_) => return Ok(()),
    };

    let wait_msg = ctx.state.transport.send_message(ctx.chat_id, "⏳", None).await;

    let gateway = match kind {
        MinAmountKind::Dollar => &ctx.state.crypto_gateway,
        MinAmountKind::Rial => &ctx.state.rial_gateway,
    };
    let result = gateway.create_transaction(ctx.chat_id, amount).await;

    if let Some(message_id) = wait_msg {
        ctx.state.transport.delete_message(ctx.chat_id, message_id).await;
    }

    let url = match result {
        Ok(url) => url,
        Err(e) => {
            log::warn!("Checkout creation for chat {} failed: {}", ctx.chat_id, e);
            messages::send_step(
                ctx.state.transport.as_ref(),
                &ctx.state.pool,
                ctx.chat_id,
                "create-payment-error",
                &[],
            )
            .await?;
            return Ok(());
        }
    };

    let screen = match kind {
        MinAmountKind::Dollar => "crypto-payment",
        MinAmountKind::Rial => "rial-payment",
    };
    if let Some(mut msg) = db::message_by_step(&ctx.state.pool, screen)? {
        if let Some(keys) = msg.keys.take() {
            msg.keys = Some(messages::render(&keys, &[("url", &url)]));
        }
        let user_id = ctx.chat_id.to_string();
        msg.text = messages::render(&msg.text, &[("user_id", &user_id)]);
        messages::deliver(ctx.state.transport.as_ref(), ctx.chat_id, &msg, &[]).await;
    }
    Ok(())
}

/// A chat parked on `ticket-admin-<id>` sends its next message to that
/// admin as a support ticket.
async fn ticket_message(ctx: &mut DialogueContext<'_>) -> AppResult<()> {
    let Some(admin_chat_id) = ctx
        .user
        .step
        .strip_prefix(steps::TICKET_ADMIN_PREFIX)
        .and_then(|id| id.parse::<i64>().ok())
    else {
        return Ok(());
    };
    if !db::admin_chat_ids(&ctx.state.pool)?.contains(&admin_chat_id) {
        log::warn!("Ticket step for chat {} points at a non-admin", ctx.chat_id);
        return Ok(());
    }

    let forwarded = ctx
        .state
        .transport
        .forward_message(admin_chat_id, ctx.chat_id, ctx.message_id)
        .await;

    messages::send_step(
        ctx.state.transport.as_ref(),
        &ctx.state.pool,
        ctx.chat_id,
        "send-success-ticket-msg",
        &[],
    )
    .await?;

    // Ticket header the admin can act on (and reply to)
    if let Some(msg) = db::message_by_step(&ctx.state.pool, "admin-ticket-info")? {
        let user_id = ctx.chat_id.to_string();
        let username = ctx.user.username.clone().unwrap_or_default();
        let text = messages::render(
            &msg.text,
            &[
                ("user_id", &user_id),
                ("name", &ctx.user.first_name),
                ("username", &username),
            ],
        );
        let markup = crate::telegram::keyboards::markup_for(&msg);
        match forwarded {
            Some(forwarded_id) => {
                ctx.state
                    .transport
                    .send_message_reply(admin_chat_id, &text, forwarded_id, markup)
                    .await;
            }
            None => {
                ctx.state.transport.send_message(admin_chat_id, &text, markup).await;
            }
        }
    }
    Ok(())
}
