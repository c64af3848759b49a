//! Payment rate limiting
//!
//! Two fixed windows guard the payment entry points: a per-chat counter and
//! a global one. A breach pins the counter above its threshold so repeat
//! attempts stay blocked for the remainder of the window, and the deadline
//! is deliberately left alone — retrying must not extend the block. The
//! warning screen is sent once per window.

use crate::core::config::rate_limit;
use crate::core::AppResult;
use crate::telegram::dispatch::DialogueContext;
use crate::telegram::messages;
use crate::telegram::steps;

async fn warn(ctx: &DialogueContext<'_>) -> AppResult<()> {
    messages::send_step(
        ctx.state.transport.as_ref(),
        &ctx.state.pool,
        ctx.chat_id,
        "anti-pay-spam-msg",
        &[],
    )
    .await?;
    Ok(())
}

/// Gate one payment attempt for this chat. Returns false when blocked.
pub async fn allow_payment_attempt(ctx: &DialogueContext<'_>) -> AppResult<bool> {
    let pad = &ctx.state.scratchpad;

    let user_key = steps::scratch::payment_spam_key(ctx.chat_id);
    let count = pad.counter_get_or_init(&user_key, rate_limit::payment_window());
    if count > rate_limit::PAYMENT_THRESHOLD {
        if count == rate_limit::PAYMENT_THRESHOLD + 1 {
            warn(ctx).await?;
            pad.counter_pin_above(&user_key, rate_limit::PAYMENT_THRESHOLD + 1);
        }
        return Ok(false);
    }
    pad.counter_incr(&user_key, rate_limit::payment_window());

    let global_key = steps::scratch::GLOBAL_PAYMENT_SPAM;
    let count = pad.counter_get_or_init(global_key, rate_limit::global_payment_window());
    if count > rate_limit::GLOBAL_PAYMENT_THRESHOLD {
        if count == rate_limit::GLOBAL_PAYMENT_THRESHOLD + 1 {
            warn(ctx).await?;
            pad.counter_pin_above(global_key, rate_limit::GLOBAL_PAYMENT_THRESHOLD + 1);
        }
        return Ok(false);
    }
    pad.counter_incr(global_key, rate_limit::global_payment_window());

    Ok(true)
}
