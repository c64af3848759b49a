//! Validation pipeline
//!
//! Handlers declare an ordered list of checks; the first failing check sends
//! its own error screen and stops both the pipeline and the handler. The
//! chat's step is left untouched on failure, so the user can simply try
//! again — except where a check explicitly resets an expired flow.

use crate::core::config;
use crate::core::AppResult;
use crate::storage::db;
use crate::telegram::dispatch::{normalize_digits, DialogueContext};
use crate::telegram::messages;
use crate::telegram::steps;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    /// Buyer balance must cover the cheapest purchasable product. Staff skip.
    Balance,
    /// At least one session anywhere must be purchasable.
    InventoryExists,
    /// Payment amount: numeric, at most 10 characters, above the minimum.
    MinAmount { min_key: MinAmountKind },
    /// Exactly 10 digits.
    EvoucherLength,
    /// Exactly 16 digits.
    ActivationCodeLength,
    /// Digits-only phone, between 11 and 14 digits after stripping.
    PhoneFormat,
    /// Phone prefix must match the country picked earlier in the flow.
    PhoneCountryCode,
    /// Either the default sentinel or "<api_id>\n<api_hash>".
    ApiIdHash,
    /// Either the default sentinel or "host:port[:user:pass]".
    Proxy,
    /// Exactly 5 digits.
    LoginCode,
    /// The chat's login worker must still be alive; resets the flow if not.
    LoginWorkerPresent,
    /// Durable session tokens are never shorter than this.
    SessionStringFormat,
    /// Uploaded document must look like a session file.
    FileFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinAmountKind {
    Dollar,
    Rial,
}

impl MinAmountKind {
    fn min(&self) -> f64 {
        match self {
            Self::Dollar => *config::payment::MIN_DOLLAR_AMOUNT,
            Self::Rial => *config::payment::MIN_RIAL_AMOUNT,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Dollar => "dollar",
            Self::Rial => "rial",
        }
    }
}

pub fn strip_phone(text: &str) -> String {
    text.replace([' ', '-'], "").trim().to_string()
}

async fn send_error(ctx: &DialogueContext<'_>, step: &str, vars: &[(&str, &str)]) -> AppResult<()> {
    messages::send_step(ctx.state.transport.as_ref(), &ctx.state.pool, ctx.chat_id, step, vars).await?;
    Ok(())
}

/// Run the pipeline; Ok(true) means every check passed.
pub async fn run(validators: &[Validator], ctx: &DialogueContext<'_>) -> AppResult<bool> {
    for validator in validators {
        if !check(*validator, ctx).await? {
            return Ok(false);
        }
    }
    Ok(true)
}

async fn check(validator: Validator, ctx: &DialogueContext<'_>) -> AppResult<bool> {
    let pool = &ctx.state.pool;
    let text = ctx.text.trim();

    match validator {
        Validator::Balance => {
            if ctx.user.is_staff {
                return Ok(true);
            }
            let Some(price) = db::cheapest_active_price(pool)? else {
                // No inventory at all; the next check owns that message
                return Ok(true);
            };
            if ctx.user.balance < price {
                send_error(ctx, "insufficient-balance-message", &[]).await?;
                return Ok(false);
            }
            Ok(true)
        }

        Validator::InventoryExists => {
            if db::any_active_session(pool)? {
                return Ok(true);
            }
            if ctx.callback.is_some() {
                ctx.state
                    .transport
                    .clear_inline_keyboard(ctx.chat_id, ctx.message_id)
                    .await;
            }
            ctx.state.transport.delete_message(ctx.chat_id, ctx.message_id).await;
            send_error(ctx, "product-not-found-error", &[]).await?;
            Ok(false)
        }

        Validator::MinAmount { min_key } => {
            let normalized = normalize_digits(text);
            match normalized.parse::<f64>() {
                Ok(amount) if amount >= min_key.min() && normalized.len() <= 10 => Ok(true),
                Ok(_) => {
                    let min = min_key.min().to_string();
                    send_error(
                        ctx,
                        "min-amount-limit-error",
                        &[("min_amount", &min), ("pay_type", min_key.label())],
                    )
                    .await?;
                    Ok(false)
                }
                Err(_) => {
                    send_error(ctx, "invalid-amount-format-error", &[]).await?;
                    Ok(false)
                }
            }
        }

        Validator::EvoucherLength => {
            let normalized = normalize_digits(text);
            if normalized.parse::<u64>().is_err() {
                send_error(ctx, "invalid-amount-format-error", &[]).await?;
                return Ok(false);
            }
            if normalized.len() != 10 {
                send_error(ctx, "evoucher-length-error", &[]).await?;
                return Ok(false);
            }
            Ok(true)
        }

        Validator::ActivationCodeLength => {
            let normalized = normalize_digits(text);
            if normalized.parse::<u64>().is_err() {
                send_error(ctx, "invalid-amount-format-error", &[]).await?;
                return Ok(false);
            }
            if normalized.len() != 16 {
                send_error(ctx, "activation-code-length-error", &[]).await?;
                return Ok(false);
            }
            Ok(true)
        }

        Validator::PhoneFormat => {
            let phone = strip_phone(text);
            if !(10 < phone.len() && phone.len() < 15) || !phone.chars().all(|c| c.is_ascii_digit()) {
                send_error(ctx, "phone-number-fmt-error", &[]).await?;
                return Ok(false);
            }
            Ok(true)
        }

        Validator::PhoneCountryCode => {
            let phone = strip_phone(text);
            let country_code =
                ctx.state
                    .scratchpad
                    .get_field_str(ctx.chat_id, steps::scratch::ADD_SESSION, "country_code");
            let product = match country_code {
                Some(code) => db::product_by_country(pool, &code)?,
                None => None,
            };
            match product {
                Some(product) if phone.get(..2) == product.phone_code.get(..2) => Ok(true),
                _ => {
                    send_error(ctx, "phone-number-country-error", &[]).await?;
                    Ok(false)
                }
            }
        }

        Validator::ApiIdHash => {
            if text.contains(config::provisioning::USE_DEFAULT_SENTINEL) {
                return Ok(true);
            }
            let parts: Vec<&str> = text.split('\n').collect();
            if parts.len() != 2 || parts[0].trim().parse::<i64>().is_err() {
                send_error(ctx, "input-apis-format-error", &[]).await?;
                return Ok(false);
            }
            Ok(true)
        }

        Validator::Proxy => {
            if text.contains(config::provisioning::USE_DEFAULT_SENTINEL) {
                return Ok(true);
            }
            let fields = text.split(':').count();
            if fields != 2 && fields != 4 {
                send_error(ctx, "general-format-error", &[]).await?;
                return Ok(false);
            }
            Ok(true)
        }

        Validator::LoginCode => {
            let normalized = normalize_digits(text);
            if normalized.len() != 5 || normalized.parse::<u32>().is_err() {
                send_error(ctx, "general-format-error", &[]).await?;
                return Ok(false);
            }
            Ok(true)
        }

        Validator::LoginWorkerPresent => {
            if ctx.state.logins.contains(ctx.chat_id) {
                return Ok(true);
            }
            // The worker is gone; the exchange cannot continue
            send_error(ctx, "admin-back-to-add-session", &[]).await?;
            db::update_user_step(pool, ctx.chat_id, steps::ADMIN_HOME)?;
            Ok(false)
        }

        Validator::SessionStringFormat => {
            if text.len() < 300 {
                send_error(ctx, "general-format-error", &[]).await?;
                return Ok(false);
            }
            Ok(true)
        }

        Validator::FileFormat => {
            let ok = ctx
                .document
                .as_ref()
                .map(|doc| doc.file_size > 1 && doc.file_name.ends_with(".session"))
                .unwrap_or(false);
            if !ok {
                send_error(ctx, "general-format-error", &[]).await?;
                return Ok(false);
            }
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_phone_separators() {
        assert_eq!(strip_phone(" 1 202-555-0123 "), "12025550123");
    }
}
