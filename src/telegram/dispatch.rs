//! Update dispatch
//!
//! Every incoming update funnels through here. Text updates resolve in a
//! fixed order: menu keys first (they work from any step), then the admin
//! ticket-reply shortcut, then the admin step table, then the user step
//! table. A step with no registered continuation is a silent no-op.
//! Callback updates resolve by exact payload match first, then by the first
//! registered prefix that matches.

use std::sync::Arc;

use crate::core::AppResult;
use crate::payment::CheckoutGateway;
use crate::provision::{ClientFactory, LoginRegistry};
use crate::storage::db::{self, DbPool, User};
use crate::storage::scratchpad::Scratchpad;
use crate::telegram::handlers;
use crate::telegram::messages;
use crate::telegram::steps;
use crate::telegram::transport::Transport;

/// Shared services every handler can reach.
pub struct AppState {
    pub pool: DbPool,
    pub transport: Arc<dyn Transport>,
    pub scratchpad: Arc<Scratchpad>,
    pub logins: Arc<LoginRegistry>,
    pub client_factory: ClientFactory,
    pub crypto_gateway: Arc<dyn CheckoutGateway>,
    pub rial_gateway: Arc<dyn CheckoutGateway>,
}

#[derive(Debug, Clone)]
pub struct ReplyInfo {
    pub message_id: i32,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u32,
    pub mime_type: String,
}

#[derive(Debug, Clone)]
pub struct CallbackInfo {
    pub query_id: String,
    pub data: String,
}

/// Everything one update resolves to before a handler runs.
pub struct DialogueContext<'a> {
    pub state: &'a AppState,
    pub user: User,
    pub chat_id: i64,
    pub message_id: i32,
    pub text: String,
    pub reply_to: Option<ReplyInfo>,
    pub document: Option<DocumentInfo>,
    pub callback: Option<CallbackInfo>,
}

impl DialogueContext<'_> {
    /// Refresh the user row after a handler moved the step.
    pub fn reload_user(&mut self) -> AppResult<()> {
        if let Some(user) = db::get_user(&self.state.pool, self.chat_id)? {
            self.user = user;
        }
        Ok(())
    }

    pub async fn answer_callback(&self, text: &str, show_alert: bool) {
        if let Some(callback) = &self.callback {
            self.state
                .transport
                .answer_callback(&callback.query_id, Some(text), show_alert)
                .await;
        }
    }
}

/// Digits arrive in Persian numerals from some keyboards.
pub fn normalize_digits(text: &str) -> String {
    text.chars()
        .map(|ch| match ch {
            '۰' => '0',
            '۱' => '1',
            '۲' => '2',
            '۳' => '3',
            '۴' => '4',
            '۵' => '5',
            '۶' => '6',
            '۷' => '7',
            '۸' => '8',
            '۹' => '9',
            other => other,
        })
        .collect()
}

/// Maintenance mode hides the bot from everyone but staff.
async fn in_maintenance(ctx: &DialogueContext<'_>) -> AppResult<bool> {
    if ctx.user.is_staff {
        return Ok(false);
    }
    let (is_update, banner) = db::bot_update_status(&ctx.state.pool)?;
    if is_update {
        ctx.state.transport.send_message(ctx.chat_id, &banner, None).await;
        return Ok(true);
    }
    Ok(false)
}

/// Blocked users get their own message echoed back and nothing else.
async fn is_blocked(ctx: &DialogueContext<'_>) -> bool {
    if ctx.user.is_active {
        return false;
    }
    ctx.state
        .transport
        .forward_message(ctx.chat_id, ctx.chat_id, ctx.message_id)
        .await;
    true
}

/// First contact: park the chat on the language picker until a choice lands.
async fn needs_language_choice(ctx: &DialogueContext<'_>) -> AppResult<bool> {
    if ctx.user.language.is_some() {
        return Ok(false);
    }
    messages::send_step(
        ctx.state.transport.as_ref(),
        &ctx.state.pool,
        ctx.chat_id,
        "choice-language",
        &[],
    )
    .await?;
    Ok(true)
}

/// Entry point for message updates.
pub async fn handle_text_update(
    state: &AppState,
    chat_id: i64,
    message_id: i32,
    text: String,
    username: Option<String>,
    first_name: String,
    last_name: String,
    reply_to: Option<ReplyInfo>,
    document: Option<DocumentInfo>,
) -> AppResult<()> {
    let user = db::get_or_create_user(&state.pool, chat_id, username.as_deref(), &first_name, &last_name)?;
    let ctx = DialogueContext {
        state,
        user,
        chat_id,
        message_id,
        text,
        reply_to,
        document,
        callback: None,
    };

    if in_maintenance(&ctx).await? || is_blocked(&ctx).await {
        return Ok(());
    }
    if needs_language_choice(&ctx).await? {
        return Ok(());
    }

    route_text(ctx).await
}

async fn route_text(mut ctx: DialogueContext<'_>) -> AppResult<()> {
    // Deep-link arguments after /start are irrelevant to routing
    let key = if ctx.text.contains("/start") {
        steps::HOME_PAGE_KEY.to_string()
    } else {
        ctx.text.clone()
    };

    let menu_step = db::menu_step_for_key(&ctx.state.pool, &key)?;
    if let Some(step) = &menu_step {
        if step.starts_with("admin") && !ctx.user.is_staff {
            return Ok(());
        }
    }
    if menu_step.is_some() || ctx.text.contains("/start") {
        ctx.text = key;
        return handlers::menu::handle_menu_press(&mut ctx).await;
    }

    if ctx.user.is_staff {
        if ctx.reply_to.is_some() {
            return handlers::admin_step::respond_to_ticket(&ctx).await;
        }
        if ctx.user.step.starts_with("admin") {
            return handlers::admin_step::handle(&mut ctx).await;
        }
    }

    handlers::user_input::handle(&mut ctx).await
}

/// Entry point for callback-query updates.
pub async fn handle_callback_update(
    state: &AppState,
    from_chat_id: i64,
    chat_id: i64,
    message_id: i32,
    query_id: String,
    data: String,
    message_text: String,
) -> AppResult<()> {
    let Some(user) = db::get_user(&state.pool, from_chat_id)? else {
        log::warn!("Callback from unknown chat {}", from_chat_id);
        return Ok(());
    };

    let mut ctx = DialogueContext {
        state,
        user,
        chat_id,
        message_id,
        text: message_text,
        reply_to: None,
        document: None,
        callback: Some(CallbackInfo { query_id, data }),
    };

    if in_maintenance(&ctx).await? || is_blocked(&ctx).await {
        return Ok(());
    }
    if ctx.user.language.is_none() {
        return handlers::user_callback::store_language_choice(&mut ctx).await;
    }

    handlers::user_callback::handle(&mut ctx).await?;
    if ctx.user.is_staff {
        handlers::admin_callback::handle(&mut ctx).await?;
    }
    Ok(())
}
