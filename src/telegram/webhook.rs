//! Webhook ingress
//!
//! Telegram POSTs updates here. The body is acknowledged immediately and
//! processed on a spawned task: a slow handler must never make Telegram
//! retry the update, and a malformed body is logged, not bounced.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use teloxide::types::{MaybeInaccessibleMessage, Message, Update, UpdateKind};
use tokio::net::TcpListener;

use crate::core::AppResult;
use crate::telegram::dispatch::{self, AppState, DocumentInfo, ReplyInfo};

/// Start the webhook server. Runs until the listener dies.
pub async fn run(port: u16, state: Arc<AppState>) -> AppResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let app = Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    log::info!("Starting webhook server on http://{}", addr);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(|e| crate::core::AppError::Io(std::io::Error::other(e)))?;
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn webhook_handler(State(state): State<Arc<AppState>>, Json(body): Json<serde_json::Value>) -> impl IntoResponse {
    match serde_json::from_value::<Update>(body) {
        Ok(update) => {
            tokio::spawn(async move {
                if let Err(e) = process_update(&state, update).await {
                    log::error!("Update processing failed: {}", e);
                }
            });
        }
        Err(e) => {
            log::warn!("Ignoring unparseable update: {}", e);
        }
    }
    // Telegram retries anything but a 2xx, so even bad bodies are accepted
    (StatusCode::OK, "ok")
}

fn document_info(msg: &Message) -> Option<DocumentInfo> {
    let doc = msg.document()?;
    Some(DocumentInfo {
        file_id: doc.file.id.0.clone(),
        file_name: doc.file_name.clone().unwrap_or_default(),
        file_size: doc.file.size,
        mime_type: doc.mime_type.as_ref().map(|m| m.to_string()).unwrap_or_default(),
    })
}

async fn process_update(state: &AppState, update: Update) -> AppResult<()> {
    match update.kind {
        UpdateKind::Message(msg) => {
            let Some(from) = &msg.from else {
                return Ok(());
            };
            let text = msg.text().or_else(|| msg.caption()).unwrap_or_default().to_string();
            let reply_to = msg.reply_to_message().map(|reply| ReplyInfo {
                message_id: reply.id.0,
                text: reply.text().or_else(|| reply.caption()).unwrap_or_default().to_string(),
            });
            let document = document_info(&msg);

            dispatch::handle_text_update(
                state,
                msg.chat.id.0,
                msg.id.0,
                text,
                from.username.clone(),
                from.first_name.clone(),
                from.last_name.clone().unwrap_or_default(),
                reply_to,
                document,
            )
            .await
        }

        UpdateKind::CallbackQuery(query) => {
            let Some(message) = &query.message else {
                return Ok(());
            };
            let chat_id = message.chat().id.0;
            let message_id = message.id().0;
            let message_text = match message {
                MaybeInaccessibleMessage::Regular(msg) => {
                    msg.text().or_else(|| msg.caption()).unwrap_or_default().to_string()
                }
                MaybeInaccessibleMessage::Inaccessible(_) => String::new(),
            };
            let Some(data) = query.data.clone() else {
                return Ok(());
            };

            dispatch::handle_callback_update(
                state,
                query.from.id.0 as i64,
                chat_id,
                message_id,
                query.id.0.clone(),
                data,
                message_text,
            )
            .await
        }

        _ => Ok(()),
    }
}
