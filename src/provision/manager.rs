//! Provisioning operations built on top of [`SessionClient`]
//!
//! Everything here follows the same shape: build a client from the stored
//! session record, perform one operation, record the outcome. The
//! connectivity check is the only place a session is ever downgraded to
//! `disabled` outside the order path.

use std::path::Path;

use crate::core::AppResult;
use crate::provision::client::{ClientFactory, SessionConfig, SessionSource};
use crate::storage::db::{self, AccountSession, DbPool, SessionStatus};

/// Session config for reconnecting to an already-provisioned account.
pub fn config_for(session: &AccountSession) -> SessionConfig {
    let source = if session.session_string.is_empty() {
        SessionSource::Fresh
    } else {
        SessionSource::Token(session.session_string.clone())
    };
    SessionConfig {
        api_id: session.api_id,
        api_hash: session.api_hash.clone(),
        source,
        proxy: session.proxy.clone(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCheck {
    pub usable: bool,
    pub phone: Option<String>,
}

/// Connect with the stored token and confirm the account answers.
///
/// Success never touches the status, so a row reserved at `wait` stays
/// invisible to other buyers for the whole order path. An unreachable
/// session is retired to `disabled`.
pub async fn check_reserved_session(pool: &DbPool, factory: &ClientFactory, session_id: i64) -> AppResult<SessionCheck> {
    let Some(session) = db::session_by_id(pool, session_id)? else {
        return Ok(SessionCheck { usable: false, phone: None });
    };

    let mut client = factory();
    let result = async {
        client.connect(&config_for(&session)).await?;
        client.self_phone().await
    }
    .await;
    client.disconnect().await;

    match result {
        Ok(phone) => Ok(SessionCheck { usable: true, phone }),
        Err(e) => {
            log::warn!("Session {} failed connectivity check: {}", session_id, e);
            db::set_session_status(pool, session_id, SessionStatus::Disabled)?;
            Ok(SessionCheck { usable: false, phone: None })
        }
    }
}

/// Connectivity check for the import flows: a reachable account is promoted
/// to `active`, a failure marks it `disabled`.
pub async fn check_session_status(pool: &DbPool, factory: &ClientFactory, session_id: i64) -> AppResult<SessionCheck> {
    let check = check_reserved_session(pool, factory, session_id).await?;
    if check.usable {
        db::set_session_status(pool, session_id, SessionStatus::Active)?;
    }
    Ok(check)
}

/// Extracted token and phone from an uploaded session file.
pub struct ExtractedSession {
    pub session_string: String,
    pub phone: String,
}

/// Connect with an uploaded session file and export the durable token.
pub async fn extract_from_session_file(factory: &ClientFactory, path: &Path) -> AppResult<Option<ExtractedSession>> {
    let config = SessionConfig {
        api_id: *crate::core::config::provisioning::DEFAULT_API_ID,
        api_hash: crate::core::config::provisioning::DEFAULT_API_HASH.clone(),
        source: SessionSource::File(path.to_path_buf()),
        proxy: String::new(),
    };

    let mut client = factory();
    let result = async {
        client.connect(&config).await?;
        let phone = client.self_phone().await?.unwrap_or_default();
        let session_string = client.export_session_string().await?;
        Ok::<_, crate::core::AppError>(ExtractedSession { session_string, phone })
    }
    .await;
    client.disconnect().await;

    match result {
        Ok(extracted) => Ok(Some(extracted)),
        Err(e) => {
            log::warn!("Session file extraction failed: {}", e);
            Ok(None)
        }
    }
}

/// First run of up to five digits in a service message.
fn first_code(text: &str) -> Option<String> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            if digits.len() < 5 {
                digits.push(ch);
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

/// Pull the latest login code delivered to a purchased account.
pub async fn retrieve_login_code(pool: &DbPool, factory: &ClientFactory, phone: &str) -> AppResult<Option<String>> {
    let Some(session) = db::session_by_phone(pool, phone)? else {
        return Ok(None);
    };

    let mut client = factory();
    let result = async {
        client.connect(&config_for(&session)).await?;
        client.latest_service_message().await
    }
    .await;
    client.disconnect().await;

    match result {
        Ok(Some(text)) => Ok(first_code(&text)),
        Ok(None) => Ok(None),
        Err(e) => {
            log::warn!("Login code retrieval for {} failed: {}", phone, e);
            Ok(None)
        }
    }
}
