//! Checkout gateways
//!
//! Top-ups leave the bot through an external checkout page; the bot only
//! creates the transaction and hands the buyer a URL. Both gateways speak
//! the same minimal JSON contract, so they share one implementation shape.

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::config;
use crate::core::{AppError, AppResult};

#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    /// Create a pending transaction and return the checkout URL.
    async fn create_transaction(&self, chat_id: i64, amount: f64) -> AppResult<String>;
}

#[derive(Deserialize)]
struct CheckoutResponse {
    url: String,
}

async fn create_checkout(http: &reqwest::Client, endpoint: &str, chat_id: i64, amount: f64) -> AppResult<String> {
    if endpoint.is_empty() {
        return Err(AppError::Provision("checkout endpoint is not configured".to_string()));
    }
    let response = http
        .post(endpoint)
        .json(&serde_json::json!({ "chat_id": chat_id, "amount": amount }))
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(AppError::Provision(format!(
            "checkout endpoint returned {}",
            response.status()
        )));
    }
    let body: CheckoutResponse = response.json().await?;
    Ok(body.url)
}

/// Crypto checkout.
pub struct CryptoGateway {
    http: reqwest::Client,
}

impl CryptoGateway {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for CryptoGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckoutGateway for CryptoGateway {
    async fn create_transaction(&self, chat_id: i64, amount: f64) -> AppResult<String> {
        create_checkout(&self.http, &config::payment::CRYPTO_GATEWAY_URL, chat_id, amount).await
    }
}

/// Rial checkout.
pub struct RialGateway {
    http: reqwest::Client,
}

impl RialGateway {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for RialGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckoutGateway for RialGateway {
    async fn create_transaction(&self, chat_id: i64, amount: f64) -> AppResult<String> {
        create_checkout(&self.http, &config::payment::RIAL_GATEWAY_URL, chat_id, amount).await
    }
}
