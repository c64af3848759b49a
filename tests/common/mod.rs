//! Shared fixtures: a recording transport, a scripted platform client, and
//! a seeded in-memory application state.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use simbazar::core::AppResult;
use simbazar::payment::CheckoutGateway;
use simbazar::provision::client::{CodeChannel, SessionClient, SessionConfig, SignInErrorKind};
use simbazar::provision::LoginRegistry;
use simbazar::storage::db::{self, DbPool};
use simbazar::storage::scratchpad::Scratchpad;
use simbazar::telegram::{AppState, Transport};
use teloxide::types::{InlineKeyboardMarkup, ReplyMarkup};

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub chat_id: i64,
    pub text: String,
    pub reply_to: Option<i32>,
    pub has_markup: bool,
}

/// Transport double that records every outbound call.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<SentMessage>>,
    pub edits: Mutex<Vec<(i64, i32, String)>>,
    pub callbacks: Mutex<Vec<(String, String, bool)>>,
    pub forwards: Mutex<Vec<(i64, i64, i32)>>,
    pub copies: Mutex<Vec<(i64, i64, i32)>>,
    pub deletes: Mutex<Vec<(i64, i32)>>,
    pub file_content: Mutex<Option<Vec<u8>>>,
    next_id: AtomicI32,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicI32::new(1000),
            ..Self::default()
        })
    }

    pub fn sent_texts(&self, chat_id: i64) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .map(|m| m.text.clone())
            .collect()
    }

    pub fn sent_count(&self, chat_id: i64) -> usize {
        self.sent.lock().unwrap().iter().filter(|m| m.chat_id == chat_id).count()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_message(&self, chat_id: i64, text: &str, markup: Option<ReplyMarkup>) -> Option<i32> {
        self.sent.lock().unwrap().push(SentMessage {
            chat_id,
            text: text.to_string(),
            reply_to: None,
            has_markup: markup.is_some(),
        });
        Some(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn send_message_reply(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: i32,
        markup: Option<ReplyMarkup>,
    ) -> Option<i32> {
        self.sent.lock().unwrap().push(SentMessage {
            chat_id,
            text: text.to_string(),
            reply_to: Some(reply_to),
            has_markup: markup.is_some(),
        });
        Some(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        _markup: Option<InlineKeyboardMarkup>,
    ) -> bool {
        self.edits.lock().unwrap().push((chat_id, message_id, text.to_string()));
        true
    }

    async fn clear_inline_keyboard(&self, _chat_id: i64, _message_id: i32) {}

    async fn delete_message(&self, chat_id: i64, message_id: i32) {
        self.deletes.lock().unwrap().push((chat_id, message_id));
    }

    async fn forward_message(&self, to_chat: i64, from_chat: i64, message_id: i32) -> Option<i32> {
        self.forwards.lock().unwrap().push((to_chat, from_chat, message_id));
        Some(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn copy_message(&self, to_chat: i64, from_chat: i64, message_id: i32) -> Option<i32> {
        self.copies.lock().unwrap().push((to_chat, from_chat, message_id));
        Some(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn answer_callback(&self, query_id: &str, text: Option<&str>, show_alert: bool) {
        self.callbacks.lock().unwrap().push((
            query_id.to_string(),
            text.unwrap_or_default().to_string(),
            show_alert,
        ));
    }

    async fn download_file(&self, _file_id: &str) -> Option<Vec<u8>> {
        self.file_content.lock().unwrap().clone()
    }
}

/// How the scripted platform client behaves.
#[derive(Debug, Clone)]
pub struct ClientScript {
    pub connect_ok: bool,
    pub phone: Option<String>,
    pub accepted_code: String,
    pub password_required: bool,
    pub accepted_password: String,
    pub service_message: Option<String>,
    pub exported_token: String,
}

impl Default for ClientScript {
    fn default() -> Self {
        Self {
            connect_ok: true,
            phone: Some("12025550123".to_string()),
            accepted_code: "12345".to_string(),
            password_required: false,
            accepted_password: "hunter2".to_string(),
            service_message: Some("Login code: 73914. Do not share it.".to_string()),
            exported_token: "x".repeat(320),
        }
    }
}

pub struct ScriptedClient {
    script: ClientScript,
    code_ok: bool,
}

#[async_trait]
impl SessionClient for ScriptedClient {
    async fn connect(&mut self, _config: &SessionConfig) -> AppResult<()> {
        if self.script.connect_ok {
            Ok(())
        } else {
            Err(simbazar::AppError::Provision("connection refused".to_string()))
        }
    }

    async fn self_phone(&mut self) -> AppResult<Option<String>> {
        Ok(self.script.phone.clone())
    }

    async fn send_code(&mut self, _phone: &str) -> Result<CodeChannel, SignInErrorKind> {
        Ok(CodeChannel::App)
    }

    async fn sign_in(&mut self, _phone: &str, code: &str) -> Result<(), SignInErrorKind> {
        if code != self.script.accepted_code {
            return Err(SignInErrorKind::InvalidCode);
        }
        self.code_ok = true;
        if self.script.password_required {
            Err(SignInErrorKind::PasswordRequired { hint: "pet name".to_string() })
        } else {
            Ok(())
        }
    }

    async fn sign_up(&mut self, _phone: &str, _code: &str, _first_name: &str) -> Result<(), SignInErrorKind> {
        Err(SignInErrorKind::SignUpUnsupported)
    }

    async fn check_password(&mut self, password: &str) -> Result<(), SignInErrorKind> {
        if self.code_ok && password == self.script.accepted_password {
            Ok(())
        } else {
            Err(SignInErrorKind::InvalidPassword)
        }
    }

    async fn export_session_string(&mut self) -> AppResult<String> {
        Ok(self.script.exported_token.clone())
    }

    async fn latest_service_message(&mut self) -> AppResult<Option<String>> {
        Ok(self.script.service_message.clone())
    }

    async fn disconnect(&mut self) {}
}

/// Gateway double: records amounts, fails when no URL is configured.
pub struct ScriptedGateway {
    pub url: Option<String>,
    pub calls: Mutex<Vec<f64>>,
}

impl ScriptedGateway {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            url: Some("https://pay.example.com/tx/1".to_string()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            url: None,
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CheckoutGateway for ScriptedGateway {
    async fn create_transaction(&self, _chat_id: i64, amount: f64) -> AppResult<String> {
        self.calls.lock().unwrap().push(amount);
        self.url
            .clone()
            .ok_or_else(|| simbazar::AppError::Provision("gateway down".to_string()))
    }
}

pub struct TestApp {
    pub state: AppState,
    pub transport: Arc<RecordingTransport>,
    pub crypto: Arc<ScriptedGateway>,
    _tmp: tempfile::TempDir,
}

impl TestApp {
    pub fn pool(&self) -> &DbPool {
        &self.state.pool
    }
}

pub fn test_app(script: ClientScript) -> TestApp {
    let tmp = tempfile::tempdir().expect("tempdir");
    let db_path = tmp.path().join("test.sqlite");
    let pool = simbazar::create_pool(db_path.to_str().expect("utf-8 path")).expect("pool");
    seed_messages(&pool);

    let transport = RecordingTransport::new();
    let crypto = ScriptedGateway::ok();
    let factory: simbazar::provision::ClientFactory = {
        let script = script.clone();
        Arc::new(move || {
            Box::new(ScriptedClient {
                script: script.clone(),
                code_ok: false,
            })
        })
    };

    let state = AppState {
        pool,
        transport: transport.clone(),
        scratchpad: Arc::new(Scratchpad::new()),
        logins: Arc::new(LoginRegistry::new(factory.clone())),
        client_factory: factory,
        crypto_gateway: crypto.clone(),
        rial_gateway: ScriptedGateway::ok(),
    };

    TestApp {
        state,
        transport,
        crypto,
        _tmp: tmp,
    }
}

fn seed(pool: &DbPool, step: &str, menu_key: Option<&str>, text: &str, keys: Option<&str>, inline: bool) {
    db::upsert_message(pool, step, menu_key, text, keys, 2, inline).expect("seed message");
}

/// Minimal screen set covering the flows under test.
pub fn seed_messages(pool: &DbPool) {
    seed(pool, "home-page", Some("/start"), "Welcome to the shop", Some("🛍 Buy\n👤 Profile"), false);
    seed(pool, "choice-language", None, "Choose a language", Some("English:english\nفارسی:persian"), true);
    seed(pool, "buy_phone_number", Some("🛍 Buy"), "Pick a country", None, true);
    seed(pool, "user_profile", Some("👤 Profile"), "id: {user_id}\norders: {total_order}\nbalance: {balance}", None, false);
    seed(pool, "crypto-get-amount", Some("💳 Top up"), "Send the amount in dollars", None, false);
    seed(pool, "crypto-payment", None, "Pay here, {user_id}", Some("Pay:url:{url}"), true);
    seed(pool, "create-payment-error", None, "Payment creation failed", None, false);
    seed(pool, "anti-pay-spam-msg", None, "Too many payment attempts, wait a bit", None, false);
    seed(pool, "invalid-amount-format-error", None, "That is not a number", None, false);
    seed(pool, "min-amount-limit-error", None, "Minimum is {min_amount} {pay_type}", None, false);
    seed(pool, "insufficient-balance-message", None, "Balance too low", None, false);
    seed(pool, "product-not-found-error", None, "Nothing in stock", None, false);
    seed(pool, "show-phone-number", None, "Your number: {phone}", Some("Get code:login_code-{phone}"), true);
    seed(pool, "show-login-code", None, "Code: {code}\nPassword: {password}", Some("Again:login_code-{phone}"), true);
    seed(pool, "limit-login-code-error", None, "Login code limit reached", None, false);
    seed(pool, "expired_order", None, "This flow has expired", None, false);

    // Admin console
    seed(pool, "admin-home", Some("/admin"), "Admin console", Some("➕ Add session\n📊 Stats"), false);
    seed(
        pool,
        "admin_add_session_phone_get_country",
        Some("➕ Add by phone"),
        "Pick the country",
        None,
        true,
    );
    seed(
        pool,
        "admin_add_session_string_get_country",
        Some("➕ Add by token"),
        "Pick the country",
        None,
        true,
    );
    seed(
        pool,
        "admin_add_session_file_get_country",
        Some("➕ Add by file"),
        "Pick the country",
        None,
        true,
    );
    seed(pool, "admin-get-session-phone", None, "Send the phone (+{country_phone_code}...)", None, false);
    seed(pool, "admin-get-session-string", None, "Send the session token", None, false);
    seed(pool, "admin-get-session-file", None, "Upload the .session file", None, false);
    seed(pool, "admin-get-api-id-hash", None, "Send api id and hash, or 'default'", None, false);
    seed(pool, "admin-get-proxy", None, "Send a proxy, or 'default'", None, false);
    seed(pool, "admin-get-login-code-app", None, "Send the code from the app", None, false);
    seed(pool, "admin-get-login-code-sms", None, "Send the code from the SMS", None, false);
    seed(pool, "admin-get-login-password", None, "Two-factor password needed. Hint: {hint}", None, false);
    seed(pool, "admin-add-session-success", None, "Session stored ✅", None, false);
    seed(pool, "admin-back-to-add-session", None, "That exchange expired, start over", None, false);
    seed(pool, "invalid-phone-error", None, "The platform rejected that phone", None, false);
    seed(pool, "general-format-error", None, "Wrong format", None, false);
    seed(pool, "phone-number-fmt-error", None, "That does not look like a phone", None, false);
    seed(pool, "phone-number-country-error", None, "Phone does not match the country", None, false);
    seed(pool, "input-apis-format-error", None, "Expected '<api id>\\n<api hash>'", None, false);
    seed(pool, "admin-get-user-info", Some("🔎 User info"), "Send a username or id", None, false);
    seed(pool, "admin-user-info", None, "user_id: {user_id}\nname: {name}\nbalance: {balance}", None, false);

    // Tickets
    seed(pool, "send-success-ticket-msg", None, "Ticket sent ✅", None, false);
    seed(
        pool,
        "admin-ticket-info",
        None,
        "user_id: {user_id}\nname: {name}\nusername: {username}",
        Some("Block:block_user\nUnblock:unblock_user"),
        true,
    );
    seed(pool, "admin-respond-success-ticket", None, "Reply delivered ✅", None, false);
}

/// Register a regular user with a chosen language.
pub fn seed_user(pool: &DbPool, chat_id: i64, balance: i64) {
    db::get_or_create_user(pool, chat_id, None, "Test", "User").expect("user");
    db::set_user_language(pool, chat_id, "en").expect("language");
    if balance != 0 {
        db::adjust_balance(pool, chat_id, balance).expect("balance");
    }
}

/// Register a staff user.
pub fn seed_admin(pool: &DbPool, chat_id: i64) {
    seed_user(pool, chat_id, 0);
    db::set_user_staff(pool, chat_id, true).expect("staff");
}

/// One product with `count` active sessions holding distinct phones.
pub fn seed_inventory(pool: &DbPool, country: &str, phone_code: &str, price: i64, count: usize) -> i64 {
    let product = db::create_product(pool, country.to_uppercase().as_str(), price, country, phone_code).expect("product");
    for i in 0..count {
        let phone = format!("{phone_code}20255501{i:02}");
        db::create_session(pool, product, &phone, &"t".repeat(320), db::SessionStatus::Active).expect("session");
    }
    product
}
