//! Messaging-platform client abstraction
//!
//! Provisioning talks to the external platform through [`SessionClient`] so
//! the login protocol can be exercised against a scripted double in tests.
//! The grammers-backed implementation keeps the login/password tokens as
//! internal state; callers only ever pass strings across the trait.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use grammers_client::{Client, Config, InitParams, SignInError};
use grammers_session::{PackedChat, PackedType, Session};
use std::path::PathBuf;

use crate::core::config;
use crate::core::{AppError, AppResult};

/// Where a fresh connection gets its platform session from.
#[derive(Debug, Clone)]
pub enum SessionSource {
    /// Brand new session (phone-number login path)
    Fresh,
    /// Durable token exported by a previous login
    Token(String),
    /// Session file uploaded by an admin
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub api_id: i64,
    pub api_hash: String,
    pub source: SessionSource,
    /// Persisted for the record; connection-level proxying is handled by the
    /// deployment, not per session.
    pub proxy: String,
}

/// Which channel the platform delivered the login code on. SMS delivery
/// means the number has no account yet and must go down the sign-up path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeChannel {
    App,
    Sms,
}

/// Failure modes of the staged login protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInErrorKind {
    /// Account has a cloud password; caller must continue with it
    PasswordRequired { hint: String },
    SignUpRequired,
    SignUpUnsupported,
    InvalidCode,
    ExpiredCode,
    InvalidPassword,
    InvalidPhone,
    FloodWait,
    Other(String),
}

impl std::fmt::Display for SignInErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PasswordRequired { .. } => write!(f, "two-factor password required"),
            Self::SignUpRequired => write!(f, "number is not registered"),
            Self::SignUpUnsupported => write!(f, "sign-up is not supported"),
            Self::InvalidCode => write!(f, "login code invalid"),
            Self::ExpiredCode => write!(f, "login code expired"),
            Self::InvalidPassword => write!(f, "password invalid"),
            Self::InvalidPhone => write!(f, "phone number invalid"),
            Self::FloodWait => write!(f, "flood wait, try later"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

#[async_trait]
pub trait SessionClient: Send {
    /// Open the platform connection described by `config`.
    async fn connect(&mut self, config: &SessionConfig) -> AppResult<()>;

    /// Phone number of the authorized account, when the platform exposes it.
    async fn self_phone(&mut self) -> AppResult<Option<String>>;

    /// Request a login code for a phone number.
    async fn send_code(&mut self, phone: &str) -> Result<CodeChannel, SignInErrorKind>;

    /// Complete login with the received code.
    async fn sign_in(&mut self, phone: &str, code: &str) -> Result<(), SignInErrorKind>;

    /// Register a fresh number delivered over SMS.
    async fn sign_up(&mut self, phone: &str, code: &str, first_name: &str) -> Result<(), SignInErrorKind>;

    /// Continue a `PasswordRequired` login with the cloud password.
    async fn check_password(&mut self, password: &str) -> Result<(), SignInErrorKind>;

    /// Export the durable session token for storage.
    async fn export_session_string(&mut self) -> AppResult<String>;

    /// Text of the most recent platform service message (login codes arrive
    /// there), or None when the history is empty.
    async fn latest_service_message(&mut self) -> AppResult<Option<String>>;

    /// Tear the connection down. Must be safe to call when never connected.
    async fn disconnect(&mut self);
}

/// Factory handed to the login registry so each worker builds its own client.
pub type ClientFactory = std::sync::Arc<dyn Fn() -> Box<dyn SessionClient> + Send + Sync>;

/// Peer id the platform delivers service notifications from.
const SERVICE_NOTIFICATIONS_USER: i64 = 777000;

/// Production client backed by grammers MTProto.
#[derive(Default)]
pub struct GrammersClient {
    client: Option<Client>,
    login_token: Option<grammers_client::types::LoginToken>,
    password_token: Option<grammers_client::types::PasswordToken>,
}

impl GrammersClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory() -> ClientFactory {
        std::sync::Arc::new(|| Box::new(GrammersClient::new()))
    }

    fn client(&self) -> AppResult<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Provision("client is not connected".to_string()))
    }
}

fn classify(message: &str) -> SignInErrorKind {
    let upper = message.to_uppercase();
    if upper.contains("PHONE_CODE_EXPIRED") {
        SignInErrorKind::ExpiredCode
    } else if upper.contains("PHONE_CODE_INVALID") {
        SignInErrorKind::InvalidCode
    } else if upper.contains("PHONE_NUMBER_INVALID") || upper.contains("PHONE_NUMBER_BANNED") {
        SignInErrorKind::InvalidPhone
    } else if upper.contains("FLOOD") {
        SignInErrorKind::FloodWait
    } else {
        SignInErrorKind::Other(message.to_string())
    }
}

#[async_trait]
impl SessionClient for GrammersClient {
    async fn connect(&mut self, config: &SessionConfig) -> AppResult<()> {
        let session = match &config.source {
            SessionSource::Fresh => Session::new(),
            SessionSource::Token(token) => {
                let bytes = BASE64
                    .decode(token.trim())
                    .map_err(|e| AppError::Provision(format!("Malformed session token: {e}")))?;
                Session::load(&bytes).map_err(|e| AppError::Provision(format!("Failed to load session: {e}")))?
            }
            SessionSource::File(path) => {
                Session::load_file(path).map_err(|e| AppError::Provision(format!("Failed to load session file: {e}")))?
            }
        };

        let client = Client::connect(Config {
            session,
            api_id: config.api_id as i32,
            api_hash: config.api_hash.clone(),
            params: InitParams {
                device_model: config::provisioning::DEVICE_MODEL.to_string(),
                system_version: config::provisioning::SYSTEM_VERSION.to_string(),
                app_version: env!("CARGO_PKG_VERSION").to_string(),
                system_lang_code: "en".to_string(),
                lang_code: "en".to_string(),
                ..Default::default()
            },
        })
        .await
        .map_err(|e| AppError::Provision(format!("Failed to connect: {e}")))?;

        self.client = Some(client);
        Ok(())
    }

    async fn self_phone(&mut self) -> AppResult<Option<String>> {
        let me = self
            .client()?
            .get_me()
            .await
            .map_err(|e| AppError::Provision(format!("get_me failed: {e}")))?;
        Ok(me.phone().map(str::to_string))
    }

    async fn send_code(&mut self, phone: &str) -> Result<CodeChannel, SignInErrorKind> {
        let client = self.client.as_ref().ok_or(SignInErrorKind::Other("not connected".to_string()))?;
        let token = client
            .request_login_code(phone)
            .await
            .map_err(|e| classify(&e.to_string()))?;
        self.login_token = Some(token);
        // The platform does not disclose the delivery channel here; numbers
        // without an account surface as SignUpRequired at the sign-in stage.
        Ok(CodeChannel::App)
    }

    async fn sign_in(&mut self, _phone: &str, code: &str) -> Result<(), SignInErrorKind> {
        let client = self.client.as_ref().ok_or(SignInErrorKind::Other("not connected".to_string()))?;
        let token = self
            .login_token
            .as_ref()
            .ok_or(SignInErrorKind::ExpiredCode)?;
        match client.sign_in(token, code).await {
            Ok(_) => Ok(()),
            Err(SignInError::PasswordRequired(password_token)) => {
                self.password_token = Some(password_token);
                Err(SignInErrorKind::PasswordRequired { hint: String::new() })
            }
            Err(SignInError::SignUpRequired { .. }) => Err(SignInErrorKind::SignUpRequired),
            Err(SignInError::InvalidCode) => Err(SignInErrorKind::InvalidCode),
            Err(SignInError::InvalidPassword) => Err(SignInErrorKind::InvalidPassword),
            Err(other) => Err(classify(&other.to_string())),
        }
    }

    async fn sign_up(&mut self, _phone: &str, _code: &str, _first_name: &str) -> Result<(), SignInErrorKind> {
        // The platform library carries no registration call; fresh numbers
        // must be registered in an official app first.
        Err(SignInErrorKind::SignUpUnsupported)
    }

    async fn check_password(&mut self, password: &str) -> Result<(), SignInErrorKind> {
        let client = self.client.as_ref().ok_or(SignInErrorKind::Other("not connected".to_string()))?;
        let token = self
            .password_token
            .take()
            .ok_or(SignInErrorKind::Other("no pending password challenge".to_string()))?;
        match client.check_password(token, password).await {
            Ok(_) => Ok(()),
            Err(SignInError::InvalidPassword) => Err(SignInErrorKind::InvalidPassword),
            Err(other) => Err(classify(&other.to_string())),
        }
    }

    async fn export_session_string(&mut self) -> AppResult<String> {
        let client = self.client()?;
        Ok(BASE64.encode(client.session().save()))
    }

    async fn latest_service_message(&mut self) -> AppResult<Option<String>> {
        let client = self.client()?;
        let peer = PackedChat {
            ty: PackedType::User,
            id: SERVICE_NOTIFICATIONS_USER,
            access_hash: None,
        };
        let mut history = client.iter_messages(peer).limit(1);
        match history.next().await {
            Ok(Some(message)) => Ok(Some(message.text().to_string())),
            Ok(None) => Ok(None),
            Err(e) => Err(AppError::Provision(format!("history fetch failed: {e}"))),
        }
    }

    async fn disconnect(&mut self) {
        // Dropping the handle closes the connection
        self.login_token = None;
        self.password_token = None;
        self.client = None;
    }
}
