use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// Database file path
/// Read from DATABASE_PATH environment variable
/// Default: database.sqlite
pub static DATABASE_PATH: Lazy<String> =
    Lazy::new(|| env::var("DATABASE_PATH").unwrap_or_else(|_| "database.sqlite".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: app.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "app.log".to_string()));

/// Port the webhook HTTP server listens on
/// Read from WEBHOOK_PORT environment variable, default 8080
pub static WEBHOOK_PORT: Lazy<u16> = Lazy::new(|| {
    env::var("WEBHOOK_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
});

/// Optional custom Bot API server URL (local bot-api instance)
pub static BOT_API_URL: Lazy<Option<String>> = Lazy::new(|| env::var("BOT_API_URL").ok());

/// Optional SOCKS5 proxy for outbound Telegram traffic ("host:port")
///
/// Honored by the HTTP transport only; MTProto sessions carry their own
/// per-session proxy descriptor.
pub static PROXY_SOCKS: Lazy<Option<String>> = Lazy::new(|| env::var("PROXY_SOCKS").ok());

/// Scratch directory for uploaded session files before token extraction
pub static SESSION_FILES_DIR: Lazy<String> =
    Lazy::new(|| env::var("SESSION_FILES_DIR").unwrap_or_else(|_| "/tmp/simbazar-sessions".to_string()));

/// Provisioning defaults used when the admin answers a credentials/proxy
/// prompt with the "use default" sentinel.
pub mod provisioning {
    use super::{env, Lazy};

    /// Literal the admin sends to accept the configured default value.
    pub const USE_DEFAULT_SENTINEL: &str = "default";

    /// Default application api id for new sessions
    pub static DEFAULT_API_ID: Lazy<i64> = Lazy::new(|| {
        env::var("DEFAULT_API_ID")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2_040)
    });

    /// Default application api hash for new sessions
    pub static DEFAULT_API_HASH: Lazy<String> =
        Lazy::new(|| env::var("DEFAULT_API_HASH").unwrap_or_else(|_| String::new()));

    /// Default proxy descriptor ("host:port" or "host:port:user:pass")
    pub static DEFAULT_PROXY: Lazy<String> =
        Lazy::new(|| env::var("DEFAULT_PROXY").unwrap_or_else(|_| String::new()));

    /// Device fingerprint reported by provisioned clients
    pub const DEVICE_MODEL: &str = "Simbazar";
    pub const SYSTEM_VERSION: &str = "1.0";
}

/// Payment configuration (trigger points only; gateway math lives elsewhere)
pub mod payment {
    use super::{env, Lazy};

    /// Minimum accepted dollar top-up amount
    pub static MIN_DOLLAR_AMOUNT: Lazy<f64> = Lazy::new(|| {
        env::var("MIN_DOLLAR_PAY_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5.0)
    });

    /// Minimum accepted rial top-up amount
    pub static MIN_RIAL_AMOUNT: Lazy<f64> = Lazy::new(|| {
        env::var("MIN_RIAL_PAY_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100_000.0)
    });

    /// Crypto checkout endpoint
    pub static CRYPTO_GATEWAY_URL: Lazy<String> =
        Lazy::new(|| env::var("CRYPTO_GATEWAY_URL").unwrap_or_else(|_| String::new()));

    /// Rial checkout endpoint
    pub static RIAL_GATEWAY_URL: Lazy<String> =
        Lazy::new(|| env::var("RIAL_GATEWAY_URL").unwrap_or_else(|_| String::new()));
}

/// Rate limiting configuration
pub mod rate_limit {
    use super::{env, Duration, Lazy};

    /// Fixed window for per-chat payment attempts
    pub const PAYMENT_WINDOW_SECS: u64 = 30 * 60;

    /// Payment attempts allowed inside one window per chat
    pub const PAYMENT_THRESHOLD: i64 = 3;

    /// Fixed window for the global payment counter
    pub const GLOBAL_PAYMENT_WINDOW_SECS: u64 = 60 * 60;

    /// Payment attempts allowed inside one window across all chats
    pub const GLOBAL_PAYMENT_THRESHOLD: i64 = 30;

    /// How many times a buyer may pull the login code for one order
    pub static LOGIN_CODE_LIMIT: Lazy<i64> = Lazy::new(|| {
        env::var("GET_LOGIN_CODE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3)
    });

    /// How long a purchased number keeps its login-code counter
    pub const LOGIN_CODE_WINDOW_SECS: u64 = 24 * 60 * 60;

    pub fn login_code_window() -> Duration {
        Duration::from_secs(LOGIN_CODE_WINDOW_SECS)
    }

    /// Payment window duration
    pub fn payment_window() -> Duration {
        Duration::from_secs(PAYMENT_WINDOW_SECS)
    }

    /// Global payment window duration
    pub fn global_payment_window() -> Duration {
        Duration::from_secs(GLOBAL_PAYMENT_WINDOW_SECS)
    }
}

/// Network configuration
pub mod network {
    use super::Duration;

    /// Timeout for outbound Bot API calls
    pub const TIMEOUT_SECS: u64 = 100;

    pub fn timeout() -> Duration {
        Duration::from_secs(TIMEOUT_SECS)
    }
}
