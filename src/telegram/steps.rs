//! Dialogue step names and callback payload prefixes
//!
//! Steps name screens; a chat is always parked on exactly one. The literal
//! values also key the templated-message store, so they are part of the
//! deployed data contract and must not change casually.

pub const HOME_PAGE: &str = "home-page";

/// Menu key every `/start` variant collapses to.
pub const HOME_PAGE_KEY: &str = "/start";

// Admin console
pub const ADMIN_HOME: &str = "admin-home";
pub const ADMIN_GET_USER_INFO: &str = "admin-get-user-info";
pub const ADMIN_ADD_SESSION: &str = "admin-add-session";
pub const ADMIN_GET_SESSION_STRING: &str = "admin-get-session-string";
pub const ADMIN_GET_SESSION_FILE: &str = "admin-get-session-file";
pub const ADMIN_GET_SESSION_PHONE: &str = "admin-get-session-phone";
pub const ADMIN_GET_API_ID_HASH: &str = "admin-get-api-id-hash";
pub const ADMIN_GET_PROXY: &str = "admin-get-proxy";
pub const ADMIN_GET_LOGIN_CODE_APP: &str = "admin-get-login-code-app";
pub const ADMIN_GET_LOGIN_CODE_SMS: &str = "admin-get-login-code-sms";
pub const ADMIN_GET_LOGIN_PASSWORD: &str = "admin-get-login-password";

// Payment flows
pub const PM_GET_EVOUCHER: &str = "perfectmoney-get-evoucher";
pub const PM_GET_ACTIVATION_CODE: &str = "perfectmoney-get-activation-code";
pub const CRYPTO_GET_AMOUNT: &str = "crypto-get-amount";
pub const RIAL_GET_AMOUNT: &str = "rial-get-amount";

/// Prefix of the synthetic per-admin ticket steps (`ticket-admin-<chat id>`).
pub const TICKET_ADMIN_PREFIX: &str = "ticket-admin-";

// Callback payloads
pub mod callback {
    pub const COUNTRY_PREFIX: &str = "country-";
    pub const BACK_TO_COUNTRIES: &str = "back_to_show_countrys";
    pub const LOGIN_CODE_PREFIX: &str = "login_code-";
    pub const ADD_SESSION_COUNTRY_PREFIX: &str = "add-session-country-";
    pub const BLOCK_USER: &str = "block_user";
    pub const UNBLOCK_USER: &str = "unblock_user";
    pub const ENABLE_BOT: &str = "enable_bot";
    pub const UPDATE_BOT: &str = "update_bot";
    pub const LANG_ENGLISH: &str = "english";
    pub const LANG_PERSIAN: &str = "persian";
}

// Scratchpad namespaces and counter keys
pub mod scratch {
    pub const ADD_SESSION: &str = "add:session";

    pub fn payment_spam_key(chat_id: i64) -> String {
        format!("payment_spam_count_{chat_id}")
    }

    pub const GLOBAL_PAYMENT_SPAM: &str = "global_payment_spam_count";

    pub fn login_code_key(chat_id: i64, phone: &str) -> String {
        format!("{chat_id}:order:get:login:code:{phone}")
    }
}
