use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use std::str::FromStr;
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::core::{AppError, AppResult};

/// A Telegram account known to the bot.
///
/// `step` drives the dialogue engine: every completed interaction leaves the
/// chat parked on some screen, and the next free-text update is routed by it.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    /// Telegram chat id
    pub chat_id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: String,
    /// Current dialogue step (screen) for this chat
    pub step: String,
    /// Preferred language, None until the first-contact choice
    pub language: Option<String>,
    /// Internal balance in the shop currency
    pub balance: i64,
    /// Block flag: a blocked user's messages are echoed back to them
    pub is_active: bool,
    /// Staff accounts see the admin menu and step tables
    pub is_staff: bool,
    pub created_at: String,
}

/// A sellable inventory class: one country of phone numbers.
#[derive(Debug, Clone)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: i64,
    /// ISO-ish country code used in callback payloads ("us", "uk", ...)
    pub country_code: String,
    /// Leading dial digits a phone in this class must carry ("1", "44", ...)
    pub phone_code: String,
    pub is_active: bool,
}

/// Availability of a provisioned messaging-platform session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum SessionStatus {
    Unknown,
    Active,
    Disabled,
    /// Reserved by a buyer, order creation in flight
    Wait,
    Purchased,
}

/// A provisioned external messaging-platform identity held for resale.
///
/// Rows are never deleted; disabled records are retained for audit.
#[derive(Debug, Clone)]
pub struct AccountSession {
    pub id: i64,
    pub product_id: i64,
    pub phone: String,
    /// "host:port" or "host:port:user:pass"
    pub proxy: String,
    pub api_id: i64,
    pub api_hash: String,
    /// Durable opaque session token exported by the platform client
    pub session_string: String,
    /// Two-factor password, when one was set during provisioning
    pub password: String,
    pub status: SessionStatus,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    Waiting,
    Done,
    Rejected,
}

/// A completed purchase linking a buyer to a session.
///
/// `login_code` is filled in later by the retrieval action, independent of
/// the order status.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub session_id: i64,
    pub price: i64,
    pub login_code: String,
    pub track_id: String,
    pub status: OrderStatus,
    pub created_at: String,
}

/// One screen of the templated-message store.
///
/// `menu_key` is the literal button label that triggers this screen from
/// anywhere; `step` both names the screen and keys the step-continuation
/// tables. `keys` holds the keyboard mini-language, one `label:callback:url`
/// entry per line.
#[derive(Debug, Clone)]
pub struct TemplateMessage {
    pub id: i64,
    pub step: String,
    pub menu_key: Option<String>,
    pub text: String,
    pub keys: Option<String>,
    pub keys_per_row: usize,
    pub is_inline_keyboard: bool,
}

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Create a new database connection pool
///
/// Initializes a connection pool with up to 10 connections and runs schema
/// migrations on the first connection.
pub fn create_pool(database_path: &str) -> AppResult<DbPool> {
    let manager = SqliteConnectionManager::file(database_path);
    let pool = Pool::builder().max_size(10).build(manager)?;

    let conn = pool.get()?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    migrate_schema(&conn)?;

    Ok(pool)
}

/// Get a connection from the pool
pub fn get_connection(pool: &DbPool) -> Result<DbConnection, r2d2::Error> {
    pool.get()
}

/// Migrate database schema to ensure all required tables and columns exist.
/// Safe to run repeatedly; only additive changes are performed.
fn migrate_schema(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id INTEGER NOT NULL UNIQUE,
            username TEXT,
            first_name TEXT NOT NULL DEFAULT '',
            last_name TEXT NOT NULL DEFAULT '',
            step TEXT NOT NULL DEFAULT 'home-page',
            language TEXT,
            balance INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            is_staff INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            price INTEGER NOT NULL DEFAULT 0,
            country_code TEXT NOT NULL UNIQUE,
            phone_code TEXT NOT NULL DEFAULT '',
            is_active INTEGER NOT NULL DEFAULT 1
        );
        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            product_id INTEGER NOT NULL REFERENCES products(id),
            phone TEXT NOT NULL DEFAULT '',
            proxy TEXT NOT NULL DEFAULT '',
            api_id INTEGER NOT NULL DEFAULT 0,
            api_hash TEXT NOT NULL DEFAULT '',
            session_string TEXT NOT NULL DEFAULT '',
            password TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'unknown',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id),
            session_id INTEGER NOT NULL UNIQUE REFERENCES sessions(id),
            price INTEGER NOT NULL DEFAULT 0,
            login_code TEXT NOT NULL DEFAULT '',
            track_id TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'waiting',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            step TEXT NOT NULL,
            menu_key TEXT,
            text TEXT NOT NULL DEFAULT '',
            keys TEXT,
            keys_per_row INTEGER NOT NULL DEFAULT 2,
            is_inline_keyboard INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS voucher_payments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id),
            evoucher TEXT NOT NULL,
            activation_code TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE TABLE IF NOT EXISTS bot_status (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            is_update INTEGER NOT NULL DEFAULT 0,
            update_msg TEXT NOT NULL DEFAULT ''
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
        CREATE INDEX IF NOT EXISTS idx_messages_step ON messages(step);",
    )?;

    // Older databases predate the language column
    let mut stmt = conn.prepare("PRAGMA table_info(users)")?;
    let columns: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<_>>()?;
    if !columns.contains(&"language".to_string()) {
        log::info!("Adding missing column: language to users table");
        conn.execute("ALTER TABLE users ADD COLUMN language TEXT", [])?;
    }

    Ok(())
}

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        username: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        step: row.get(5)?,
        language: row.get(6)?,
        balance: row.get(7)?,
        is_active: row.get::<_, i64>(8)? != 0,
        is_staff: row.get::<_, i64>(9)? != 0,
        created_at: row.get(10)?,
    })
}

const USER_COLUMNS: &str =
    "id, chat_id, username, first_name, last_name, step, language, balance, is_active, is_staff, created_at";

/// Fetch a user by chat id.
pub fn get_user(pool: &DbPool, chat_id: i64) -> AppResult<Option<User>> {
    let conn = get_connection(pool)?;
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE chat_id = ?1"),
            params![chat_id],
            map_user,
        )
        .optional()?;
    Ok(user)
}

/// Fetch a user by chat id, creating the row on first contact.
///
/// New users land on the `home-page` step with the configured default
/// balance of zero.
pub fn get_or_create_user(
    pool: &DbPool,
    chat_id: i64,
    username: Option<&str>,
    first_name: &str,
    last_name: &str,
) -> AppResult<User> {
    if let Some(user) = get_user(pool, chat_id)? {
        return Ok(user);
    }

    let conn = get_connection(pool)?;
    // A colliding username belongs to someone else; fall back to the chat id
    let username = match username {
        Some(name) => {
            let taken: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE username = ?1",
                params![name],
                |row| row.get(0),
            )?;
            if taken > 0 {
                chat_id.to_string()
            } else {
                name.to_string()
            }
        }
        None => chat_id.to_string(),
    };

    conn.execute(
        "INSERT INTO users (chat_id, username, first_name, last_name, step) VALUES (?1, ?2, ?3, ?4, 'home-page')",
        params![chat_id, username, first_name, last_name],
    )?;
    log::info!("New user registered: chat_id={}", chat_id);

    // Release the connection before re-fetching; `get_user` checks out its
    // own and a size-1 pool would otherwise deadlock.
    drop(conn);
    get_user(pool, chat_id)?.ok_or_else(|| AppError::Validation(format!("user {chat_id} vanished after insert")))
}

/// Move a chat to a new dialogue step.
pub fn update_user_step(pool: &DbPool, chat_id: i64, step: &str) -> AppResult<()> {
    let conn = get_connection(pool)?;
    conn.execute("UPDATE users SET step = ?1 WHERE chat_id = ?2", params![step, chat_id])?;
    Ok(())
}

pub fn set_user_language(pool: &DbPool, chat_id: i64, language: &str) -> AppResult<()> {
    let conn = get_connection(pool)?;
    conn.execute(
        "UPDATE users SET language = ?1 WHERE chat_id = ?2",
        params![language, chat_id],
    )?;
    Ok(())
}

/// Flip the block flag for a chat.
pub fn set_user_active(pool: &DbPool, chat_id: i64, is_active: bool) -> AppResult<()> {
    let conn = get_connection(pool)?;
    conn.execute(
        "UPDATE users SET is_active = ?1 WHERE chat_id = ?2",
        params![is_active as i64, chat_id],
    )?;
    Ok(())
}

/// Grant or revoke the staff role.
pub fn set_user_staff(pool: &DbPool, chat_id: i64, is_staff: bool) -> AppResult<()> {
    let conn = get_connection(pool)?;
    conn.execute(
        "UPDATE users SET is_staff = ?1 WHERE chat_id = ?2",
        params![is_staff as i64, chat_id],
    )?;
    Ok(())
}

/// Find a user by username or by numeric chat id (admin lookup).
pub fn find_user(pool: &DbPool, needle: &str) -> AppResult<Option<User>> {
    let conn = get_connection(pool)?;
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1 OR chat_id = ?2"),
            params![needle, needle.parse::<i64>().unwrap_or(0)],
            map_user,
        )
        .optional()?;
    Ok(user)
}

/// Chat ids of all staff accounts, used for the synthetic ticket steps.
pub fn admin_chat_ids(pool: &DbPool) -> AppResult<Vec<i64>> {
    let conn = get_connection(pool)?;
    let mut stmt = conn.prepare("SELECT chat_id FROM users WHERE is_staff = 1")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

fn map_product(row: &rusqlite::Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        name: row.get(1)?,
        price: row.get(2)?,
        country_code: row.get(3)?,
        phone_code: row.get(4)?,
        is_active: row.get::<_, i64>(5)? != 0,
    })
}

const PRODUCT_COLUMNS: &str = "id, name, price, country_code, phone_code, is_active";

pub fn create_product(pool: &DbPool, name: &str, price: i64, country_code: &str, phone_code: &str) -> AppResult<i64> {
    let conn = get_connection(pool)?;
    conn.execute(
        "INSERT INTO products (name, price, country_code, phone_code) VALUES (?1, ?2, ?3, ?4)",
        params![name, price, country_code, phone_code],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn product_by_country(pool: &DbPool, country_code: &str) -> AppResult<Option<Product>> {
    let conn = get_connection(pool)?;
    let product = conn
        .query_row(
            &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE country_code = ?1"),
            params![country_code],
            map_product,
        )
        .optional()?;
    Ok(product)
}

/// All products, for the admin country picker.
pub fn all_products(pool: &DbPool) -> AppResult<Vec<Product>> {
    let conn = get_connection(pool)?;
    let mut stmt = conn.prepare(&format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY id"))?;
    let products = stmt.query_map([], map_product)?.collect::<rusqlite::Result<_>>()?;
    Ok(products)
}

/// Products that have at least one `active` session to sell.
pub fn active_countries(pool: &DbPool) -> AppResult<Vec<Product>> {
    let conn = get_connection(pool)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT p.id, p.name, p.price, p.country_code, p.phone_code, p.is_active
         FROM products p JOIN sessions s ON s.product_id = p.id
         WHERE s.status = 'active' AND p.is_active = 1
         ORDER BY p.id"
    ))?;
    let products = stmt.query_map([], map_product)?.collect::<rusqlite::Result<_>>()?;
    Ok(products)
}

/// Price of the cheapest product that still has inventory, for the
/// balance validator.
pub fn cheapest_active_price(pool: &DbPool) -> AppResult<Option<i64>> {
    let conn = get_connection(pool)?;
    let price = conn
        .query_row(
            "SELECT MIN(p.price) FROM products p JOIN sessions s ON s.product_id = p.id
             WHERE s.status = 'active' AND p.is_active = 1",
            [],
            |row| row.get::<_, Option<i64>>(0),
        )
        .optional()?
        .flatten();
    Ok(price)
}

/// Whether any product currently has an `active` session.
pub fn any_active_session(pool: &DbPool) -> AppResult<bool> {
    let conn = get_connection(pool)?;
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM sessions WHERE status = 'active'", [], |row| {
        row.get(0)
    })?;
    Ok(count > 0)
}

fn map_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccountSession> {
    let status: String = row.get(8)?;
    Ok(AccountSession {
        id: row.get(0)?,
        product_id: row.get(1)?,
        phone: row.get(2)?,
        proxy: row.get(3)?,
        api_id: row.get(4)?,
        api_hash: row.get(5)?,
        session_string: row.get(6)?,
        password: row.get(7)?,
        status: SessionStatus::from_str(&status).unwrap_or(SessionStatus::Unknown),
        created_at: row.get(9)?,
    })
}

const SESSION_COLUMNS: &str =
    "id, product_id, phone, proxy, api_id, api_hash, session_string, password, status, created_at";

/// Create a provisioning record. Defaults (api id/hash, proxy) are applied
/// here so later steps only overwrite when the admin supplies explicit
/// values.
pub fn create_session(
    pool: &DbPool,
    product_id: i64,
    phone: &str,
    session_string: &str,
    status: SessionStatus,
) -> AppResult<AccountSession> {
    let conn = get_connection(pool)?;
    conn.execute(
        "INSERT INTO sessions (product_id, phone, session_string, status, api_id, api_hash, proxy)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            product_id,
            phone,
            session_string,
            status.to_string(),
            *crate::core::config::provisioning::DEFAULT_API_ID,
            &*crate::core::config::provisioning::DEFAULT_API_HASH,
            &*crate::core::config::provisioning::DEFAULT_PROXY,
        ],
    )?;
    let id = conn.last_insert_rowid();
    drop(conn);
    session_by_id(pool, id)?.ok_or_else(|| AppError::Validation(format!("session {id} vanished after insert")))
}

pub fn session_by_id(pool: &DbPool, id: i64) -> AppResult<Option<AccountSession>> {
    let conn = get_connection(pool)?;
    let session = conn
        .query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
            params![id],
            map_session,
        )
        .optional()?;
    Ok(session)
}

pub fn session_by_phone(pool: &DbPool, phone: &str) -> AppResult<Option<AccountSession>> {
    let conn = get_connection(pool)?;
    let session = conn
        .query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE phone = ?1 ORDER BY id DESC LIMIT 1"),
            params![phone],
            map_session,
        )
        .optional()?;
    Ok(session)
}

pub fn update_session_phone(pool: &DbPool, id: i64, phone: &str) -> AppResult<()> {
    let conn = get_connection(pool)?;
    conn.execute("UPDATE sessions SET phone = ?1 WHERE id = ?2", params![phone, id])?;
    Ok(())
}

pub fn update_session_credentials(pool: &DbPool, id: i64, api_id: i64, api_hash: &str) -> AppResult<()> {
    let conn = get_connection(pool)?;
    conn.execute(
        "UPDATE sessions SET api_id = ?1, api_hash = ?2 WHERE id = ?3",
        params![api_id, api_hash, id],
    )?;
    Ok(())
}

pub fn update_session_proxy(pool: &DbPool, id: i64, proxy: &str) -> AppResult<()> {
    let conn = get_connection(pool)?;
    conn.execute("UPDATE sessions SET proxy = ?1 WHERE id = ?2", params![proxy, id])?;
    Ok(())
}

/// Persist the durable token (and optional two-factor password) after a
/// successful sign-in, flipping the session to `active`.
pub fn store_session_token(pool: &DbPool, id: i64, session_string: &str, password: Option<&str>) -> AppResult<()> {
    let conn = get_connection(pool)?;
    conn.execute(
        "UPDATE sessions SET session_string = ?1, password = COALESCE(?2, password), status = 'active' WHERE id = ?3",
        params![session_string, password, id],
    )?;
    Ok(())
}

pub fn set_session_status(pool: &DbPool, id: i64, status: SessionStatus) -> AppResult<()> {
    let conn = get_connection(pool)?;
    conn.execute(
        "UPDATE sessions SET status = ?1 WHERE id = ?2",
        params![status.to_string(), id],
    )?;
    Ok(())
}

pub fn count_sessions_by_status(pool: &DbPool, status: SessionStatus) -> AppResult<i64> {
    let conn = get_connection(pool)?;
    let count = conn.query_row(
        "SELECT COUNT(*) FROM sessions WHERE status = ?1",
        params![status.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Reserve a random `active` session for a country, flipping it to `wait`.
///
/// Runs as one IMMEDIATE transaction so two concurrent buyers cannot both
/// receive the same phone number: the write lock is taken before the select,
/// and the status flip commits atomically with it.
pub fn reserve_random_active_session(pool: &DbPool, country_code: &str) -> AppResult<Option<AccountSession>> {
    let mut conn = get_connection(pool)?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let session = tx
        .query_row(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE status = 'active'
                   AND product_id IN (SELECT id FROM products WHERE country_code = ?1)
                 ORDER BY RANDOM() LIMIT 1"
            ),
            params![country_code],
            map_session,
        )
        .optional()?;

    let Some(mut session) = session else {
        return Ok(None);
    };

    tx.execute("UPDATE sessions SET status = 'wait' WHERE id = ?1", params![session.id])?;
    tx.commit()?;

    session.status = SessionStatus::Wait;
    Ok(Some(session))
}

fn map_order(row: &rusqlite::Row<'_>) -> rusqlite::Result<Order> {
    let status: String = row.get(6)?;
    Ok(Order {
        id: row.get(0)?,
        user_id: row.get(1)?,
        session_id: row.get(2)?,
        price: row.get(3)?,
        login_code: row.get(4)?,
        track_id: row.get(5)?,
        status: OrderStatus::from_str(&status).unwrap_or(OrderStatus::Waiting),
        created_at: row.get(7)?,
    })
}

const ORDER_COLUMNS: &str = "id, user_id, session_id, price, login_code, track_id, status, created_at";

/// Finalize a sale: session -> `purchased`, order row, balance debit, one
/// transaction.
///
/// On any failure the session is rolled to `disabled` (not back to `active`)
/// so a possibly-corrupted record is never silently re-offered; the error is
/// logged and the caller only sees `None`.
pub fn create_order(pool: &DbPool, session: &AccountSession, buyer: &User, price: i64) -> Option<Order> {
    let result = (|| -> AppResult<Order> {
        let mut conn = get_connection(pool)?;
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE sessions SET status = 'purchased' WHERE id = ?1",
            params![session.id],
        )?;
        let track_id = Uuid::new_v4()
            .to_string()
            .rsplit('-')
            .next()
            .unwrap_or_default()
            .to_string();
        tx.execute(
            "INSERT INTO orders (user_id, session_id, price, track_id) VALUES (?1, ?2, ?3, ?4)",
            params![buyer.id, session.id, price, track_id],
        )?;
        let order_id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE users SET balance = balance - ?1 WHERE id = ?2",
            params![price, buyer.id],
        )?;
        tx.commit()?;

        let order = conn.query_row(
            &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"),
            params![order_id],
            map_order,
        )?;
        Ok(order)
    })();

    match result {
        Ok(order) => Some(order),
        Err(e) => {
            log::error!("Order creation failed for session {}: {}", session.id, e);
            if let Err(e) = set_session_status(pool, session.id, SessionStatus::Disabled) {
                log::error!("Failed to disable session {} after order failure: {}", session.id, e);
            }
            None
        }
    }
}

pub fn order_by_session(pool: &DbPool, session_id: i64) -> AppResult<Option<Order>> {
    let conn = get_connection(pool)?;
    let order = conn
        .query_row(
            &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE session_id = ?1"),
            params![session_id],
            map_order,
        )
        .optional()?;
    Ok(order)
}

/// Store the retrieved login code on an order, independent of its status.
pub fn update_order_login_code(pool: &DbPool, order_id: i64, login_code: &str) -> AppResult<()> {
    let conn = get_connection(pool)?;
    conn.execute(
        "UPDATE orders SET login_code = ?1 WHERE id = ?2",
        params![login_code, order_id],
    )?;
    Ok(())
}

pub fn count_orders(pool: &DbPool) -> AppResult<i64> {
    let conn = get_connection(pool)?;
    let count = conn.query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))?;
    Ok(count)
}

pub fn count_user_orders(pool: &DbPool, user_id: i64) -> AppResult<i64> {
    let conn = get_connection(pool)?;
    let count = conn.query_row("SELECT COUNT(*) FROM orders WHERE user_id = ?1", params![user_id], |row| {
        row.get(0)
    })?;
    Ok(count)
}

/// Sum a buyer has spent on orders.
pub fn user_total_paid(pool: &DbPool, user_id: i64) -> AppResult<i64> {
    let conn = get_connection(pool)?;
    let total = conn.query_row(
        "SELECT COALESCE(SUM(price), 0) FROM orders WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(total)
}

/// Users registered inside the trailing N days.
pub fn count_users_joined_since(pool: &DbPool, days: i64) -> AppResult<i64> {
    let conn = get_connection(pool)?;
    let count = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE created_at >= datetime('now', ?1)",
        params![format!("-{days} days")],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn count_users(pool: &DbPool) -> AppResult<i64> {
    let conn = get_connection(pool)?;
    let count = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
    Ok(count)
}

fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<TemplateMessage> {
    Ok(TemplateMessage {
        id: row.get(0)?,
        step: row.get(1)?,
        menu_key: row.get(2)?,
        text: row.get(3)?,
        keys: row.get(4)?,
        keys_per_row: row.get::<_, i64>(5)?.max(1) as usize,
        is_inline_keyboard: row.get::<_, i64>(6)? != 0,
    })
}

const MESSAGE_COLUMNS: &str = "id, step, menu_key, text, keys, keys_per_row, is_inline_keyboard";

/// Insert or replace one screen of the templated-message store.
/// Used by seeding tooling and tests; production content is managed
/// out-of-band.
pub fn upsert_message(
    pool: &DbPool,
    step: &str,
    menu_key: Option<&str>,
    text: &str,
    keys: Option<&str>,
    keys_per_row: usize,
    is_inline_keyboard: bool,
) -> AppResult<i64> {
    let conn = get_connection(pool)?;
    conn.execute(
        "INSERT INTO messages (step, menu_key, text, keys, keys_per_row, is_inline_keyboard)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            step.trim(),
            menu_key.map(str::trim),
            text.trim(),
            keys.map(str::trim),
            keys_per_row as i64,
            is_inline_keyboard as i64
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// The screen registered under a step name, if any.
pub fn message_by_step(pool: &DbPool, step: &str) -> AppResult<Option<TemplateMessage>> {
    let conn = get_connection(pool)?;
    let msg = conn
        .query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE step = ?1 ORDER BY id LIMIT 1"),
            params![step],
            map_message,
        )
        .optional()?;
    Ok(msg)
}

/// All screens triggered by a menu key, in definition order.
///
/// Several screens may share one key; the dispatcher sends them all and
/// advances the step to the last one.
pub fn messages_by_menu_key(pool: &DbPool, key: &str) -> AppResult<Vec<TemplateMessage>> {
    let conn = get_connection(pool)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE menu_key = ?1 ORDER BY id"
    ))?;
    let msgs = stmt
        .query_map(params![key], map_message)?
        .collect::<rusqlite::Result<_>>()?;
    Ok(msgs)
}

/// The target step a menu key maps to (first registered), or None.
pub fn menu_step_for_key(pool: &DbPool, key: &str) -> AppResult<Option<String>> {
    let conn = get_connection(pool)?;
    let step = conn
        .query_row(
            "SELECT step FROM messages WHERE menu_key = ?1 ORDER BY id LIMIT 1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(step)
}

/// Open a manually-reviewed voucher payment with the e-voucher number.
pub fn create_voucher_payment(pool: &DbPool, user_id: i64, evoucher: &str) -> AppResult<i64> {
    let conn = get_connection(pool)?;
    conn.execute(
        "INSERT INTO voucher_payments (user_id, evoucher) VALUES (?1, ?2)",
        params![user_id, evoucher],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn set_voucher_activation_code(pool: &DbPool, payment_id: i64, activation_code: &str) -> AppResult<()> {
    let conn = get_connection(pool)?;
    conn.execute(
        "UPDATE voucher_payments SET activation_code = ?1 WHERE id = ?2",
        params![activation_code, payment_id],
    )?;
    Ok(())
}

/// Maintenance-mode flag and banner. One singleton row.
pub fn bot_update_status(pool: &DbPool) -> AppResult<(bool, String)> {
    let conn = get_connection(pool)?;
    let status = conn
        .query_row("SELECT is_update, update_msg FROM bot_status WHERE id = 1", [], |row| {
            Ok((row.get::<_, i64>(0)? != 0, row.get(1)?))
        })
        .optional()?;
    Ok(status.unwrap_or((false, String::new())))
}

pub fn set_bot_update_status(pool: &DbPool, is_update: bool) -> AppResult<()> {
    let conn = get_connection(pool)?;
    conn.execute(
        "INSERT INTO bot_status (id, is_update) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET is_update = ?1",
        params![is_update as i64],
    )?;
    Ok(())
}

/// Credit or debit a balance outside the order path (top-ups, refunds).
pub fn adjust_balance(pool: &DbPool, chat_id: i64, delta: i64) -> AppResult<()> {
    let conn = get_connection(pool)?;
    conn.execute(
        "UPDATE users SET balance = balance + ?1 WHERE chat_id = ?2",
        params![delta, chat_id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // One connection: a private in-memory database exists per connection, so
    // a larger pool would hand out empty schemas.
    fn test_pool() -> DbPool {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).unwrap();
        migrate_schema(&pool.get().unwrap()).unwrap();
        pool
    }

    #[test]
    fn creates_user_once() {
        let pool = test_pool();
        let a = get_or_create_user(&pool, 42, Some("alice"), "Alice", "").unwrap();
        let b = get_or_create_user(&pool, 42, Some("alice"), "Alice", "").unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.step, "home-page");
    }

    #[test]
    fn duplicate_username_falls_back_to_chat_id() {
        let pool = test_pool();
        get_or_create_user(&pool, 1, Some("bob"), "Bob", "").unwrap();
        let second = get_or_create_user(&pool, 2, Some("bob"), "Bobby", "").unwrap();
        assert_eq!(second.username.as_deref(), Some("2"));
    }

    #[test]
    fn session_status_round_trip() {
        assert_eq!(SessionStatus::from_str("purchased").unwrap(), SessionStatus::Purchased);
        assert_eq!(SessionStatus::Wait.to_string(), "wait");
    }

    #[test]
    fn reserve_flips_to_wait() {
        let pool = test_pool();
        let product = create_product(&pool, "USA", 10_000, "us", "1").unwrap();
        let session = create_session(&pool, product, "12025550123", "tok", SessionStatus::Active).unwrap();

        let reserved = reserve_random_active_session(&pool, "us").unwrap().unwrap();
        assert_eq!(reserved.id, session.id);
        assert_eq!(reserved.status, SessionStatus::Wait);

        // Second buyer sees nothing
        assert!(reserve_random_active_session(&pool, "us").unwrap().is_none());
    }

    #[test]
    fn order_debits_balance_and_purchases_session() {
        let pool = test_pool();
        let product = create_product(&pool, "USA", 4_000, "us", "1").unwrap();
        let session = create_session(&pool, product, "12025550123", "tok", SessionStatus::Active).unwrap();
        get_or_create_user(&pool, 7, None, "Eve", "").unwrap();
        adjust_balance(&pool, 7, 10_000).unwrap();
        let buyer = get_user(&pool, 7).unwrap().unwrap();

        let reserved = reserve_random_active_session(&pool, "us").unwrap().unwrap();
        let order = create_order(&pool, &reserved, &buyer, 4_000).unwrap();
        assert_eq!(order.price, 4_000);
        assert_eq!(order.status, OrderStatus::Waiting);

        let buyer = get_user(&pool, 7).unwrap().unwrap();
        assert_eq!(buyer.balance, 6_000);
        let session = session_by_id(&pool, session.id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Purchased);
    }

    #[test]
    fn failed_order_disables_session() {
        let pool = test_pool();
        let product = create_product(&pool, "USA", 4_000, "us", "1").unwrap();
        let session = create_session(&pool, product, "12025550123", "tok", SessionStatus::Active).unwrap();
        get_or_create_user(&pool, 7, None, "Eve", "").unwrap();
        let buyer = get_user(&pool, 7).unwrap().unwrap();

        let reserved = reserve_random_active_session(&pool, "us").unwrap().unwrap();
        // Force a failure: a second order for the same session violates the
        // UNIQUE constraint
        assert!(create_order(&pool, &reserved, &buyer, 4_000).is_some());
        assert!(create_order(&pool, &reserved, &buyer, 4_000).is_none());

        let session = session_by_id(&pool, session.id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Disabled);
    }

    #[test]
    fn menu_key_returns_all_matches_in_order() {
        let pool = test_pool();
        upsert_message(&pool, "step-a", Some("⚙ Settings"), "first", None, 2, false).unwrap();
        upsert_message(&pool, "step-b", Some("🛍 Buy"), "second", None, 2, false).unwrap();
        upsert_message(&pool, "step-c", Some("🛍 Buy"), "third", None, 2, false).unwrap();

        let msgs = messages_by_menu_key(&pool, "🛍 Buy").unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].step, "step-b");
        assert_eq!(msgs[1].step, "step-c");
    }
}
