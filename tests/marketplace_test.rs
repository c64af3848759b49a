//! Buy flow, inventory allocation, login-code retrieval, and payment gates.

mod common;

use common::{seed_inventory, seed_user, test_app, ClientScript};
use simbazar::provision::manager;
use simbazar::storage::db::{self, SessionStatus};
use simbazar::telegram::dispatch::{handle_callback_update, handle_text_update};

async fn send_text(app: &common::TestApp, chat_id: i64, text: &str) {
    handle_text_update(
        &app.state,
        chat_id,
        1,
        text.to_string(),
        None,
        "Test".to_string(),
        "User".to_string(),
        None,
        None,
    )
    .await
    .expect("dispatch");
}

async fn send_callback(app: &common::TestApp, chat_id: i64, message_id: i32, data: &str) {
    handle_callback_update(
        &app.state,
        chat_id,
        chat_id,
        message_id,
        format!("q-{chat_id}-{message_id}"),
        data.to_string(),
        String::new(),
    )
    .await
    .expect("dispatch");
}

#[tokio::test]
async fn buy_menu_lists_countries_with_prices() {
    let app = test_app(ClientScript::default());
    seed_inventory(app.pool(), "uk", "44", 4_000, 2);
    seed_user(app.pool(), 100, 10_000);

    send_text(&app, 100, "🛍 Buy").await;

    let sent = app.transport.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text, "Pick a country");
    assert!(sent[0].has_markup);
}

#[tokio::test]
async fn insufficient_balance_stops_the_buy_menu() {
    let app = test_app(ClientScript::default());
    seed_inventory(app.pool(), "uk", "44", 4_000, 2);
    seed_user(app.pool(), 100, 100);

    send_text(&app, 100, "🛍 Buy").await;

    assert_eq!(app.transport.sent_texts(100), vec!["Balance too low".to_string()]);
}

#[tokio::test]
async fn empty_inventory_stops_the_buy_menu() {
    let app = test_app(ClientScript::default());
    seed_user(app.pool(), 100, 10_000);

    send_text(&app, 100, "🛍 Buy").await;

    assert_eq!(app.transport.sent_texts(100), vec!["Nothing in stock".to_string()]);
}

#[tokio::test]
async fn purchase_charges_buyer_and_shows_the_number() {
    let app = test_app(ClientScript::default());
    seed_inventory(app.pool(), "uk", "44", 4_000, 1);
    seed_user(app.pool(), 100, 10_000);

    send_callback(&app, 100, 7, "country-uk").await;

    let edits = app.transport.edits.lock().unwrap().clone();
    assert_eq!(edits.len(), 1);
    assert!(edits[0].2.starts_with("Your number: 44"));

    assert_eq!(db::count_orders(app.pool()).unwrap(), 1);
    assert_eq!(
        db::count_sessions_by_status(app.pool(), SessionStatus::Purchased).unwrap(),
        1
    );
    let buyer = db::get_user(app.pool(), 100).unwrap().unwrap();
    assert_eq!(buyer.balance, 6_000);
}

#[tokio::test]
async fn unreachable_session_is_retired_not_sold() {
    let app = test_app(ClientScript {
        connect_ok: false,
        ..ClientScript::default()
    });
    seed_inventory(app.pool(), "uk", "44", 4_000, 1);
    seed_user(app.pool(), 100, 10_000);

    send_callback(&app, 100, 7, "country-uk").await;

    assert_eq!(db::count_orders(app.pool()).unwrap(), 0);
    assert_eq!(
        db::count_sessions_by_status(app.pool(), SessionStatus::Disabled).unwrap(),
        1
    );
    let callbacks = app.transport.callbacks.lock().unwrap().clone();
    assert!(callbacks.iter().any(|(_, text, _)| text == "❌ Session Problem"));
    // Nothing was charged
    assert_eq!(db::get_user(app.pool(), 100).unwrap().unwrap().balance, 10_000);
}

#[tokio::test]
async fn last_session_is_sold_exactly_once() {
    let app = test_app(ClientScript::default());
    seed_inventory(app.pool(), "uk", "44", 4_000, 1);
    seed_user(app.pool(), 100, 10_000);
    seed_user(app.pool(), 101, 10_000);

    let first = handle_callback_update(
        &app.state,
        100,
        100,
        7,
        "q-100".to_string(),
        "country-uk".to_string(),
        String::new(),
    );
    let second = handle_callback_update(
        &app.state,
        101,
        101,
        8,
        "q-101".to_string(),
        "country-uk".to_string(),
        String::new(),
    );
    let (a, b) = tokio::join!(first, second);
    a.expect("dispatch");
    b.expect("dispatch");

    assert_eq!(db::count_orders(app.pool()).unwrap(), 1);
    assert_eq!(
        db::count_sessions_by_status(app.pool(), SessionStatus::Purchased).unwrap(),
        1
    );
    // Exactly one buyer paid
    let paid = [100, 101]
        .iter()
        .filter(|&&chat| db::get_user(app.pool(), chat).unwrap().unwrap().balance == 6_000)
        .count();
    assert_eq!(paid, 1);
}

#[tokio::test]
async fn reserved_number_stays_hidden_during_the_connectivity_check() {
    let app = test_app(ClientScript::default());
    seed_inventory(app.pool(), "uk", "44", 4_000, 1);

    let session = db::reserve_random_active_session(app.pool(), "uk").unwrap().unwrap();
    let check = manager::check_reserved_session(app.pool(), &app.state.client_factory, session.id)
        .await
        .unwrap();
    assert!(check.usable);

    // The check must not put the row back into rotation
    let held = db::session_by_id(app.pool(), session.id).unwrap().unwrap();
    assert_eq!(held.status, SessionStatus::Wait);
    assert!(db::reserve_random_active_session(app.pool(), "uk").unwrap().is_none());
}

#[tokio::test]
async fn login_code_reaches_the_buyer_and_the_order() {
    let app = test_app(ClientScript::default());
    seed_inventory(app.pool(), "uk", "44", 4_000, 1);
    seed_user(app.pool(), 100, 10_000);

    send_callback(&app, 100, 7, "country-uk").await;
    let session = db::session_by_phone(app.pool(), "442025550100").unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Purchased);

    send_callback(&app, 100, 7, "login_code-442025550100").await;

    let texts = app.transport.sent_texts(100);
    assert!(texts.iter().any(|t| t.contains("Code: 73914")));

    let order = db::order_by_session(app.pool(), session.id).unwrap().unwrap();
    assert_eq!(order.login_code, "73914");
}

#[tokio::test]
async fn login_code_requests_are_capped_per_number() {
    let app = test_app(ClientScript::default());
    seed_inventory(app.pool(), "uk", "44", 4_000, 1);
    seed_user(app.pool(), 100, 10_000);
    send_callback(&app, 100, 7, "country-uk").await;

    for _ in 0..3 {
        send_callback(&app, 100, 7, "login_code-442025550100").await;
    }
    let delivered = app
        .transport
        .sent_texts(100)
        .iter()
        .filter(|t| t.contains("Code: 73914"))
        .count();
    assert_eq!(delivered, 3);

    // The counter is past the limit now; the next tap only gets an alert
    send_callback(&app, 100, 7, "login_code-442025550100").await;
    let delivered_after = app
        .transport
        .sent_texts(100)
        .iter()
        .filter(|t| t.contains("Code: 73914"))
        .count();
    assert_eq!(delivered_after, 3);
    let callbacks = app.transport.callbacks.lock().unwrap().clone();
    let (_, text, show_alert) = callbacks.last().unwrap().clone();
    assert_eq!(text, "Login code limit reached");
    assert!(show_alert);
}

#[tokio::test]
async fn login_code_quota_is_per_chat() {
    let app = test_app(ClientScript::default());
    seed_inventory(app.pool(), "uk", "44", 4_000, 1);
    seed_user(app.pool(), 100, 10_000);
    seed_user(app.pool(), 101, 0);
    send_callback(&app, 100, 7, "country-uk").await;

    for _ in 0..4 {
        send_callback(&app, 100, 7, "login_code-442025550100").await;
    }
    // The buyer just hit the cap; a forwarded button in another chat
    // draws on that chat's own counter
    send_callback(&app, 101, 9, "login_code-442025550100").await;

    let texts = app.transport.sent_texts(101);
    assert!(texts.iter().any(|t| t.contains("Code: 73914")));
    let callbacks = app.transport.callbacks.lock().unwrap().clone();
    let (_, text, _) = callbacks.last().unwrap().clone();
    assert_ne!(text, "Login code limit reached");
}

#[tokio::test]
async fn checkout_creates_a_payment_link() {
    let app = test_app(ClientScript::default());
    seed_user(app.pool(), 100, 0);
    db::update_user_step(app.pool(), 100, "crypto-get-amount").unwrap();

    send_text(&app, 100, "25").await;

    assert_eq!(*app.crypto.calls.lock().unwrap(), vec![25.0]);
    let sent = app.transport.sent.lock().unwrap().clone();
    let payment = sent.iter().find(|m| m.text.contains("Pay here")).expect("payment screen");
    assert!(payment.has_markup);
    // The ⏳ placeholder is cleaned up
    assert_eq!(app.transport.deletes.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn bad_amounts_never_reach_the_gateway() {
    let app = test_app(ClientScript::default());
    seed_user(app.pool(), 100, 0);
    db::update_user_step(app.pool(), 100, "crypto-get-amount").unwrap();

    send_text(&app, 100, "twenty").await;
    send_text(&app, 100, "1").await;

    assert!(app.crypto.calls.lock().unwrap().is_empty());
    let texts = app.transport.sent_texts(100);
    assert_eq!(
        texts,
        vec!["That is not a number".to_string(), "Minimum is 5 dollar".to_string()]
    );
}

#[tokio::test]
async fn persian_digit_amounts_are_accepted() {
    let app = test_app(ClientScript::default());
    seed_user(app.pool(), 100, 0);
    db::update_user_step(app.pool(), 100, "crypto-get-amount").unwrap();

    send_text(&app, 100, "۲۵").await;

    assert_eq!(*app.crypto.calls.lock().unwrap(), vec![25.0]);
}

#[tokio::test]
async fn payment_attempts_are_rate_limited_with_one_warning() {
    let app = test_app(ClientScript::default());
    seed_user(app.pool(), 100, 0);
    db::update_user_step(app.pool(), 100, "crypto-get-amount").unwrap();

    for _ in 0..3 {
        send_text(&app, 100, "25").await;
    }
    assert_eq!(app.crypto.calls.lock().unwrap().len(), 3);

    // Fourth attempt: blocked with a single warning
    send_text(&app, 100, "25").await;
    assert_eq!(app.crypto.calls.lock().unwrap().len(), 3);
    let warnings = app
        .transport
        .sent_texts(100)
        .iter()
        .filter(|t| t.contains("Too many payment attempts"))
        .count();
    assert_eq!(warnings, 1);

    // Fifth attempt: still blocked, still only one warning
    send_text(&app, 100, "25").await;
    assert_eq!(app.crypto.calls.lock().unwrap().len(), 3);
    let warnings = app
        .transport
        .sent_texts(100)
        .iter()
        .filter(|t| t.contains("Too many payment attempts"))
        .count();
    assert_eq!(warnings, 1);
}

#[tokio::test]
async fn gateway_failure_shows_the_error_screen() {
    let mut app = test_app(ClientScript::default());
    seed_user(app.pool(), 100, 0);
    db::update_user_step(app.pool(), 100, "crypto-get-amount").unwrap();

    let failing = common::ScriptedGateway::failing();
    app.state.crypto_gateway = failing.clone();

    send_text(&app, 100, "25").await;

    assert_eq!(failing.calls.lock().unwrap().len(), 1);
    let texts = app.transport.sent_texts(100);
    assert_eq!(texts.last().map(String::as_str), Some("Payment creation failed"));
}
