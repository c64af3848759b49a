//! Outbound Telegram surface
//!
//! Handlers talk to Telegram through the [`Transport`] trait so dialogue
//! logic can be exercised in tests without the network. All calls are
//! best-effort: a failed send is logged and swallowed, never bubbled into
//! the dispatch path.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQueryId, FileId, InlineKeyboardMarkup, MessageId, ParseMode, ReplyMarkup, ReplyParameters,
};

use crate::core::config;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a text message, returning the new message id on success.
    async fn send_message(&self, chat_id: i64, text: &str, markup: Option<ReplyMarkup>) -> Option<i32>;

    /// Send a text message as a reply to another message.
    async fn send_message_reply(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: i32,
        markup: Option<ReplyMarkup>,
    ) -> Option<i32>;

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        markup: Option<InlineKeyboardMarkup>,
    ) -> bool;

    /// Remove the inline keyboard from a previously sent message.
    async fn clear_inline_keyboard(&self, chat_id: i64, message_id: i32);

    async fn delete_message(&self, chat_id: i64, message_id: i32);

    async fn forward_message(&self, to_chat: i64, from_chat: i64, message_id: i32) -> Option<i32>;

    async fn copy_message(&self, to_chat: i64, from_chat: i64, message_id: i32) -> Option<i32>;

    /// Answer a callback query, optionally as a popup alert.
    async fn answer_callback(&self, query_id: &str, text: Option<&str>, show_alert: bool);

    /// Fetch the raw bytes of an uploaded file.
    async fn download_file(&self, file_id: &str) -> Option<Vec<u8>>;
}

/// Production transport backed by the Bot API.
pub struct TelegramTransport {
    bot: Bot,
    http: reqwest::Client,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        let mut builder = reqwest::Client::builder().timeout(config::network::timeout());
        if let Some(proxy) = config::PROXY_SOCKS.as_deref() {
            match reqwest::Proxy::all(format!("socks5://{proxy}")) {
                Ok(proxy) => builder = builder.proxy(proxy),
                Err(e) => log::warn!("Ignoring invalid PROXY_SOCKS value: {}", e),
            }
        }
        let http = builder.build().unwrap_or_else(|_| reqwest::Client::new());
        Self { bot, http }
    }

    fn file_url(&self, path: &str) -> String {
        let base = config::BOT_API_URL
            .clone()
            .unwrap_or_else(|| "https://api.telegram.org".to_string());
        format!("{}/file/bot{}/{}", base.trim_end_matches('/'), &*config::BOT_TOKEN, path)
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_message(&self, chat_id: i64, text: &str, markup: Option<ReplyMarkup>) -> Option<i32> {
        let mut request = self.bot.send_message(ChatId(chat_id), text).parse_mode(ParseMode::Html);
        if let Some(markup) = markup {
            request = request.reply_markup(markup);
        }
        match request.await {
            Ok(msg) => Some(msg.id.0),
            Err(e) => {
                log::warn!("send_message to {} failed: {}", chat_id, e);
                None
            }
        }
    }

    async fn send_message_reply(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: i32,
        markup: Option<ReplyMarkup>,
    ) -> Option<i32> {
        let mut request = self
            .bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html)
            .reply_parameters(ReplyParameters::new(MessageId(reply_to)));
        if let Some(markup) = markup {
            request = request.reply_markup(markup);
        }
        match request.await {
            Ok(msg) => Some(msg.id.0),
            Err(e) => {
                log::warn!("send_message_reply to {} failed: {}", chat_id, e);
                None
            }
        }
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        markup: Option<InlineKeyboardMarkup>,
    ) -> bool {
        let mut request = self
            .bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id), text)
            .parse_mode(ParseMode::Html);
        if let Some(markup) = markup {
            request = request.reply_markup(markup);
        }
        match request.await {
            Ok(_) => true,
            Err(e) => {
                log::warn!("edit_message_text in {} failed: {}", chat_id, e);
                false
            }
        }
    }

    async fn clear_inline_keyboard(&self, chat_id: i64, message_id: i32) {
        if let Err(e) = self
            .bot
            .edit_message_reply_markup(ChatId(chat_id), MessageId(message_id))
            .await
        {
            log::debug!("clear_inline_keyboard in {} failed: {}", chat_id, e);
        }
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) {
        if let Err(e) = self.bot.delete_message(ChatId(chat_id), MessageId(message_id)).await {
            log::debug!("delete_message in {} failed: {}", chat_id, e);
        }
    }

    async fn forward_message(&self, to_chat: i64, from_chat: i64, message_id: i32) -> Option<i32> {
        match self
            .bot
            .forward_message(ChatId(to_chat), ChatId(from_chat), MessageId(message_id))
            .await
        {
            Ok(msg) => Some(msg.id.0),
            Err(e) => {
                log::warn!("forward_message to {} failed: {}", to_chat, e);
                None
            }
        }
    }

    async fn copy_message(&self, to_chat: i64, from_chat: i64, message_id: i32) -> Option<i32> {
        match self
            .bot
            .copy_message(ChatId(to_chat), ChatId(from_chat), MessageId(message_id))
            .await
        {
            Ok(id) => Some(id.0),
            Err(e) => {
                log::warn!("copy_message to {} failed: {}", to_chat, e);
                None
            }
        }
    }

    async fn answer_callback(&self, query_id: &str, text: Option<&str>, show_alert: bool) {
        let mut request = self.bot.answer_callback_query(CallbackQueryId(query_id.to_string()));
        if let Some(text) = text {
            request = request.text(text);
        }
        if show_alert {
            request = request.show_alert(true);
        }
        if let Err(e) = request.await {
            log::debug!("answer_callback_query failed: {}", e);
        }
    }

    async fn download_file(&self, file_id: &str) -> Option<Vec<u8>> {
        let file = match self.bot.get_file(FileId(file_id.to_string())).await {
            Ok(file) => file,
            Err(e) => {
                log::warn!("get_file failed: {}", e);
                return None;
            }
        };
        let url = self.file_url(&file.path);
        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => match response.bytes().await {
                Ok(bytes) => Some(bytes.to_vec()),
                Err(e) => {
                    log::warn!("file body read failed: {}", e);
                    None
                }
            },
            Ok(response) => {
                log::warn!("file download returned {}", response.status());
                None
            }
            Err(e) => {
                log::warn!("file download failed: {}", e);
                None
            }
        }
    }
}
