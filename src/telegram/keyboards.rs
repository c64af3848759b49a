//! Keyboard construction from the templated-message store
//!
//! Screen keyboards are stored as plain text, one button per line:
//!
//! ```text
//! label:callback_data
//! label::https://example.com/page
//! label:url:https://example.com/page
//! ```
//!
//! An empty callback slot with a third field is a URL button; the `url`
//! keyword form is accepted too.
//!
//! URLs contain colons, so the scheme is peeled off before splitting and
//! restored afterwards. `keys_per_row` chunks the parsed buttons into rows.

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup, ReplyMarkup};
use url::Url;

use crate::storage::db::TemplateMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    pub label: String,
    pub action: KeyAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    Callback(String),
    Url(String),
}

/// Parse the stored button mini-language. Malformed lines are skipped with a
/// warning rather than breaking the whole screen.
pub fn parse_keys(keys: &str) -> Vec<KeySpec> {
    keys.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let (line, scheme) = if let Some(rest) = line.find("https://") {
                (format!("{}{}", &line[..rest], &line[rest + 8..]), Some("https://"))
            } else if let Some(rest) = line.find("http://") {
                (format!("{}{}", &line[..rest], &line[rest + 7..]), Some("http://"))
            } else {
                (line.to_string(), None)
            };

            let mut parts = line.splitn(3, ':');
            let label = parts.next()?.trim().to_string();
            let kind = parts.next()?.trim();
            let action = match (kind, parts.next(), scheme) {
                ("", Some(target), Some(scheme)) if !target.trim().is_empty() => {
                    KeyAction::Url(format!("{scheme}{}", target.trim()))
                }
                ("", Some(target), None) if !target.trim().is_empty() => KeyAction::Url(target.trim().to_string()),
                ("url", Some(target), Some(scheme)) => KeyAction::Url(format!("{scheme}{}", target.trim())),
                ("url", Some(target), None) => KeyAction::Url(target.trim().to_string()),
                (data, None, _) | (data, Some(""), _) if !data.is_empty() => KeyAction::Callback(data.to_string()),
                _ => {
                    log::warn!("Skipping malformed keyboard line");
                    return None;
                }
            };
            if label.is_empty() {
                return None;
            }
            Some(KeySpec { label, action })
        })
        .collect()
}

fn chunk<T>(items: Vec<T>, per_row: usize) -> Vec<Vec<T>> {
    let per_row = per_row.max(1);
    let mut rows = Vec::new();
    let mut row = Vec::new();
    for item in items {
        row.push(item);
        if row.len() == per_row {
            rows.push(std::mem::take(&mut row));
        }
    }
    if !row.is_empty() {
        rows.push(row);
    }
    rows
}

/// Build the inline keyboard for a screen, if it declares one.
pub fn inline_markup(keys: &str, keys_per_row: usize) -> InlineKeyboardMarkup {
    let buttons: Vec<InlineKeyboardButton> = parse_keys(keys)
        .into_iter()
        .filter_map(|spec| match spec.action {
            KeyAction::Callback(data) => Some(InlineKeyboardButton::callback(spec.label, data)),
            KeyAction::Url(target) => match Url::parse(&target) {
                Ok(url) => Some(InlineKeyboardButton::url(spec.label, url)),
                Err(e) => {
                    log::warn!("Dropping button with bad URL {}: {}", target, e);
                    None
                }
            },
        })
        .collect();
    InlineKeyboardMarkup::new(chunk(buttons, keys_per_row))
}

/// Build the reply keyboard for a screen. Only labels matter here.
pub fn reply_markup(keys: &str, keys_per_row: usize) -> KeyboardMarkup {
    let buttons: Vec<KeyboardButton> = parse_keys(keys)
        .into_iter()
        .map(|spec| KeyboardButton::new(spec.label))
        .collect();
    KeyboardMarkup::new(chunk(buttons, keys_per_row)).resize_keyboard()
}

/// The markup a stored screen asks for, or None for a bare text message.
pub fn markup_for(msg: &TemplateMessage) -> Option<ReplyMarkup> {
    let keys = msg.keys.as_deref()?.trim();
    if keys.is_empty() {
        return None;
    }
    Some(if msg.is_inline_keyboard {
        ReplyMarkup::InlineKeyboard(inline_markup(keys, msg.keys_per_row))
    } else {
        ReplyMarkup::Keyboard(reply_markup(keys, msg.keys_per_row))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_callback_and_url_lines() {
        let keys = "🇺🇸 USA:country-us\nSupport:url:https://t.me/example\n\nBad line without data:";
        let specs = parse_keys(keys);
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].action, KeyAction::Callback("country-us".to_string()));
        assert_eq!(specs[1].action, KeyAction::Url("https://t.me/example".to_string()));
    }

    #[test]
    fn url_button_may_leave_the_callback_slot_empty() {
        let specs = parse_keys("Channel::https://t.me/example\nBuy:country-us:");
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].action, KeyAction::Url("https://t.me/example".to_string()));
        assert_eq!(specs[1].action, KeyAction::Callback("country-us".to_string()));
    }

    #[test]
    fn chunks_rows_by_width() {
        let rows = chunk(vec![1, 2, 3, 4, 5], 2);
        assert_eq!(rows, vec![vec![1, 2], vec![3, 4], vec![5]]);
        // Zero width never panics
        assert_eq!(chunk(vec![1], 0), vec![vec![1]]);
    }

    #[test]
    fn inline_markup_skips_invalid_urls() {
        let markup = inline_markup("Ok:go\nBroken:url:not a url", 2);
        assert_eq!(markup.inline_keyboard.len(), 1);
        assert_eq!(markup.inline_keyboard[0].len(), 1);
    }
}
