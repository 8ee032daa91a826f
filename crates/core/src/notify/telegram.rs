use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use crate::error::NotifyError;
use super::{Incoming, Transport};

const API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API over plain HTTPS.
pub struct TelegramTransport {
    agent: ureq::Agent,
    base: String,
    timeout: Duration,
}

impl TelegramTransport {
    pub fn new(token: &str, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            base: format!("{}/bot{}", API_BASE, token.trim()),
            timeout,
        }
    }

    fn get_updates(&self, offset: Option<i64>, wait: Duration) -> Result<Value, NotifyError> {
        // Long-poll must finish inside the request timeout.
        let wait_secs = wait.min(self.timeout / 2).as_secs();
        let mut request = self
            .agent
            .get(&format!("{}/getUpdates", self.base))
            .query("timeout", &wait_secs.to_string());
        if let Some(offset) = offset {
            request = request.query("offset", &offset.to_string());
        }
        read_body(request.call())
    }
}

/// Errors never echo the URL, which carries the bot token.
fn read_body(result: Result<ureq::Response, ureq::Error>) -> Result<Value, NotifyError> {
    let body: Value = match result {
        Ok(resp) => resp.into_json().map_err(|e| NotifyError::Transport(e.to_string()))?,
        Err(ureq::Error::Status(code, resp)) => {
            let detail = resp
                .into_json::<Value>()
                .ok()
                .and_then(|b| b["description"].as_str().map(str::to_string))
                .unwrap_or_default();
            return Err(NotifyError::Rejected(format!("HTTP {} {}", code, detail)));
        }
        Err(ureq::Error::Transport(t)) => return Err(NotifyError::Transport(t.kind().to_string())),
    };
    if body["ok"].as_bool() != Some(true) {
        let detail = body["description"].as_str().unwrap_or("request not ok");
        return Err(NotifyError::Rejected(detail.to_string()));
    }
    Ok(body)
}

fn message(update: &Value) -> Option<&Value> {
    [&update["message"], &update["edited_message"]].into_iter().find(|m| m.is_object())
}

/// Every update advances the cursor, text or not.
pub fn extract_incoming(body: &Value) -> Vec<Incoming> {
    let Some(updates) = body["result"].as_array() else {
        return Vec::new();
    };
    updates
        .iter()
        .filter_map(|u| {
            let cursor = u["update_id"].as_i64()?;
            let msg = message(u);
            let chat = msg.map(|m| chat_id(&m["chat"]["id"])).unwrap_or_default();
            let text = msg.and_then(|m| m["text"].as_str()).unwrap_or_default().to_string();
            Some(Incoming { cursor, chat, text })
        })
        .collect()
}

fn chat_id(id: &Value) -> String {
    match id {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

/// `(chat id, title)` for every chat seen in an update batch.
pub fn extract_chats(body: &Value) -> Vec<(String, String)> {
    let mut chats = BTreeMap::new();
    for update in body["result"].as_array().into_iter().flatten() {
        let Some(msg) = message(update) else { continue };
        let chat = &msg["chat"];
        let id = chat_id(&chat["id"]);
        if id.is_empty() {
            continue;
        }
        let title = ["title", "username", "first_name"]
            .iter()
            .find_map(|k| chat[*k].as_str())
            .unwrap_or("(unknown)");
        chats.entry(id).or_insert_with(|| title.to_string());
    }
    chats.into_iter().collect()
}

/// One-shot helper for finding the chat id to configure.
pub fn list_chats(token: &str, timeout: Duration) -> Result<Vec<(String, String)>, NotifyError> {
    let transport = TelegramTransport::new(token, timeout);
    let body = transport.get_updates(None, Duration::from_secs(3))?;
    Ok(extract_chats(&body))
}

impl Transport for TelegramTransport {
    fn send(&self, chat: &str, text: &str) -> Result<(), NotifyError> {
        let result = self
            .agent
            .post(&format!("{}/sendMessage", self.base))
            .send_form(&[("chat_id", chat), ("text", text)]);
        read_body(result).map(|_| ())
    }

    fn poll_incoming(&self, after: Option<i64>, timeout: Duration) -> Result<Vec<Incoming>, NotifyError> {
        let body = self.get_updates(after.map(|a| a + 1), timeout)?;
        Ok(extract_incoming(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch() -> Value {
        json!({
            "ok": true,
            "result": [
                { "update_id": 10, "message": { "chat": { "id": 42, "first_name": "Kim" }, "text": "/stop" } },
                { "update_id": 11, "edited_message": { "chat": { "id": -100, "title": "ops" }, "text": "hi" } },
                { "update_id": 12, "message": { "chat": { "id": 42 }, "sticker": {} } },
                { "update_id": 13, "channel_post": { "chat": { "id": 5 } } }
            ]
        })
    }

    #[test]
    fn incoming_keeps_every_cursor() {
        let incoming = extract_incoming(&batch());
        assert_eq!(incoming.iter().map(|u| u.cursor).collect::<Vec<_>>(), vec![10, 11, 12, 13]);
        assert_eq!(incoming[0], Incoming { cursor: 10, chat: "42".into(), text: "/stop".into() });
        assert_eq!(incoming[1].chat, "-100");
        assert_eq!(incoming[2].text, "");
        assert_eq!(incoming[3].chat, "");
    }

    #[test]
    fn chats_are_deduplicated_with_titles() {
        let chats = extract_chats(&batch());
        assert_eq!(
            chats,
            vec![("-100".to_string(), "ops".to_string()), ("42".to_string(), "Kim".to_string())]
        );
    }

    #[test]
    fn not_ok_body_yields_nothing() {
        assert!(extract_incoming(&json!({ "ok": false })).is_empty());
        assert!(extract_chats(&json!({})).is_empty());
    }
}
