use super::normalize_key;
use crate::db::ChatbotStore;
use crate::error::Result;
use chrono::Utc;
use std::sync::Arc;

const GREETINGS: &[&str] = &[
    "hi", "hello", "hey", "hii", "hiii", "hiiii", "helo", "hola", "help",
];

/// What to do about one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Ignore,
    SendText { body: String },
    SendMedia { url: String, caption: String },
}

impl Action {
    fn reply(media_url: Option<&str>, text: &str) -> Self {
        match media_url.map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => Action::SendMedia {
                url: url.to_string(),
                caption: text.to_string(),
            },
            None => Action::SendText {
                body: text.to_string(),
            },
        }
    }
}

pub fn is_greeting(text: &str) -> bool {
    let text = text.trim();
    GREETINGS.iter().any(|g| g.eq_ignore_ascii_case(text))
}

#[derive(Clone)]
pub struct ChatbotEngine {
    store: Arc<dyn ChatbotStore>,
}

impl ChatbotEngine {
    pub fn new(store: Arc<dyn ChatbotStore>) -> Self {
        Self { store }
    }

    /// Decides the reply for one message. Only greetings and exact option
    /// keys produce an action; anything else is ignored.
    pub async fn evaluate_incoming(
        &self,
        owner_account_id: &str,
        chat_id: &str,
        text: &str,
        is_from_me: bool,
    ) -> Result<Action> {
        if is_from_me {
            return Ok(Action::Ignore);
        }
        let text = text.trim();
        if text.is_empty() {
            return Ok(Action::Ignore);
        }

        let Some(config) = self.store.find_chatbot(owner_account_id).await? else {
            return Ok(Action::Ignore);
        };
        if !config.is_active {
            return Ok(Action::Ignore);
        }

        let action = if is_greeting(text) {
            Action::reply(config.media_url.as_deref(), &config.welcome_message)
        } else {
            let wanted = normalize_key(text);
            let options = self.store.list_options(&config.id).await?;
            match options
                .iter()
                .find(|opt| normalize_key(&opt.option_key) == wanted)
            {
                Some(opt) => Action::reply(opt.media_url.as_deref(), &opt.answer),
                None => return Ok(Action::Ignore),
            }
        };

        self.store
            .touch_conversation(owner_account_id, chat_id, Utc::now())
            .await?;
        Ok(action)
    }
}
