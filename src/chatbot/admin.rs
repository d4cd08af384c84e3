use super::normalize_key;
use crate::db::{new_id, ChatbotConfig, ChatbotOption, ChatbotStore};
use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptionInput {
    pub key: String,
    pub label: String,
    pub answer: String,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub order: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatbotView {
    #[serde(flatten)]
    pub config: ChatbotConfig,
    pub options: Vec<ChatbotOption>,
}

fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Management operations over each owner's single chatbot.
#[derive(Clone)]
pub struct ChatbotAdmin {
    store: Arc<dyn ChatbotStore>,
}

impl ChatbotAdmin {
    pub fn new(store: Arc<dyn ChatbotStore>) -> Self {
        Self { store }
    }

    async fn require(&self, owner_account_id: &str) -> Result<ChatbotConfig> {
        self.store
            .find_chatbot(owner_account_id)
            .await?
            .ok_or_else(|| Error::ConfigNotFound(owner_account_id.to_string()))
    }

    pub async fn save_chatbot(
        &self,
        owner_account_id: &str,
        welcome_message: &str,
        media_url: Option<String>,
        is_active: bool,
    ) -> Result<ChatbotConfig> {
        let owner = required("account_id", owner_account_id)?;
        let welcome_message = required("welcome_message", welcome_message)?;
        let now = Utc::now();
        let config = match self.store.find_chatbot(&owner).await? {
            Some(existing) => ChatbotConfig {
                welcome_message,
                media_url: optional(media_url),
                is_active,
                updated_at: now,
                ..existing
            },
            None => ChatbotConfig {
                id: new_id("bot"),
                owner_account_id: owner,
                welcome_message,
                media_url: optional(media_url),
                is_active,
                created_at: now,
                updated_at: now,
            },
        };
        self.store.save_chatbot(&config).await?;
        Ok(config)
    }

    pub async fn get_chatbot(&self, owner_account_id: &str) -> Result<ChatbotView> {
        let config = self.require(owner_account_id).await?;
        let options = self.store.list_options(&config.id).await?;
        Ok(ChatbotView { config, options })
    }

    /// Creates the option, or replaces the one with the same key. Keys are
    /// case-insensitive.
    pub async fn upsert_option(
        &self,
        owner_account_id: &str,
        input: OptionInput,
    ) -> Result<ChatbotOption> {
        let key = normalize_key(&required("key", &input.key)?);
        let label = required("label", &input.label)?;
        let answer = required("answer", &input.answer)?;
        let config = self.require(owner_account_id).await?;

        let now = Utc::now();
        let existing = self
            .store
            .list_options(&config.id)
            .await?
            .into_iter()
            .find(|opt| normalize_key(&opt.option_key) == key);
        let option = ChatbotOption {
            id: existing
                .as_ref()
                .map(|o| o.id.clone())
                .unwrap_or_else(|| new_id("opt")),
            chatbot_id: config.id.clone(),
            option_key: key,
            label,
            answer,
            media_url: optional(input.media_url),
            media_type: optional(input.media_type),
            sort_order: input.order,
            created_at: existing.map(|o| o.created_at).unwrap_or(now),
            updated_at: now,
        };
        self.store.save_option(&option).await?;
        Ok(option)
    }

    pub async fn delete_option(&self, owner_account_id: &str, key: &str) -> Result<()> {
        let config = self.require(owner_account_id).await?;
        if !self.store.delete_option(&config.id, &normalize_key(key)).await? {
            return Err(Error::ConfigNotFound(format!("option {key}")));
        }
        Ok(())
    }

    pub async fn set_active(&self, owner_account_id: &str, is_active: bool) -> Result<ChatbotConfig> {
        let config = self.require(owner_account_id).await?;
        let config = ChatbotConfig {
            is_active,
            updated_at: Utc::now(),
            ..config
        };
        self.store.save_chatbot(&config).await?;
        Ok(config)
    }

    pub async fn delete_chatbot(&self, owner_account_id: &str) -> Result<()> {
        if !self.store.delete_chatbot(owner_account_id).await? {
            return Err(Error::ConfigNotFound(owner_account_id.to_string()));
        }
        Ok(())
    }

    /// Switches the owner's chatbot off if there is one.
    pub async fn deactivate(&self, owner_account_id: &str) -> Result<()> {
        match self.set_active(owner_account_id, false).await {
            Ok(_) | Err(Error::ConfigNotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }
}
