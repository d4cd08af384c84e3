use crate::address::AddressPolicy;
use crate::error::{Error, Result};
use crate::media::fetch_media;
use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::types::{SendReceipt, UploadedMedia};
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

const NOT_COMPLETED: &str = "send did not complete";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkPayload {
    Text(String),
    Media { url: String, caption: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkSendResult {
    pub recipient: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BulkSendResult {
    fn ok(recipient: &str) -> Self {
        Self {
            recipient: recipient.to_string(),
            success: true,
            error: None,
        }
    }

    fn failed(recipient: &str, error: impl Into<String>) -> Self {
        Self {
            recipient: recipient.to_string(),
            success: false,
            error: Some(error.into()),
        }
    }
}

enum Prepared {
    Text(String),
    Media {
        uploaded: UploadedMedia,
        caption: String,
        mimetype: String,
        length: u64,
    },
}

fn uniform_failure(recipients: &[String], error: &str) -> Vec<BulkSendResult> {
    recipients
        .iter()
        .map(|r| BulkSendResult::failed(r, error))
        .collect()
}

/// Fans sends out over a session's connection, one task per recipient.
#[derive(Clone)]
pub struct BulkDispatcher {
    registry: Arc<SessionRegistry>,
    policy: AddressPolicy,
    http: Client,
    max_concurrency: usize,
}

impl BulkDispatcher {
    pub fn new(
        registry: Arc<SessionRegistry>,
        policy: AddressPolicy,
        http: Client,
        max_concurrency: usize,
    ) -> Self {
        Self {
            registry,
            policy,
            http,
            max_concurrency: max_concurrency.max(1),
        }
    }

    fn ready_session(&self, account_id: &str) -> Result<Arc<Session>> {
        let session = self
            .registry
            .lookup(account_id)
            .ok_or_else(|| Error::SessionNotFound(account_id.to_string()))?;
        if !session.is_ready() {
            return Err(Error::SessionNotReady(session.status().to_string()));
        }
        Ok(session)
    }

    pub async fn send_text(&self, account_id: &str, to: &str, text: &str) -> Result<SendReceipt> {
        if text.trim().is_empty() {
            return Err(Error::Validation("message is required".to_string()));
        }
        let session = self.ready_session(account_id)?;
        let address = self.policy.normalize(to)?;
        session.send_text(&address, text).await
    }

    pub async fn send_media(
        &self,
        account_id: &str,
        to: &str,
        url: &str,
        caption: &str,
    ) -> Result<SendReceipt> {
        let session = self.ready_session(account_id)?;
        let address = self.policy.normalize(to)?;
        let asset = fetch_media(&self.http, url).await?;
        let uploaded = session.upload_media(&asset.bytes, &asset.mimetype).await?;
        session
            .send_media(&address, &uploaded, caption, &asset.mimetype, asset.len())
            .await
    }

    pub async fn send_many_for(
        &self,
        account_id: &str,
        recipients: &[String],
        payload: BulkPayload,
    ) -> Vec<BulkSendResult> {
        self.send_many(self.registry.lookup(account_id), recipients, payload)
            .await
    }

    /// Result `i` always describes `recipients[i]`. A failure for one
    /// recipient never affects another.
    pub async fn send_many(
        &self,
        session: Option<Arc<Session>>,
        recipients: &[String],
        payload: BulkPayload,
    ) -> Vec<BulkSendResult> {
        let session = match session {
            Some(session) if session.is_ready() => session,
            Some(session) => {
                let err = Error::SessionNotReady(session.status().to_string());
                return uniform_failure(recipients, &err.to_string());
            }
            None => {
                let err = Error::SessionNotReady("not_initialized".to_string());
                return uniform_failure(recipients, &err.to_string());
            }
        };
        if recipients.is_empty() {
            return Vec::new();
        }

        let prepared = match self.prepare(&session, payload).await {
            Ok(prepared) => Arc::new(prepared),
            Err(err) => {
                warn!(account_id = %session.account_id(), "bulk media preparation failed: {err}");
                return uniform_failure(recipients, &err.to_string());
            }
        };

        let results = Arc::new(Mutex::new(uniform_failure(recipients, NOT_COMPLETED)));
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut workers = JoinSet::new();

        for (idx, recipient) in recipients.iter().enumerate() {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let session = Arc::clone(&session);
            let prepared = Arc::clone(&prepared);
            let results = Arc::clone(&results);
            let policy = self.policy.clone();
            let recipient = recipient.clone();
            workers.spawn(async move {
                let _permit = permit;
                let outcome = match deliver_one(&session, &policy, &recipient, &prepared).await {
                    Ok(_) => BulkSendResult::ok(&recipient),
                    Err(err) => BulkSendResult::failed(&recipient, err.to_string()),
                };
                results.lock()[idx] = outcome;
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                warn!("bulk send worker failed: {err}");
            }
        }

        let results = results.lock().clone();
        let sent = results.iter().filter(|r| r.success).count();
        info!(
            account_id = %session.account_id(),
            total = results.len(),
            sent,
            "bulk send finished"
        );
        results
    }

    // Media is fetched and uploaded once, then reused for every recipient.
    async fn prepare(&self, session: &Session, payload: BulkPayload) -> Result<Prepared> {
        match payload {
            BulkPayload::Text(text) => {
                if text.trim().is_empty() {
                    return Err(Error::Validation("message is required".to_string()));
                }
                Ok(Prepared::Text(text))
            }
            BulkPayload::Media { url, caption } => {
                let asset = fetch_media(&self.http, &url).await?;
                let uploaded = session.upload_media(&asset.bytes, &asset.mimetype).await?;
                Ok(Prepared::Media {
                    uploaded,
                    caption,
                    length: asset.len(),
                    mimetype: asset.mimetype,
                })
            }
        }
    }
}

async fn deliver_one(
    session: &Session,
    policy: &AddressPolicy,
    recipient: &str,
    prepared: &Prepared,
) -> Result<SendReceipt> {
    let address = policy.normalize(recipient)?;
    match prepared {
        Prepared::Text(text) => session.send_text(&address, text).await,
        Prepared::Media {
            uploaded,
            caption,
            mimetype,
            length,
        } => {
            session
                .send_media(&address, uploaded, caption, mimetype, *length)
                .await
        }
    }
}
