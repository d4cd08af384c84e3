use super::{Connector, ConnectorFactory, EventHandler, PairingStream};
use crate::config::ConnectorConfig;
use crate::error::{Error, Result};
use crate::types::{ConnectorEvent, PairingEvent, SendReceipt, UploadedMedia};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Event pushed by the sidecar to `/v1/connector/events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarEventPayload {
    pub account_id: String,
    pub event: ConnectorEvent,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    authenticated: bool,
}

#[derive(Debug, Default, Deserialize)]
struct PairingBatch {
    #[serde(default)]
    events: Vec<PairingEvent>,
    #[serde(default)]
    closed: bool,
}

#[derive(Debug, Deserialize)]
struct AccountsResponse {
    accounts: Vec<String>,
}

/// Routes events pushed by the sidecar to the handler each connector
/// subscribed for its account.
#[derive(Clone, Default)]
pub struct SidecarHub {
    handlers: Arc<RwLock<HashMap<String, EventHandler>>>,
}

impl SidecarHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, account_id: &str, handler: EventHandler) {
        self.handlers.write().insert(account_id.to_string(), handler);
    }

    pub fn unregister(&self, account_id: &str) {
        self.handlers.write().remove(account_id);
    }

    /// Returns false when no connector is subscribed for the account.
    pub fn deliver(&self, account_id: &str, event: ConnectorEvent) -> bool {
        let handler = self.handlers.read().get(account_id).cloned();
        match handler {
            Some(handler) => {
                handler(event);
                true
            }
            None => false,
        }
    }
}

pub struct SidecarConnectorFactory {
    client: Client,
    base_url: String,
    poll_interval: Duration,
    hub: SidecarHub,
}

impl SidecarConnectorFactory {
    pub fn new(cfg: &ConnectorConfig, hub: SidecarHub) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.sidecar_url.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_millis(cfg.pairing_poll_ms.max(50)),
            hub,
        })
    }
}

#[async_trait]
impl ConnectorFactory for SidecarConnectorFactory {
    fn connector_for(&self, account_id: &str) -> Arc<dyn Connector> {
        Arc::new(SidecarConnector {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            account_id: account_id.to_string(),
            poll_interval: self.poll_interval,
            hub: self.hub.clone(),
        })
    }

    async fn stored_credentials(&self) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(format!("{}/v1/accounts", self.base_url))
            .send()
            .await?;
        let body: AccountsResponse = check_status(resp).await?.json().await?;
        Ok(body.accounts)
    }
}

pub struct SidecarConnector {
    client: Client,
    base_url: String,
    account_id: String,
    poll_interval: Duration,
    hub: SidecarHub,
}

impl SidecarConnector {
    fn account_url(&self, suffix: &str) -> String {
        format!(
            "{}/v1/accounts/{}{}",
            self.base_url,
            utf8_percent_encode(&self.account_id, NON_ALPHANUMERIC),
            suffix
        )
    }

    async fn post_empty(&self, suffix: &str) -> Result<()> {
        let resp = self.client.post(self.account_url(suffix)).send().await?;
        check_status(resp).await?;
        Ok(())
    }
}

async fn check_status(resp: Response) -> Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Connector(format!("sidecar error {}: {}", status, body)))
}

async fn fetch_pairing(client: &Client, url: &str) -> Result<PairingBatch> {
    let resp = client.get(url).send().await?;
    Ok(check_status(resp).await?.json().await?)
}

struct PairingPoll {
    client: Client,
    url: String,
    interval: Duration,
    buffered: VecDeque<PairingEvent>,
    polled: bool,
    closed: bool,
}

#[async_trait]
impl Connector for SidecarConnector {
    async fn connect(&self) -> Result<()> {
        self.post_empty("/connect").await
    }

    async fn disconnect(&self) {
        if let Err(err) = self.post_empty("/disconnect").await {
            tracing::debug!(account_id = %self.account_id, "sidecar disconnect failed: {err}");
        }
    }

    async fn logout(&self) -> Result<()> {
        self.post_empty("/logout").await
    }

    async fn is_authenticated(&self) -> bool {
        let resp = match self.client.get(self.account_url("/status")).send().await {
            Ok(resp) => resp,
            Err(_) => return false,
        };
        match check_status(resp).await {
            Ok(resp) => resp
                .json::<StatusResponse>()
                .await
                .map(|s| s.authenticated)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn open_pairing_stream(&self) -> Result<PairingStream> {
        let url = self.account_url("/pairing");
        // Fail fast if the sidecar does not know about pairing for this account.
        let first = fetch_pairing(&self.client, &url).await?;

        let state = PairingPoll {
            client: self.client.clone(),
            url,
            interval: self.poll_interval,
            buffered: first.events.into_iter().collect(),
            polled: true,
            closed: first.closed,
        };

        let stream = stream::unfold(state, |mut st| async move {
            loop {
                if let Some(evt) = st.buffered.pop_front() {
                    return Some((evt, st));
                }
                if st.closed {
                    return None;
                }
                if st.polled {
                    sleep(st.interval).await;
                }
                st.polled = true;
                match fetch_pairing(&st.client, &st.url).await {
                    Ok(batch) => {
                        st.buffered.extend(batch.events);
                        st.closed = batch.closed;
                    }
                    Err(err) => {
                        st.closed = true;
                        st.buffered.push_back(PairingEvent::Failure(err.to_string()));
                    }
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn send_text(&self, address: &str, text: &str) -> Result<SendReceipt> {
        let payload = serde_json::json!({
            "to": address,
            "text": text,
        });
        let resp = self
            .client
            .post(self.account_url("/messages/text"))
            .json(&payload)
            .send()
            .await?;
        Ok(check_status(resp).await?.json().await?)
    }

    async fn upload_media(&self, data: &[u8], mimetype: &str) -> Result<UploadedMedia> {
        let resp = self
            .client
            .post(self.account_url("/media"))
            .header(CONTENT_TYPE, mimetype)
            .body(data.to_vec())
            .send()
            .await?;
        Ok(check_status(resp).await?.json().await?)
    }

    async fn send_media(
        &self,
        address: &str,
        media: &UploadedMedia,
        caption: &str,
        mimetype: &str,
        length: u64,
    ) -> Result<SendReceipt> {
        let payload = serde_json::json!({
            "to": address,
            "media": media,
            "caption": caption,
            "mimetype": mimetype,
            "length": length,
        });
        let resp = self
            .client
            .post(self.account_url("/messages/media"))
            .json(&payload)
            .send()
            .await?;
        Ok(check_status(resp).await?.json().await?)
    }

    fn subscribe(&self, handler: EventHandler) {
        self.hub.register(&self.account_id, handler);
    }

    fn unsubscribe(&self) {
        self.hub.unregister(&self.account_id);
    }
}
