#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use keepconnect::config::SessionsConfig;
use keepconnect::connector::{Connector, ConnectorFactory, EventHandler, PairingStream};
use keepconnect::db::{ChatbotConfig, ChatbotOption, ChatbotStore, ConversationState};
use keepconnect::error::{Error, Result};
use keepconnect::metadata::{MetadataStore, SessionMetadataRecord};
use keepconnect::registry::SessionRegistry;
use keepconnect::types::{ConnectorEvent, InboundEnvelope, PairingEvent, SendReceipt, UploadedMedia};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text { to: String, text: String },
    Media { to: String, caption: String, mimetype: String, length: u64 },
}

pub struct StubConnector {
    pub authenticated: AtomicBool,
    pub fail_connect: AtomicBool,
    pub fail_logout: AtomicBool,
    pub fail_upload: AtomicBool,
    pub fail_pairing_open: AtomicBool,
    pub connect_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,
    pub send_calls: AtomicUsize,
    pub failing_addresses: Mutex<HashSet<String>>,
    pub sent: Mutex<Vec<Sent>>,
    pairing_tx: mpsc::UnboundedSender<PairingEvent>,
    pairing_rx: Mutex<Option<mpsc::UnboundedReceiver<PairingEvent>>>,
    handler: Mutex<Option<EventHandler>>,
}

impl StubConnector {
    pub fn new() -> Self {
        let (pairing_tx, pairing_rx) = mpsc::unbounded_channel();
        Self {
            authenticated: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            fail_logout: AtomicBool::new(false),
            fail_upload: AtomicBool::new(false),
            fail_pairing_open: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            upload_calls: AtomicUsize::new(0),
            send_calls: AtomicUsize::new(0),
            failing_addresses: Mutex::new(HashSet::new()),
            sent: Mutex::new(Vec::new()),
            pairing_tx,
            pairing_rx: Mutex::new(Some(pairing_rx)),
            handler: Mutex::new(None),
        }
    }

    pub fn authenticated() -> Self {
        let stub = Self::new();
        stub.authenticated.store(true, Ordering::SeqCst);
        stub
    }

    /// Feeds one event into the open pairing stream.
    pub fn pair(&self, event: PairingEvent) {
        let _ = self.pairing_tx.send(event);
    }

    /// Delivers an event as the network would.
    pub fn emit(&self, event: ConnectorEvent) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.handler.lock().is_some()
    }

    pub fn fail_for(&self, address: &str) {
        self.failing_addresses.lock().insert(address.to_string());
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    fn check_address(&self, address: &str) -> Result<()> {
        if self.failing_addresses.lock().contains(address) {
            return Err(Error::Connector(format!("delivery to {address} rejected")));
        }
        Ok(())
    }

    fn receipt(&self) -> SendReceipt {
        let n = self.send_calls.fetch_add(1, Ordering::SeqCst);
        SendReceipt {
            message_id: format!("msg-{n}"),
            timestamp: Utc::now().timestamp(),
        }
    }
}

#[async_trait]
impl Connector for StubConnector {
    async fn connect(&self) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::Connector("connect refused".to_string()));
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn logout(&self) -> Result<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_logout.load(Ordering::SeqCst) {
            return Err(Error::Connector("logout rejected".to_string()));
        }
        Ok(())
    }

    async fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn open_pairing_stream(&self) -> Result<PairingStream> {
        if self.fail_pairing_open.load(Ordering::SeqCst) {
            return Err(Error::Connector("pairing unavailable".to_string()));
        }
        let rx = self
            .pairing_rx
            .lock()
            .take()
            .ok_or_else(|| Error::Connector("pairing stream already open".to_string()))?;
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed())
    }

    async fn send_text(&self, address: &str, text: &str) -> Result<SendReceipt> {
        self.check_address(address)?;
        self.sent.lock().push(Sent::Text {
            to: address.to_string(),
            text: text.to_string(),
        });
        Ok(self.receipt())
    }

    async fn upload_media(&self, data: &[u8], mimetype: &str) -> Result<UploadedMedia> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(Error::Connector("upload rejected".to_string()));
        }
        Ok(UploadedMedia {
            url: format!("https://mmg.example/{}", data.len()),
            direct_path: "/v/t62/stub".to_string(),
            media_key: "a2V5".to_string(),
            file_enc_sha256: "ZW5j".to_string(),
            file_sha256: mimetype.to_string(),
        })
    }

    async fn send_media(
        &self,
        address: &str,
        _media: &UploadedMedia,
        caption: &str,
        mimetype: &str,
        length: u64,
    ) -> Result<SendReceipt> {
        self.check_address(address)?;
        self.sent.lock().push(Sent::Media {
            to: address.to_string(),
            caption: caption.to_string(),
            mimetype: mimetype.to_string(),
            length,
        });
        Ok(self.receipt())
    }

    fn subscribe(&self, handler: EventHandler) {
        *self.handler.lock() = Some(handler);
    }

    fn unsubscribe(&self) {
        *self.handler.lock() = None;
    }
}

#[derive(Default)]
pub struct StubFactory {
    connectors: Mutex<HashMap<String, Arc<StubConnector>>>,
    pub constructed: AtomicUsize,
    pub credentials: Mutex<Vec<String>>,
}

impl StubFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-registers the connector handed out for `account_id`.
    pub fn prepare(&self, account_id: &str, connector: StubConnector) -> Arc<StubConnector> {
        let connector = Arc::new(connector);
        self.connectors
            .lock()
            .insert(account_id.to_string(), connector.clone());
        connector
    }

    pub fn connector(&self, account_id: &str) -> Arc<StubConnector> {
        self.connectors
            .lock()
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(StubConnector::new()))
            .clone()
    }

    pub fn with_credentials(&self, ids: &[&str]) {
        *self.credentials.lock() = ids.iter().map(|s| s.to_string()).collect();
    }
}

#[async_trait]
impl ConnectorFactory for StubFactory {
    fn connector_for(&self, account_id: &str) -> Arc<dyn Connector> {
        self.constructed.fetch_add(1, Ordering::SeqCst);
        self.connector(account_id)
    }

    async fn stored_credentials(&self) -> Result<Vec<String>> {
        Ok(self.credentials.lock().clone())
    }
}

#[derive(Default)]
pub struct MemoryMetadata {
    pub records: Mutex<Vec<SessionMetadataRecord>>,
    pub saves: AtomicUsize,
    pub fail_save: AtomicBool,
}

impl MemoryMetadata {
    pub fn with_records(records: Vec<SessionMetadataRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadata {
    async fn save(&self, records: &[SessionMetadataRecord]) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(Error::Persistence("disk full".to_string()));
        }
        *self.records.lock() = records.to_vec();
        Ok(())
    }

    async fn load(&self) -> Result<Vec<SessionMetadataRecord>> {
        Ok(self.records.lock().clone())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    chatbots: Mutex<Vec<ChatbotConfig>>,
    options: Mutex<Vec<ChatbotOption>>,
    conversations: Mutex<Vec<ConversationState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatbotStore for MemoryStore {
    async fn find_chatbot(&self, owner_account_id: &str) -> Result<Option<ChatbotConfig>> {
        Ok(self
            .chatbots
            .lock()
            .iter()
            .find(|c| c.owner_account_id == owner_account_id)
            .cloned())
    }

    async fn save_chatbot(&self, config: &ChatbotConfig) -> Result<()> {
        let mut chatbots = self.chatbots.lock();
        match chatbots
            .iter_mut()
            .find(|c| c.owner_account_id == config.owner_account_id)
        {
            Some(existing) => {
                existing.welcome_message = config.welcome_message.clone();
                existing.media_url = config.media_url.clone();
                existing.is_active = config.is_active;
                existing.updated_at = config.updated_at;
            }
            None => chatbots.push(config.clone()),
        }
        Ok(())
    }

    async fn delete_chatbot(&self, owner_account_id: &str) -> Result<bool> {
        let mut chatbots = self.chatbots.lock();
        let Some(pos) = chatbots
            .iter()
            .position(|c| c.owner_account_id == owner_account_id)
        else {
            return Ok(false);
        };
        let removed = chatbots.remove(pos);
        self.options.lock().retain(|o| o.chatbot_id != removed.id);
        Ok(true)
    }

    async fn list_options(&self, chatbot_id: &str) -> Result<Vec<ChatbotOption>> {
        let mut out: Vec<ChatbotOption> = self
            .options
            .lock()
            .iter()
            .filter(|o| o.chatbot_id == chatbot_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then_with(|| a.option_key.cmp(&b.option_key))
        });
        Ok(out)
    }

    async fn save_option(&self, option: &ChatbotOption) -> Result<()> {
        let mut options = self.options.lock();
        match options
            .iter_mut()
            .find(|o| o.chatbot_id == option.chatbot_id && o.option_key == option.option_key)
        {
            Some(existing) => {
                let id = existing.id.clone();
                let created_at = existing.created_at;
                *existing = ChatbotOption {
                    id,
                    created_at,
                    ..option.clone()
                };
            }
            None => options.push(option.clone()),
        }
        Ok(())
    }

    async fn delete_option(&self, chatbot_id: &str, option_key: &str) -> Result<bool> {
        let mut options = self.options.lock();
        let before = options.len();
        options.retain(|o| !(o.chatbot_id == chatbot_id && o.option_key == option_key));
        Ok(options.len() != before)
    }

    async fn find_conversation(
        &self,
        owner_account_id: &str,
        chat_id: &str,
    ) -> Result<Option<ConversationState>> {
        Ok(self
            .conversations
            .lock()
            .iter()
            .find(|c| c.owner_account_id == owner_account_id && c.chat_id == chat_id)
            .cloned())
    }

    async fn touch_conversation(
        &self,
        owner_account_id: &str,
        chat_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conversations = self.conversations.lock();
        match conversations
            .iter_mut()
            .find(|c| c.owner_account_id == owner_account_id && c.chat_id == chat_id)
        {
            Some(existing) => existing.last_message_time = at,
            None => conversations.push(ConversationState {
                id: keepconnect::db::new_id("conv"),
                owner_account_id: owner_account_id.to_string(),
                chat_id: chat_id.to_string(),
                last_message_time: at,
                created_at: at,
            }),
        }
        Ok(())
    }
}

pub fn sessions_config() -> SessionsConfig {
    SessionsConfig {
        metadata_path: "unused".to_string(),
        snapshot_interval_secs: 300,
        pairing_timeout_secs: 5,
        logout_timeout_secs: 1,
        inbound_queue: 16,
    }
}

pub fn registry_with(
    factory: Arc<StubFactory>,
    metadata: Arc<MemoryMetadata>,
    config: SessionsConfig,
) -> (Arc<SessionRegistry>, mpsc::Receiver<InboundEnvelope>) {
    let (tx, rx) = mpsc::channel(config.inbound_queue);
    let registry = Arc::new(SessionRegistry::new(factory, metadata, tx, config));
    (registry, rx)
}

pub fn registry(
    factory: Arc<StubFactory>,
) -> (Arc<SessionRegistry>, mpsc::Receiver<InboundEnvelope>) {
    registry_with(factory, Arc::new(MemoryMetadata::default()), sessions_config())
}

/// Polls `cond` until it holds or two seconds pass.
pub async fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
