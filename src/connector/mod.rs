//! Seam to the messaging network. The wire protocol, credentials and device
//! pairing live behind [`Connector`]; the rest of the crate only sees
//! connection state, pairing events and send receipts.

pub mod sidecar;

use crate::error::Result;
use crate::types::{ConnectorEvent, PairingEvent, SendReceipt, UploadedMedia};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Callback receiving lifecycle and inbound-message events for one account.
pub type EventHandler = Arc<dyn Fn(ConnectorEvent) + Send + Sync>;

/// Lazy, possibly unbounded sequence of pairing events. Ends when the source
/// closes it.
pub type PairingStream = BoxStream<'static, PairingEvent>;

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self);

    /// Removes the linked device remotely.
    async fn logout(&self) -> Result<()>;

    async fn is_authenticated(&self) -> bool;

    async fn open_pairing_stream(&self) -> Result<PairingStream>;

    async fn send_text(&self, address: &str, text: &str) -> Result<SendReceipt>;

    async fn upload_media(&self, data: &[u8], mimetype: &str) -> Result<UploadedMedia>;

    async fn send_media(
        &self,
        address: &str,
        media: &UploadedMedia,
        caption: &str,
        mimetype: &str,
        length: u64,
    ) -> Result<SendReceipt>;

    /// Installs the event callback, replacing any previous one.
    fn subscribe(&self, handler: EventHandler);

    /// Drops the event callback. Later events for the account go nowhere.
    fn unsubscribe(&self);
}

/// Builds connectors bound to stored credentials.
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    /// Binds the account's stored credential, or a fresh unpaired one. Must
    /// not block: it runs inside the registry's critical section.
    fn connector_for(&self, account_id: &str) -> Arc<dyn Connector>;

    /// Account ids that still have a credential in durable storage.
    async fn stored_credentials(&self) -> Result<Vec<String>>;
}
