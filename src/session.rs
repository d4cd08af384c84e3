use crate::connector::Connector;
use crate::error::Result;
use crate::types::{SendReceipt, SessionStatus, SessionSummary, UploadedMedia};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct SessionState {
    status: SessionStatus,
    pairing_payload: Option<String>,
    last_activity: DateTime<Utc>,
}

/// One live connection for one account.
///
/// Status, pairing payload and last activity sit behind a short-lived lock.
/// Every outbound connector call goes through `send_lock`, so auto-replies and
/// API sends for the same account never interleave on the connection.
pub struct Session {
    account_id: String,
    connector: Arc<dyn Connector>,
    state: RwLock<SessionState>,
    send_lock: tokio::sync::Mutex<()>,
    init_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    pairing_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(account_id: &str, connector: Arc<dyn Connector>, cancel: CancellationToken) -> Self {
        Self {
            account_id: account_id.to_string(),
            connector,
            state: RwLock::new(SessionState {
                status: SessionStatus::Initializing,
                pairing_payload: None,
                last_activity: Utc::now(),
            }),
            send_lock: tokio::sync::Mutex::new(()),
            init_lock: tokio::sync::Mutex::new(()),
            cancel,
            pairing_task: Mutex::new(None),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn status(&self) -> SessionStatus {
        self.state.read().status
    }

    pub fn is_ready(&self) -> bool {
        self.status() == SessionStatus::Ready
    }

    /// Latest pairing code, present only while the session awaits a scan.
    pub fn pairing_payload(&self) -> Option<String> {
        self.state.read().pairing_payload.clone()
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.state.read().last_activity
    }

    pub fn summary(&self) -> SessionSummary {
        let status = self.status();
        SessionSummary {
            account_id: self.account_id.clone(),
            status,
            is_ready: status == SessionStatus::Ready,
        }
    }

    /// Applies `next` if the lifecycle allows it; returns whether it did.
    pub fn transition(&self, next: SessionStatus) -> bool {
        let mut state = self.state.write();
        if !state.status.can_transition_to(next) {
            tracing::debug!(
                account_id = %self.account_id,
                from = %state.status,
                to = %next,
                "ignoring session transition"
            );
            return false;
        }
        if state.status != next {
            tracing::info!(account_id = %self.account_id, from = %state.status, to = %next, "session status");
        }
        state.status = next;
        if next != SessionStatus::QrReady {
            state.pairing_payload = None;
        }
        state.last_activity = Utc::now();
        true
    }

    /// Stores a fresh pairing code and moves to `QrReady`.
    pub fn set_pairing_code(&self, code: String) -> bool {
        let mut state = self.state.write();
        if !state.status.can_transition_to(SessionStatus::QrReady) {
            return false;
        }
        state.status = SessionStatus::QrReady;
        state.pairing_payload = Some(code);
        state.last_activity = Utc::now();
        true
    }

    pub fn touch(&self) {
        self.state.write().last_activity = Utc::now();
    }

    /// Held for the whole of one initialisation attempt.
    pub(crate) fn init_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.init_lock
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn set_pairing_task(&self, handle: JoinHandle<()>) {
        if let Some(old) = self.pairing_task.lock().replace(handle) {
            old.abort();
        }
    }

    pub(crate) fn pairing_in_progress(&self) -> bool {
        self.pairing_task
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stops any pairing consumer and anything else bound to this session.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.pairing_task.lock().take() {
            handle.abort();
        }
    }

    pub async fn send_text(&self, address: &str, text: &str) -> Result<SendReceipt> {
        let _guard = self.send_lock.lock().await;
        let receipt = self.connector.send_text(address, text).await?;
        self.touch();
        Ok(receipt)
    }

    pub async fn upload_media(&self, data: &[u8], mimetype: &str) -> Result<UploadedMedia> {
        let _guard = self.send_lock.lock().await;
        self.connector.upload_media(data, mimetype).await
    }

    pub async fn send_media(
        &self,
        address: &str,
        media: &UploadedMedia,
        caption: &str,
        mimetype: &str,
        length: u64,
    ) -> Result<SendReceipt> {
        let _guard = self.send_lock.lock().await;
        let receipt = self
            .connector
            .send_media(address, media, caption, mimetype, length)
            .await?;
        self.touch();
        Ok(receipt)
    }
}
