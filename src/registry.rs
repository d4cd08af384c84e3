use crate::config::SessionsConfig;
use crate::connector::{ConnectorFactory, EventHandler, PairingStream};
use crate::error::{Error, Result};
use crate::metadata::{MetadataStore, SessionMetadataRecord};
use crate::session::Session;
use crate::types::{ConnectorEvent, InboundEnvelope, PairingEvent, SessionStatus, SessionSummary};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub restored: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Owns every live [`Session`], keyed by account id.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    factory: Arc<dyn ConnectorFactory>,
    metadata: Arc<dyn MetadataStore>,
    inbound: mpsc::Sender<InboundEnvelope>,
    config: SessionsConfig,
    root: CancellationToken,
    snapshot_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionRegistry {
    pub fn new(
        factory: Arc<dyn ConnectorFactory>,
        metadata: Arc<dyn MetadataStore>,
        inbound: mpsc::Sender<InboundEnvelope>,
        config: SessionsConfig,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            factory,
            metadata,
            inbound,
            config,
            root: CancellationToken::new(),
            snapshot_task: Mutex::new(None),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Returns the account's session, creating it on first use. Concurrent
    /// callers for one account all receive the same instance.
    pub fn get_or_create(&self, account_id: &str) -> Arc<Session> {
        if let Some(existing) = self.sessions.get(account_id) {
            return existing.value().clone();
        }
        match self.sessions.entry(account_id.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let session = self.build_session(account_id);
                entry.insert(session.clone());
                debug!(account_id, "session created");
                session
            }
        }
    }

    // Runs under the map shard lock: nothing here may await.
    fn build_session(&self, account_id: &str) -> Arc<Session> {
        let connector = self.factory.connector_for(account_id);
        let session = Arc::new(Session::new(
            account_id,
            connector.clone(),
            self.root.child_token(),
        ));
        connector.subscribe(event_router(Arc::downgrade(&session), self.inbound.clone()));
        session
    }

    pub fn lookup(&self, account_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(account_id).map(|e| e.value().clone())
    }

    /// Brings the account's session up. Unpaired credentials get a pairing
    /// consumer in the background; the call returns once it is spawned.
    pub async fn initialize(&self, account_id: &str) -> Result<Arc<Session>> {
        let session = self.get_or_create(account_id);
        let owner = Arc::clone(&session);
        let _init = owner.init_lock().lock().await;

        match session.status() {
            SessionStatus::Ready => return Ok(session),
            _ if session.pairing_in_progress() => return Ok(session),
            SessionStatus::Disconnected | SessionStatus::AuthFailed => {
                session.transition(SessionStatus::Initializing);
            }
            _ => {}
        }

        let connector = session.connector().clone();
        if connector.is_authenticated().await {
            if let Err(err) = connector.connect().await {
                session.transition(SessionStatus::Disconnected);
                return Err(err);
            }
            session.transition(SessionStatus::Ready);
            return Ok(session);
        }

        let stream = match connector.open_pairing_stream().await {
            Ok(stream) => stream,
            Err(err) => {
                session.transition(SessionStatus::AuthFailed);
                return Err(Error::PairingFailed(err.to_string()));
            }
        };
        if let Err(err) = connector.connect().await {
            session.transition(SessionStatus::Disconnected);
            return Err(err);
        }

        let timeout = Duration::from_secs(self.config.pairing_timeout_secs.max(1));
        let handle = tokio::spawn(drive_pairing(session.clone(), stream, timeout));
        session.set_pairing_task(handle);
        Ok(session)
    }

    /// Tears the session down. Remote logout is best effort; local cleanup
    /// always happens.
    pub async fn logout(&self, account_id: &str) -> Result<()> {
        let session = self
            .lookup(account_id)
            .ok_or_else(|| Error::SessionNotFound(account_id.to_string()))?;

        session.cancel();
        let timeout = Duration::from_secs(self.config.logout_timeout_secs.max(1));
        match tokio::time::timeout(timeout, session.connector().logout()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(account_id, "remote logout failed: {err}"),
            Err(_) => warn!(account_id, "remote logout timed out"),
        }
        session.connector().unsubscribe();
        session.connector().disconnect().await;
        session.transition(SessionStatus::Disconnected);

        self.sessions
            .remove_if(account_id, |_, current| Arc::ptr_eq(current, &session));
        info!(account_id, "session logged out");

        self.persist_logged().await;
        Ok(())
    }

    pub fn list_all(&self) -> Vec<SessionSummary> {
        let mut out: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|entry| entry.value().summary())
            .collect();
        out.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        out
    }

    /// Reconnects accounts from the last snapshot whose credentials survive.
    pub async fn restore_all(&self) -> Result<RestoreReport> {
        let records = self.metadata.load().await?;
        let mut report = RestoreReport::default();
        if records.is_empty() {
            return Ok(report);
        }

        let credentials: HashSet<String> =
            self.factory.stored_credentials().await?.into_iter().collect();

        let mut pending = Vec::new();
        for record in records {
            if !credentials.contains(&record.account_id) {
                info!(account_id = %record.account_id, "no stored credential, skipping restore");
                report.skipped += 1;
                continue;
            }
            if self.sessions.contains_key(&record.account_id) {
                report.skipped += 1;
                continue;
            }
            pending.push(self.get_or_create(&record.account_id));
        }

        let outcomes = join_all(pending.into_iter().map(|session| async move {
            let outcome = session.connector().connect().await;
            (session, outcome)
        }))
        .await;

        for (session, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    session.transition(SessionStatus::Ready);
                    report.restored += 1;
                }
                Err(err) => {
                    warn!(account_id = %session.account_id(), "restore connect failed: {err}");
                    session.transition(SessionStatus::Disconnected);
                    report.failed += 1;
                }
            }
        }

        info!(
            restored = report.restored,
            failed = report.failed,
            skipped = report.skipped,
            "session restore finished"
        );
        Ok(report)
    }

    pub fn snapshot(&self) -> Vec<SessionMetadataRecord> {
        let mut records: Vec<SessionMetadataRecord> = self
            .sessions
            .iter()
            .map(|entry| {
                let session = entry.value();
                SessionMetadataRecord {
                    account_id: session.account_id().to_string(),
                    last_activity: session.last_activity(),
                    status: session.status(),
                }
            })
            .collect();
        records.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        records
    }

    pub async fn persist_snapshot(&self) -> Result<()> {
        let records = self.snapshot();
        self.metadata.save(&records).await
    }

    async fn persist_logged(&self) {
        if let Err(err) = self.persist_snapshot().await {
            warn!("session snapshot failed: {err}");
        }
    }

    /// Persists the session set every `interval` until shutdown.
    pub fn start_snapshots(self: &Arc<Self>, interval: Duration) {
        let registry = Arc::downgrade(self);
        let cancel = self.root.child_token();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else { break };
                        registry.persist_logged().await;
                    }
                }
            }
        });
        if let Some(old) = self.snapshot_task.lock().replace(handle) {
            old.abort();
        }
    }

    pub async fn shutdown(&self) {
        self.root.cancel();
        let task = self.snapshot_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        let sessions: Vec<Arc<Session>> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        for session in &sessions {
            session.cancel();
            session.connector().unsubscribe();
        }

        self.persist_logged().await;
        join_all(sessions.iter().map(|s| s.connector().disconnect())).await;
        info!(sessions = sessions.len(), "session registry stopped");
    }
}

fn event_router(session: Weak<Session>, inbound: mpsc::Sender<InboundEnvelope>) -> EventHandler {
    Arc::new(move |event| {
        let Some(session) = session.upgrade() else {
            return;
        };
        match event {
            ConnectorEvent::Connected => {
                session.transition(SessionStatus::Ready);
            }
            ConnectorEvent::Disconnected | ConnectorEvent::LoggedOut => {
                session.transition(SessionStatus::Disconnected);
            }
            ConnectorEvent::Message(message) => {
                session.touch();
                let envelope = InboundEnvelope {
                    account_id: session.account_id().to_string(),
                    message,
                    received_at: Utc::now(),
                };
                if let Err(err) = inbound.try_send(envelope) {
                    warn!(account_id = %session.account_id(), "dropping inbound message: {err}");
                }
            }
        }
    })
}

async fn drive_pairing(session: Arc<Session>, mut stream: PairingStream, timeout: Duration) {
    let cancel = session.cancel_token().clone();
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(account_id = %session.account_id(), "pairing cancelled");
                return;
            }
            _ = &mut deadline => {
                warn!(account_id = %session.account_id(), "pairing timed out");
                session.transition(SessionStatus::AuthFailed);
                return;
            }
            next = stream.next() => match next {
                Some(PairingEvent::Code(code)) => {
                    session.set_pairing_code(code);
                }
                Some(PairingEvent::Success) => {
                    session.transition(SessionStatus::Authenticated);
                    session.transition(SessionStatus::Ready);
                    return;
                }
                Some(PairingEvent::Failure(reason)) => {
                    warn!(account_id = %session.account_id(), "pairing failed: {reason}");
                    session.transition(SessionStatus::AuthFailed);
                    return;
                }
                None => {
                    session.transition(SessionStatus::AuthFailed);
                    return;
                }
            }
        }
    }
}
