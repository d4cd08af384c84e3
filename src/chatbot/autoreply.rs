use super::engine::{Action, ChatbotEngine};
use crate::error::Result;
use crate::media::fetch_media;
use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::types::InboundEnvelope;
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Everything a reply needs besides the message itself.
#[derive(Clone)]
pub struct AutoReply {
    engine: ChatbotEngine,
    registry: Arc<SessionRegistry>,
    http: Client,
}

impl AutoReply {
    pub fn new(engine: ChatbotEngine, registry: Arc<SessionRegistry>, http: Client) -> Self {
        Self {
            engine,
            registry,
            http,
        }
    }

    /// Drains routed inbound messages until cancelled or the queue closes.
    pub fn spawn(
        self,
        mut rx: mpsc::Receiver<InboundEnvelope>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(envelope) => {
                            let worker = self.clone();
                            tokio::spawn(async move { worker.handle(envelope).await });
                        }
                        None => break,
                    }
                }
            }
            debug!("auto-reply worker stopped");
        })
    }

    /// Evaluates and answers one message. Failures are logged, never returned.
    pub async fn handle(&self, envelope: InboundEnvelope) {
        let message = &envelope.message;
        let action = match self
            .engine
            .evaluate_incoming(
                &envelope.account_id,
                &message.from,
                &message.body,
                message.is_from_me,
            )
            .await
        {
            Ok(action) => action,
            Err(err) => {
                warn!(account_id = %envelope.account_id, chat_id = %message.from, "chatbot evaluation failed: {err}");
                return;
            }
        };
        if action == Action::Ignore {
            return;
        }

        let Some(session) = self.registry.lookup(&envelope.account_id) else {
            debug!(account_id = %envelope.account_id, "no session for auto-reply");
            return;
        };
        if !session.is_ready() {
            debug!(account_id = %envelope.account_id, status = %session.status(), "session not ready for auto-reply");
            return;
        }

        if let Err(err) = execute_action(&session, &self.http, &message.from, action).await {
            warn!(account_id = %envelope.account_id, chat_id = %message.from, "auto-reply send failed: {err}");
        }
    }
}

/// Sends `action` to `chat_id`. A media reply that cannot be fetched,
/// uploaded or sent degrades to its caption as plain text.
pub async fn execute_action(
    session: &Session,
    http: &Client,
    chat_id: &str,
    action: Action,
) -> Result<()> {
    match action {
        Action::Ignore => Ok(()),
        Action::SendText { body } => {
            session.send_text(chat_id, &body).await?;
            Ok(())
        }
        Action::SendMedia { url, caption } => {
            if let Err(err) = send_media_reply(session, http, chat_id, &url, &caption).await {
                warn!(account_id = %session.account_id(), url = %url, "media reply failed, sending text: {err}");
                session.send_text(chat_id, &caption).await?;
            }
            Ok(())
        }
    }
}

async fn send_media_reply(
    session: &Session,
    http: &Client,
    chat_id: &str,
    url: &str,
    caption: &str,
) -> Result<()> {
    let asset = fetch_media(http, url).await?;
    let uploaded = session.upload_media(&asset.bytes, &asset.mimetype).await?;
    session
        .send_media(chat_id, &uploaded, caption, &asset.mimetype, asset.len())
        .await?;
    Ok(())
}
