//! Realtime API WebSocket client

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, Request, header};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

use super::protocol::{ClientEvent, ConversationItem, ServerEvent, SessionConfig, silence};
use super::turn::{TurnTracker, await_turn};
use super::{SessionConnector, SessionEvent, SpeechSession};
use crate::config::RealtimeConfig;
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Silence appended after an interrupt so the service sees the speaker change
const INTERRUPT_SILENCE_MS: u32 = 100;

/// Opens sessions against the Realtime API
pub struct RealtimeConnector {
    config: RealtimeConfig,
    api_key: Option<String>,
}

impl RealtimeConnector {
    /// Create a connector
    #[must_use]
    pub const fn new(config: RealtimeConfig, api_key: Option<String>) -> Self {
        Self { config, api_key }
    }

    fn build_request(&self) -> Result<Request<()>> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                Error::Config("OPENAI_API_KEY is required for the realtime session".to_string())
            })?;

        let url = format!("{}?model={}", self.config.url, self.config.model);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::WebSocket(format!("invalid realtime url {url}: {e}")))?;

        let bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| Error::Config(format!("invalid API key: {e}")))?;
        let headers = request.headers_mut();
        headers.insert(header::AUTHORIZATION, bearer);
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        Ok(request)
    }
}

#[async_trait]
impl SessionConnector for RealtimeConnector {
    async fn connect(
        &self,
        instructions: String,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Arc<dyn SpeechSession>> {
        let request = self.build_request()?;

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| Error::Session(format!("failed to connect: {e}")))?;

        let (sink, stream) = ws.split();
        let shared = Arc::new(SessionShared::default());
        shared.connected.store(true, Ordering::SeqCst);

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(sink, out_rx));
        let reader = tokio::spawn(read_loop(stream, Arc::clone(&shared), events.clone()));

        let session = RealtimeSession {
            id: Uuid::new_v4(),
            out_tx: Mutex::new(Some(out_tx)),
            shared,
            turn_timeout: self.config.turn_timeout,
            writer,
            reader,
        };

        session.enqueue(ClientEvent::SessionUpdate {
            session: SessionConfig::initial(instructions, &self.config.transcription_model),
        })?;

        tracing::info!(
            session_id = %session.id,
            model = %self.config.model,
            "realtime session connected"
        );
        let _ = events.send(SessionEvent::Connected);

        Ok(Arc::new(session))
    }
}

/// State shared between a session handle and its reader task
#[derive(Default)]
struct SessionShared {
    connected: AtomicBool,
    turn: TurnTracker,
    /// Interim transcription text per conversation item
    interim: Mutex<HashMap<String, String>>,
}

impl SessionShared {
    /// Apply a server event, returning what the owner should see
    fn apply(&self, event: ServerEvent) -> Option<SessionEvent> {
        match event {
            ServerEvent::TranscriptionDelta { item_id, delta } => {
                let mut interim = self.interim();
                let text = interim.entry(item_id).or_default();
                text.push_str(&delta);
                Some(SessionEvent::Transcription {
                    text: text.clone(),
                    is_final: false,
                })
            }
            ServerEvent::TranscriptionCompleted {
                item_id,
                transcript,
            } => {
                self.interim().remove(&item_id);
                let transcript = transcript.trim();
                if transcript.is_empty() {
                    return None;
                }
                Some(SessionEvent::Transcription {
                    text: transcript.to_string(),
                    is_final: true,
                })
            }
            ServerEvent::TranscriptionFailed { item_id, error } => {
                self.interim().remove(&item_id);
                tracing::warn!(item_id = %item_id, error = %error.message, "transcription failed");
                Some(SessionEvent::Error(format!(
                    "transcription failed: {}",
                    error.message
                )))
            }
            ServerEvent::ResponseCreated { response } => {
                tracing::debug!(response_id = %response.id, "response created");
                self.turn.created(&response.id);
                None
            }
            ServerEvent::ResponseTextDelta { response_id, delta } => {
                self.turn.push_delta(&response_id, &delta);
                None
            }
            ServerEvent::ResponseDone { response } => {
                let response = response.unwrap_or_default();
                tracing::debug!(response_id = %response.id, status = ?response.status, "response done");
                self.turn.complete(&response.id);
                None
            }
            ServerEvent::Error { error } if error.is_empty_commit() => {
                tracing::debug!("commit of empty audio buffer ignored");
                None
            }
            ServerEvent::Error { error } => {
                tracing::warn!(code = ?error.code, error = %error.message, "realtime error");
                Some(SessionEvent::Error(error.message))
            }
            ServerEvent::SessionCreated | ServerEvent::SessionUpdated => {
                tracing::debug!("session configured");
                None
            }
            ServerEvent::Other => None,
        }
    }

    fn interim(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.interim
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn shut_down(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.turn.cancel();
        self.interim().clear();
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<ClientEvent>,
) {
    while let Some(event) = rx.recv().await {
        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode realtime event");
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(text.into())).await {
            tracing::warn!(error = %e, "realtime send failed");
            break;
        }
    }

    let _ = sink.close().await;
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    shared: Arc<SessionShared>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(text.as_str()) {
                Ok(event) => {
                    if let Some(out) = shared.apply(event) {
                        if events.send(out).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => tracing::debug!(error = %e, "unparseable realtime event"),
            },
            Ok(Message::Close(frame)) => {
                tracing::info!(frame = ?frame, "realtime session closed by server");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "realtime connection error");
                let _ = events.send(SessionEvent::Error(format!("connection lost: {e}")));
                break;
            }
        }
    }

    shared.shut_down();
    let _ = events.send(SessionEvent::Disconnected);
}

/// A connected Realtime API session
pub struct RealtimeSession {
    id: Uuid,
    out_tx: Mutex<Option<mpsc::UnboundedSender<ClientEvent>>>,
    shared: Arc<SessionShared>,
    turn_timeout: Duration,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl RealtimeSession {
    fn enqueue(&self, event: ClientEvent) -> Result<()> {
        let guard = self
            .out_tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard
            .as_ref()
            .ok_or(Error::NotConnected)?
            .send(event)
            .map_err(|_| Error::NotConnected)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }
}

#[async_trait]
impl SpeechSession for RealtimeSession {
    fn send_audio(&self, pcm: &[u8]) -> Result<()> {
        self.ensure_connected()?;
        self.enqueue(ClientEvent::InputAudioAppend {
            audio: BASE64.encode(pcm),
        })
    }

    fn interrupt(&self) -> Result<()> {
        self.shared.turn.cancel();
        self.shared.interim().clear();
        self.ensure_connected()?;

        tracing::debug!(session_id = %self.id, "interrupting realtime session");
        self.enqueue(ClientEvent::InputAudioAppend {
            audio: BASE64.encode(silence(INTERRUPT_SILENCE_MS)),
        })
    }

    fn send_context_update(&self, instructions: &str) -> Result<()> {
        self.ensure_connected()?;
        tracing::debug!(
            session_id = %self.id,
            chars = instructions.len(),
            "updating session instructions"
        );
        self.enqueue(ClientEvent::SessionUpdate {
            session: SessionConfig::instructions_only(instructions.to_string()),
        })
    }

    async fn request_turn_completion(&self, text: &str) -> Result<String> {
        self.ensure_connected()?;
        let rx = self.shared.turn.begin()?;

        self.enqueue(ClientEvent::InputAudioCommit)?;
        self.enqueue(ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        })?;
        self.shared.turn.requested();
        self.enqueue(ClientEvent::ResponseCreate)?;

        tracing::debug!(session_id = %self.id, chars = text.len(), "turn requested");
        await_turn(&self.shared.turn, rx, self.turn_timeout).await
    }

    fn disconnect(&self) {
        let was_connected = self.shared.connected.swap(false, Ordering::SeqCst);
        self.shared.shut_down();

        // Dropping the sender lets the writer send a close frame and exit
        self.out_tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        self.reader.abort();

        if was_connected {
            tracing::info!(session_id = %self.id, "realtime session disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
