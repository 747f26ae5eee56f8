//! Realtime gateway implementation over tokio-tungstenite.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};

use super::messages::{
    AudioDirective, AudioInputDirective, AudioOutputDirective, CloseClass, ConversationItem,
    InboundEvent, OutboundCommand, SessionDirective, TurnDetection, WireAudioFormat,
};
use super::{ConnectionState, GatewayError, SessionGateway, credentials};

/// Capacity of the outbound command channel and the inbound event channel.
const CHANNEL_CAPACITY: usize = 256;

/// Gateway configuration, derived from [`crate::config::AppConfig`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Token collaborator endpoint
    pub token_url: String,
    /// Model identity for the session directive
    pub model: String,
    /// Output voice
    pub voice: Option<String>,
    /// Target-language instructions
    pub instructions: Option<String>,
    /// Remote turn detection policy
    pub turn_detection: TurnDetection,
    /// Overall deadline for the connect sequence
    pub connect_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            token_url: String::new(),
            model: "gpt-realtime".to_string(),
            voice: Some("marin".to_string()),
            instructions: None,
            turn_detection: TurnDetection::default(),
            connect_timeout: Duration::from_secs(15),
        }
    }
}

/// WebSocket gateway to the realtime translation endpoint.
///
/// The socket and the ephemeral credential are owned here and nowhere
/// else. A spawned task owns the split socket and pumps both directions;
/// the struct itself only holds the outbound command sender, so every
/// command degrades to a logged no-op once the task is gone.
pub struct RealtimeGateway {
    config: GatewayConfig,
    http: reqwest::Client,
    state: ConnectionState,
    command_tx: Option<mpsc::Sender<OutboundCommand>>,
    socket_task: Option<JoinHandle<()>>,
}

impl RealtimeGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            state: ConnectionState::Disconnected,
            command_tx: None,
            socket_task: None,
        }
    }

    /// Build the initial session-configuration directive.
    fn build_session_directive(&self) -> SessionDirective {
        SessionDirective {
            kind: "realtime".to_string(),
            model: self.config.model.clone(),
            audio: AudioDirective {
                input: AudioInputDirective {
                    format: WireAudioFormat::pcm24k(),
                    turn_detection: Some(self.config.turn_detection.clone()),
                },
                output: AudioOutputDirective {
                    format: WireAudioFormat::pcm24k(),
                    voice: self.config.voice.clone(),
                },
            },
            instructions: self.config.instructions.clone(),
        }
    }

    /// Build the WebSocket handshake request for a credential.
    fn build_handshake(
        credential: &credentials::EphemeralCredential,
    ) -> Result<http::Request<()>, GatewayError> {
        let url: url::Url = credential
            .websocket_url
            .parse()
            .map_err(|e| GatewayError::Socket(format!("bad websocket url: {}", e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| GatewayError::Socket("websocket url has no host".to_string()))?
            .to_string();

        let mut builder = http::Request::builder()
            .uri(credential.websocket_url.as_str())
            .header(
                "Authorization",
                format!("Bearer {}", credential.client_secret),
            )
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", host);
        if !credential.protocols.is_empty() {
            builder = builder.header("Sec-WebSocket-Protocol", credential.protocols.join(", "));
        }
        builder
            .body(())
            .map_err(|e| GatewayError::Socket(e.to_string()))
    }

    /// Send a command if the connection is open; logged no-op otherwise.
    async fn send_command(&mut self, command: OutboundCommand) {
        let Some(tx) = self.command_tx.as_ref() else {
            tracing::warn!("command dropped: connection not open");
            return;
        };
        if tx.send(command).await.is_err() {
            tracing::warn!("command dropped: socket task ended");
            self.command_tx = None;
            self.state = ConnectionState::Closed;
        }
    }
}

#[async_trait]
impl SessionGateway for RealtimeGateway {
    async fn connect(&mut self) -> Result<mpsc::Receiver<InboundEvent>, GatewayError> {
        if self.command_tx.is_some() {
            tracing::warn!("connect while already open; closing previous session");
            self.disconnect().await;
        }
        self.state = ConnectionState::Connecting;

        let connect = async {
            let credential = credentials::fetch_credential(&self.http, &self.config.token_url).await?;
            if credential.is_expired() {
                return Err(GatewayError::CredentialDenied(
                    "credential already expired".to_string(),
                ));
            }

            let request = Self::build_handshake(&credential)?;
            let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
                .await
                .map_err(|e| GatewayError::Socket(e.to_string()))?;
            Ok(ws_stream)
        };

        let ws_stream = match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
            Err(_) => {
                self.state = ConnectionState::Disconnected;
                return Err(GatewayError::Timeout(
                    "connect sequence exceeded deadline".to_string(),
                ));
            }
        };

        tracing::info!("connected to realtime endpoint");
        let (mut ws_sink, mut ws_source) = ws_stream.split();

        let (command_tx, mut command_rx) = mpsc::channel::<OutboundCommand>(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<InboundEvent>(CHANNEL_CAPACITY);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    command = command_rx.recv() => {
                        let Some(command) = command else {
                            // Gateway dropped the sender: clean shutdown.
                            let _ = ws_sink.send(Message::Close(None)).await;
                            break;
                        };
                        let json = match serde_json::to_string(&command) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!("failed to serialize command: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            tracing::error!("failed to send command: {}", e);
                            let _ = event_tx
                                .send(InboundEvent::Closed {
                                    code: None,
                                    class: CloseClass::Abnormal,
                                    reason: e.to_string(),
                                })
                                .await;
                            break;
                        }
                    }

                    frame = ws_source.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                if let Some(event) = super::messages::parse_inbound(&text) {
                                    if event_tx.send(event).await.is_err() {
                                        // Consumer gone; stop pumping.
                                        break;
                                    }
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                let (code, reason) = match frame {
                                    Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
                                    None => (None, String::new()),
                                };
                                let class = CloseClass::classify(code);
                                tracing::info!(?code, ?class, "socket closed by remote");
                                let _ = event_tx
                                    .send(InboundEvent::Closed { code, class, reason })
                                    .await;
                                break;
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::warn!("failed to send pong: {}", e);
                                }
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::error!("socket error: {}", e);
                                let _ = event_tx
                                    .send(InboundEvent::Closed {
                                        code: None,
                                        class: CloseClass::Abnormal,
                                        reason: e.to_string(),
                                    })
                                    .await;
                                break;
                            }
                            None => {
                                let _ = event_tx
                                    .send(InboundEvent::Closed {
                                        code: None,
                                        class: CloseClass::Abnormal,
                                        reason: "stream ended".to_string(),
                                    })
                                    .await;
                                break;
                            }
                        }
                    }
                }
            }
            tracing::debug!("socket task ended");
        });

        self.command_tx = Some(command_tx);
        self.socket_task = Some(handle);
        self.state = ConnectionState::Open;

        // One initial configuration directive per connection.
        let directive = self.build_session_directive();
        self.send_command(OutboundCommand::SessionUpdate { session: directive })
            .await;

        Ok(event_rx)
    }

    async fn send_audio_chunk(&mut self, chunk: Bytes) {
        if self.command_tx.is_none() {
            tracing::warn!("audio chunk dropped: connection not open");
            return;
        }
        self.send_command(OutboundCommand::audio_append(&chunk)).await;
    }

    async fn commit(&mut self) {
        if self.command_tx.is_none() {
            tracing::warn!("commit skipped: connection not open");
            return;
        }
        self.send_command(OutboundCommand::InputAudioBufferCommit)
            .await;
    }

    async fn clear(&mut self) {
        if self.command_tx.is_none() {
            tracing::warn!("clear skipped: connection not open");
            return;
        }
        self.send_command(OutboundCommand::InputAudioBufferClear)
            .await;
    }

    async fn request_text_translation(&mut self, text: &str) {
        if self.command_tx.is_none() {
            tracing::warn!("text translation request skipped: connection not open");
            return;
        }
        self.send_command(OutboundCommand::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        })
        .await;
        self.send_command(OutboundCommand::ResponseCreate).await;
    }

    async fn disconnect(&mut self) {
        if self.command_tx.is_none() && self.socket_task.is_none() {
            return;
        }
        self.state = ConnectionState::Closing;
        // Dropping the sender lets the socket task send a close frame and
        // drain; abort covers a task stuck on a dead peer.
        self.command_tx = None;
        if let Some(mut handle) = self.socket_task.take() {
            if tokio::time::timeout(Duration::from_secs(2), &mut handle)
                .await
                .is_err()
            {
                tracing::warn!("socket task did not end in time, aborting");
                handle.abort();
            }
        }
        self.state = ConnectionState::Closed;
        tracing::info!("disconnected from realtime endpoint");
    }

    fn connection_state(&self) -> ConnectionState {
        // The socket task ends when the remote closes or the stream
        // errors; a finished task means the connection is gone even if no
        // send has observed it yet.
        if self.state == ConnectionState::Open
            && self
                .socket_task
                .as_ref()
                .is_none_or(|task| task.is_finished())
        {
            return ConnectionState::Closed;
        }
        self.state
    }
}

impl Drop for RealtimeGateway {
    fn drop(&mut self) {
        if let Some(handle) = self.socket_task.take() {
            handle.abort();
        }
    }
}
