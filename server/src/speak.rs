//! `/speak` WebSocket: one synthesis session per connection, paced by a
//! frame-period ticker.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use serde::{Deserialize, Serialize};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use tts_core::{CompletionCause, FrameResult, SynthesisSession, Utterance};

use crate::error::ApiError;
use crate::validation::validate_speak_request;
use crate::AppState;

/// Commands accepted as text messages.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Command {
    Speak {
        text: String,
        voice: Option<String>,
    },
    Stop,
}

/// Events sent back as text messages. Audio goes out as binary frames.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Event {
    InProgress,
    SpeakComplete { cause: CompletionCause },
    SpeakFailed { message: String },
    Error { error: String, code: u16 },
}

impl From<&ApiError> for Event {
    fn from(e: &ApiError) -> Self {
        Event::Error {
            error: e.to_string(),
            code: e.status().as_u16(),
        }
    }
}

pub async fn speak_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_connection(socket, state))
}

/// The socket or its peer is gone.
struct Disconnected;

struct Connection {
    id: uuid::Uuid,
    state: AppState,
    session: SynthesisSession,
    sender: SplitSink<WebSocket, Message>,
    ticker: Interval,
    frame_bytes: usize,
}

async fn run_connection(socket: WebSocket, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let mut ticker = tokio::time::interval(state.engine.config().frame_duration());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut conn = Connection {
        id: uuid::Uuid::new_v4(),
        session: state.engine.session(),
        frame_bytes: state.engine.frame_bytes(),
        state,
        sender,
        ticker,
    };
    conn.state.metrics.connection_opened();
    info!("Speak connection {} opened", conn.id);

    loop {
        let active = conn.session.is_active();
        let step = tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => conn.handle_command(text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => Err(Disconnected),
                Some(Ok(_)) => Ok(()),
                Some(Err(e)) => {
                    warn!("Speak connection {} read error: {e}", conn.id);
                    Err(Disconnected)
                }
            },
            _ = conn.ticker.tick(), if active => conn.send_next_frame().await,
        };
        if step.is_err() {
            break;
        }
    }

    if conn.session.is_active() {
        tokio::task::block_in_place(|| conn.session.cancel());
        conn.state.metrics.record_completion(CompletionCause::Cancelled);
    }
    conn.state.metrics.connection_closed();
    info!("Speak connection {} closed", conn.id);
}

impl Connection {
    async fn send_event(&mut self, event: &Event) -> Result<(), Disconnected> {
        let text = serde_json::to_string(event).map_err(|e| {
            warn!("Failed to encode event: {e}");
            Disconnected
        })?;
        self.sender
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| Disconnected)
    }

    async fn send_audio(&mut self, frame: Vec<u8>) -> Result<(), Disconnected> {
        self.sender
            .send(Message::Binary(frame.into()))
            .await
            .map_err(|_| Disconnected)?;
        self.state.metrics.record_frame();
        Ok(())
    }

    async fn handle_command(&mut self, text: &str) -> Result<(), Disconnected> {
        let command = match serde_json::from_str::<Command>(text) {
            Ok(command) => command,
            Err(e) => {
                let err = ApiError::InvalidInput(format!("Malformed command: {e}"));
                return self.send_event(&Event::from(&err)).await;
            }
        };

        match command {
            Command::Speak { text, voice } => self.speak(text, voice).await,
            Command::Stop => self.stop().await,
        }
    }

    async fn speak(&mut self, text: String, voice: Option<String>) -> Result<(), Disconnected> {
        self.state.metrics.record_speak_request();
        if let Err(e) = validate_speak_request(&text, voice.as_deref()) {
            self.state.metrics.record_start_failure();
            return self
                .send_event(&Event::SpeakFailed {
                    message: e.to_string(),
                })
                .await;
        }

        // A new speak replaces the active one.
        self.stop().await?;

        let mut utterance = Utterance::new(text);
        if let Some(voice) = voice {
            utterance = utterance.with_voice(voice);
        }
        let session = &mut self.session;
        match tokio::task::block_in_place(|| session.start(utterance)) {
            Ok(kind) => {
                debug!("Speak connection {} started ({kind:?})", self.id);
                self.state.metrics.record_start(kind);
                self.ticker.reset();
                self.send_event(&Event::InProgress).await
            }
            Err(e) => {
                self.state.metrics.record_start_failure();
                let err = ApiError::from(e);
                warn!("Speak connection {} failed to start: {err}", self.id);
                self.send_event(&Event::SpeakFailed {
                    message: err.to_string(),
                })
                .await
            }
        }
    }

    async fn stop(&mut self) -> Result<(), Disconnected> {
        if !self.session.is_active() {
            return Ok(());
        }
        let session = &mut self.session;
        tokio::task::block_in_place(|| session.cancel());
        self.state.metrics.record_completion(CompletionCause::Cancelled);
        self.send_event(&Event::SpeakComplete {
            cause: CompletionCause::Cancelled,
        })
        .await
    }

    async fn send_next_frame(&mut self) -> Result<(), Disconnected> {
        match self.session.pull_frame(self.frame_bytes) {
            FrameResult::Audio(frame) => self.send_audio(frame).await,
            FrameResult::Silence { len, keep_alive } => {
                self.send_audio(vec![0; len]).await?;
                if keep_alive {
                    self.state.metrics.record_keepalive();
                    self.send_event(&Event::InProgress).await?;
                }
                Ok(())
            }
            FrameResult::Completion(cause) => {
                info!("Speak connection {} complete: {cause:?}", self.id);
                self.state.metrics.record_completion(cause);
                self.send_event(&Event::SpeakComplete { cause }).await
            }
            FrameResult::Idle => Ok(()),
        }
    }
}
