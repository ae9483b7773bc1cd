//! Common utilities for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use fetch_core::{ChunkSink, FetchError, FetchHandle, FetchOutcome, FetchRequest, StreamingFetcher};
use futures_util::{SinkExt, StreamExt};
use server::{build_router, config::ServerConfig, AppState};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tts_core::{SessionConfig, SynthesisEngine};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 20 ms of 8 kHz PCM16.
pub const FRAME_BYTES: usize = 320;

/// Plays back fixed chunks, then reports `outcome` or waits for cancellation.
pub struct ScriptedFetcher {
    pub chunks: Vec<Vec<u8>>,
    pub outcome: FetchOutcome,
    pub hang: bool,
    pub starts: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new(chunks: Vec<Vec<u8>>, outcome: FetchOutcome) -> Self {
        Self {
            chunks,
            outcome,
            hang: false,
            starts: AtomicUsize::new(0),
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::new(Vec::new(), FetchOutcome::Aborted)
        }
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl StreamingFetcher for ScriptedFetcher {
    fn start(
        &self,
        _request: FetchRequest,
        mut sink: ChunkSink,
    ) -> Result<FetchHandle, FetchError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let chunks = self.chunks.clone();
        let outcome = self.outcome.clone();
        let hang = self.hang;

        FetchHandle::spawn("test-fetch", move |token| {
            for chunk in chunks {
                std::thread::sleep(Duration::from_millis(2));
                if token.is_cancelled() || sink(&chunk[..]).is_err() {
                    return FetchOutcome::Aborted;
                }
            }
            if hang {
                while !token.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(1));
                }
                return FetchOutcome::Aborted;
            }
            outcome
        })
    }
}

pub fn test_session_config(cache_dir: Option<&Path>) -> SessionConfig {
    SessionConfig {
        api_key: "test-key".to_string(),
        voice_id: "voice-1".to_string(),
        output_format: "pcm_8000".to_string(),
        cache_enabled: cache_dir.is_some(),
        cache_dir: cache_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| SessionConfig::default().cache_dir),
        ..SessionConfig::default()
    }
}

pub fn create_test_state(fetcher: Arc<dyn StreamingFetcher>, cache_dir: Option<&Path>) -> AppState {
    let engine = SynthesisEngine::open(test_session_config(cache_dir), fetcher)
        .expect("test config is valid");
    AppState::new(engine, ServerConfig::default())
}

/// Create a test app instance
pub fn create_test_app() -> Router {
    let fetcher = Arc::new(ScriptedFetcher::new(Vec::new(), FetchOutcome::Success));
    build_router(create_test_state(fetcher, None))
}

/// Serves the app on an ephemeral port.
pub async fn spawn_app(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub async fn connect_speak(addr: SocketAddr) -> WsStream {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/speak"))
        .await
        .unwrap();
    ws
}

pub async fn send_json(ws: &mut WsStream, value: serde_json::Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Reads until the next text event, returning the binary frames seen on the
/// way and the event itself.
pub async fn next_event(ws: &mut WsStream) -> (Vec<Vec<u8>>, serde_json::Value) {
    let mut frames = Vec::new();
    let read = async {
        while let Some(msg) = ws.next().await {
            match msg.unwrap() {
                Message::Binary(bytes) => frames.push(bytes.to_vec()),
                Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                _ => {}
            }
        }
        panic!("socket closed before an event arrived");
    };
    let event = tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("no event within 5s");
    (frames, event)
}
