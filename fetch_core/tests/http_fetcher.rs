//! HttpFetcher against a local axum server

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use bytes::Bytes;
use fetch_core::{
    ChunkSink, FetchHandle, FetchOutcome, FetchRequest, HttpFetcher, SinkError, StreamingFetcher,
    Timeouts,
};
use tokio::net::TcpListener;
use tokio_stream::StreamExt;

async fn spawn_server(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn chunk_stream(chunks: Vec<&'static [u8]>) -> Body {
    let items: Vec<Result<Bytes, std::io::Error>> =
        chunks.into_iter().map(|c| Ok(Bytes::from_static(c))).collect();
    Body::from_stream(tokio_stream::iter(items))
}

async fn speak(
    Path(voice): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if headers.get("xi-api-key").and_then(|v| v.to_str().ok()) != Some("test-key") {
        return (StatusCode::UNAUTHORIZED, "missing api key").into_response();
    }
    if voice != "voice-1" || query.get("output_format").map(String::as_str) != Some("ulaw_8000") {
        return (StatusCode::NOT_FOUND, "unknown voice").into_response();
    }
    if !body.contains("\"text\"") {
        return (StatusCode::BAD_REQUEST, "no text").into_response();
    }
    chunk_stream(vec![b"aaaa", b"bbbb", b"cc"]).into_response()
}

async fn hang() -> Response {
    let first: Vec<Result<Bytes, std::io::Error>> = vec![Ok(Bytes::from_static(b"first"))];
    let stream = tokio_stream::iter(first).chain(tokio_stream::pending());
    Body::from_stream(stream).into_response()
}

fn app() -> Router {
    Router::new()
        .route("/v1/{voice}/stream", post(speak))
        .route("/hang", post(hang))
}

fn collecting_sink() -> (ChunkSink, Arc<Mutex<Vec<u8>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let target = received.clone();
    let sink: ChunkSink = Box::new(move |chunk: &[u8]| {
        target.lock().unwrap().extend_from_slice(chunk);
        Ok(())
    });
    (sink, received)
}

async fn wait_for_outcome(handle: &mut FetchHandle) -> FetchOutcome {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(outcome) = handle.try_outcome() {
            return outcome;
        }
        assert!(Instant::now() < deadline, "fetch never finished");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn provider_request(base: &str) -> FetchRequest {
    FetchRequest::post(
        format!("{base}/v1/voice-1/stream?output_format=ulaw_8000&optimize_streaming_latency=0"),
        r#"{"text":"hello","model_id":"m"}"#,
    )
    .header("Content-Type", "application/json")
    .header("Accept", "*/*")
    .header("xi-api-key", "test-key")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_streams_every_chunk_to_sink() {
    let base = spawn_server(app()).await;
    let (sink, received) = collecting_sink();

    let mut handle = HttpFetcher::new().start(provider_request(&base), sink).unwrap();
    assert_eq!(wait_for_outcome(&mut handle).await, FetchOutcome::Success);
    assert_eq!(received.lock().unwrap().as_slice(), b"aaaabbbbcc");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_non_success_status_is_http_error() {
    let base = spawn_server(app()).await;
    let (sink, received) = collecting_sink();
    let url = format!("{base}/v1/voice-1/stream?output_format=ulaw_8000");
    let request = FetchRequest::post(url, "{}").header("Content-Type", "application/json");

    let mut handle = HttpFetcher::new().start(request, sink).unwrap();
    assert_eq!(wait_for_outcome(&mut handle).await, FetchOutcome::HttpError(401));
    assert!(received.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_stops_hanging_transfer() {
    let base = spawn_server(app()).await;
    let (sink, received) = collecting_sink();
    let request = FetchRequest::post(format!("{base}/hang"), "{}").timeouts(Timeouts {
        connect: Duration::from_secs(2),
        read: Duration::from_secs(30),
    });

    let mut handle = HttpFetcher::new().start(request, sink).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while received.lock().unwrap().is_empty() {
        assert!(Instant::now() < deadline, "first chunk never arrived");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(handle.try_outcome().is_none());

    let started = Instant::now();
    let outcome = tokio::task::block_in_place(|| handle.cancel());
    assert_eq!(outcome, Some(FetchOutcome::Aborted));
    assert!(started.elapsed() < Duration::from_secs(5));

    let len_after_cancel = received.lock().unwrap().len();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(received.lock().unwrap().len(), len_after_cancel);
    assert_eq!(received.lock().unwrap().as_slice(), b"first");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stalled_body_times_out() {
    let base = spawn_server(app()).await;
    let (sink, _received) = collecting_sink();
    let request = FetchRequest::post(format!("{base}/hang"), "{}").timeouts(Timeouts {
        connect: Duration::from_secs(2),
        read: Duration::from_millis(200),
    });

    let mut handle = HttpFetcher::new().start(request, sink).unwrap();
    assert_eq!(wait_for_outcome(&mut handle).await, FetchOutcome::TimedOut);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sink_failure_aborts_transfer() {
    let base = spawn_server(app()).await;
    let calls = Arc::new(Mutex::new(0usize));
    let counter = calls.clone();
    let sink: ChunkSink = Box::new(move |_chunk: &[u8]| {
        *counter.lock().unwrap() += 1;
        Err(SinkError("buffer full".to_string()))
    });

    let mut handle = HttpFetcher::new().start(provider_request(&base), sink).unwrap();
    assert_eq!(wait_for_outcome(&mut handle).await, FetchOutcome::Aborted);
    assert_eq!(*calls.lock().unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_refused_connection_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (sink, _received) = collecting_sink();
    let request = FetchRequest::post(format!("http://{addr}/v1/x/stream"), "{}");
    let mut handle = HttpFetcher::new().start(request, sink).unwrap();
    assert!(matches!(
        wait_for_outcome(&mut handle).await,
        FetchOutcome::TransportError(_)
    ));
}
