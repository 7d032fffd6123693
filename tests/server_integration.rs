//! Server round trips over a real Unix socket

mod common;

use common::{hybrid_engine, lexical_engine};
use quarry::api::{
    ClearResponse, IngestRequest, IngestResponse, SearchRequest, SearchResponse, StatusResponse,
};
use quarry::document::{Document, NewDocument};
use quarry::error::ErrorKind;
use quarry::server::{write_frame, IpcClient, IpcRequest, IpcResponse, Server};
use quarry::storage::Scope;
use quarry::SearchEngine;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct RunningServer {
    socket: PathBuf,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<quarry::Result<()>>,
}

impl RunningServer {
    async fn start(engine: SearchEngine) -> Self {
        let config = engine.config().server.clone();
        let socket = config.socket_path.clone();
        let (stop, stopped) = oneshot::channel::<()>();

        let server = Server::new(Arc::new(engine), config);
        let handle = tokio::spawn(server.run_until(async move {
            let _ = stopped.await;
        }));

        wait_for_socket(&socket).await;
        Self {
            socket,
            stop,
            handle,
        }
    }

    fn client(&self) -> IpcClient {
        IpcClient::new(self.socket.clone())
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        self.handle.await.unwrap().unwrap();
        assert!(!self.socket.exists(), "socket should be removed on shutdown");
    }
}

async fn wait_for_socket(path: &Path) {
    for _ in 0..100 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server did not bind {:?}", path);
}

fn search(query: &str) -> IpcRequest {
    IpcRequest::Search(SearchRequest {
        query: query.to_string(),
        filters: None,
        page: None,
        page_size: None,
    })
}

#[tokio::test]
async fn test_full_request_cycle() {
    let dir = TempDir::new().unwrap();
    let server = RunningServer::start(hybrid_engine(&dir).await).await;
    let client = server.client();

    let ingested: IngestResponse = client
        .call(&IpcRequest::Index(IngestRequest {
            documents: vec![
                NewDocument::new("d1", "Machine Learning Basics", "neural networks explained")
                    .with_quality(85.0),
                NewDocument::new("bad", "", "no title"),
            ],
            images: vec![NewDocument::new("i1", "Sunset", "a sunset over the sea")],
        }))
        .await
        .unwrap();
    assert_eq!(ingested.indexed.documents, 1);
    assert_eq!(ingested.indexed.images, 1);
    assert_eq!(ingested.failed.len(), 1);
    assert_eq!(ingested.failed[0].error, ErrorKind::ValidationError);
    println!("✓ Ingest over IPC");

    let _: serde_json::Value = client.call(&IpcRequest::Refresh).await.unwrap();

    let results: SearchResponse = client.call(&search("machine learning")).await.unwrap();
    assert_eq!(results.results[0].id(), "d1");
    assert_eq!(results.page, 0);
    println!("✓ Search over IPC ({} results)", results.total);

    let document: Document = client
        .call(&IpcRequest::Get { id: "d1".to_string() })
        .await
        .unwrap();
    assert_eq!(document.title, "Machine Learning Basics");
    assert_eq!(document.version, 1);

    let status: StatusResponse = client.call(&IpcRequest::Status).await.unwrap();
    assert_eq!(status.documents, 2);
    assert_eq!(status.images, 1);

    let _: serde_json::Value = client
        .call(&IpcRequest::Delete { id: "d1".to_string() })
        .await
        .unwrap();
    let missing = client
        .send(&IpcRequest::Get { id: "d1".to_string() })
        .await
        .unwrap();
    assert!(!missing.success);
    assert_eq!(missing.error, Some(ErrorKind::NotFound));
    assert_eq!(missing.status, Some(404));

    let cleared: ClearResponse = client
        .call(&IpcRequest::Clear { scope: Scope::Images })
        .await
        .unwrap();
    assert_eq!(cleared.removed, 1);

    server.stop().await;
    println!("✓ Server shut down cleanly");
}

#[tokio::test]
async fn test_errors_carry_kind_and_status() {
    let dir = TempDir::new().unwrap();
    let server = RunningServer::start(lexical_engine(&dir).await).await;
    let client = server.client();

    let empty = client.send(&search("   ")).await.unwrap();
    assert!(!empty.success);
    assert_eq!(empty.error, Some(ErrorKind::InvalidQuery));
    assert_eq!(empty.status, Some(400));
    assert!(empty.message.is_some());

    let bad_page = client
        .send(&IpcRequest::Search(SearchRequest {
            query: "anything".to_string(),
            filters: None,
            page: Some(-2),
            page_size: None,
        }))
        .await
        .unwrap();
    assert_eq!(bad_page.error, Some(ErrorKind::InvalidArguments));

    // call() turns a failure response into an error
    let err = client
        .call::<Document>(&IpcRequest::Get { id: "nope".to_string() })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("nope"));

    server.stop().await;
}

#[tokio::test]
async fn test_malformed_request_gets_validation_error() {
    let dir = TempDir::new().unwrap();
    let server = RunningServer::start(lexical_engine(&dir).await).await;

    let mut stream = UnixStream::connect(&server.socket).await.unwrap();
    let payload = br#"{"type":"teleport"}"#;
    stream
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(payload).await.unwrap();
    stream.flush().await.unwrap();

    let response: IpcResponse = quarry::server::read_frame(&mut stream).await.unwrap();
    assert!(!response.success);
    assert_eq!(response.error, Some(ErrorKind::ValidationError));
    assert_eq!(response.status, Some(400));

    server.stop().await;
}

#[tokio::test]
async fn test_connections_over_limit_are_rejected() {
    let dir = TempDir::new().unwrap();
    let mut config = common::test_config(&dir);
    config.server.max_connections = 1;
    let engine = SearchEngine::with_providers(config, None, None).await.unwrap();
    let server = RunningServer::start(engine).await;

    // Hold the only permit with a connection that never sends a request
    let idle = UnixStream::connect(&server.socket).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let response = server.client().send(&IpcRequest::Status).await.unwrap();
    assert!(!response.success);
    assert_eq!(response.error, Some(ErrorKind::Unavailable));
    assert_eq!(response.status, Some(503));

    // Closing the idle connection frees the permit
    drop(idle);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let status: StatusResponse = server.client().call(&IpcRequest::Status).await.unwrap();
    assert_eq!(status.documents, 0);

    server.stop().await;
}

#[tokio::test]
async fn test_frames_roundtrip_against_server() {
    let dir = TempDir::new().unwrap();
    let server = RunningServer::start(lexical_engine(&dir).await).await;

    let mut stream = UnixStream::connect(&server.socket).await.unwrap();
    write_frame(&mut stream, &IpcRequest::Status).await.unwrap();
    let response: IpcResponse = quarry::server::read_frame(&mut stream).await.unwrap();
    assert!(response.success);
    assert!(response.data.is_some());

    server.stop().await;
}
