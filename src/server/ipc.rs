// Unix domain socket transport with a length-prefixed JSON protocol

use crate::api::{ErrorBody, IngestRequest, SearchRequest};
use crate::error::{ErrorKind, QuarryError, Result};
use crate::storage::Scope;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

/// Maximum frame payload (16 MiB)
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Requests accepted by the server, one per connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IpcRequest {
    /// Ingest documents and images
    Index(IngestRequest),
    /// Delete every document in a scope
    Clear {
        #[serde(default)]
        scope: Scope,
    },
    Search(SearchRequest),
    Get { id: String },
    Delete { id: String },
    /// Wait for pending index mutations
    Refresh,
    Status,
}

impl IpcRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Index(_) => "index",
            Self::Clear { .. } => "clear",
            Self::Search(_) => "search",
            Self::Get { .. } => "get",
            Self::Delete { .. } => "delete",
            Self::Refresh => "refresh",
            Self::Status => "status",
        }
    }
}

/// `{success: true, data}` or `{success: false, error, message, status}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl IpcResponse {
    pub fn success_with_data(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
            status: None,
        }
    }

    pub fn failure(error: &QuarryError) -> Self {
        let body = ErrorBody::from(error);
        Self {
            success: false,
            data: None,
            error: Some(body.error),
            message: Some(body.message),
            status: Some(body.status),
        }
    }

    /// Decode the payload of a successful response
    ///
    /// A failure response becomes a `Server` error carrying the remote kind.
    pub fn into_data<T: DeserializeOwned>(self) -> Result<T> {
        if !self.success {
            let kind = self.error.unwrap_or(ErrorKind::Internal);
            return Err(QuarryError::Server(format!(
                "{:?} ({}): {}",
                kind,
                self.status.unwrap_or_else(|| kind.status_code()),
                self.message.unwrap_or_default()
            )));
        }

        let data = self.data.unwrap_or(serde_json::Value::Null);
        serde_json::from_value(data).map_err(|e| QuarryError::Json {
            source: e,
            context: "Failed to decode response data".to_string(),
        })
    }
}

/// Unix domain socket server
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            listener: None,
        }
    }

    /// Bind to the socket path and start listening
    pub async fn bind(&mut self) -> Result<()> {
        // A stale socket from a previous run blocks bind
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| QuarryError::Io {
                source: e,
                context: format!("Failed to remove existing socket: {:?}", self.socket_path),
            })?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| QuarryError::Io {
                source: e,
                context: format!("Failed to create socket directory: {:?}", parent),
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| QuarryError::Io {
            source: e,
            context: format!("Failed to bind to socket: {:?}", self.socket_path),
        })?;
        self.listener = Some(listener);

        tracing::info!("Listening on {:?}", self.socket_path);
        Ok(())
    }

    pub async fn accept(&self) -> Result<UnixStream> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| QuarryError::Server("Server not bound".to_string()))?;

        let (stream, _addr) = listener.accept().await.map_err(|e| QuarryError::Io {
            source: e,
            context: "Failed to accept connection".to_string(),
        })?;
        Ok(stream)
    }

    /// Stop listening and remove the socket file
    pub fn shutdown(&mut self) -> Result<()> {
        self.listener.take();
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| QuarryError::Io {
                source: e,
                context: format!("Failed to remove socket: {:?}", self.socket_path),
            })?;
        }
        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

/// Read one length-prefixed JSON frame
pub async fn read_frame<T, R>(stream: &mut R) -> Result<T>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let length = stream.read_u32().await.map_err(|e| QuarryError::Io {
        source: e,
        context: "Failed to read frame length".to_string(),
    })?;

    if length > MAX_FRAME_SIZE {
        return Err(QuarryError::Server(format!(
            "Frame too large: {} bytes (max: {})",
            length, MAX_FRAME_SIZE
        )));
    }

    let mut buffer = vec![0u8; length as usize];
    stream
        .read_exact(&mut buffer)
        .await
        .map_err(|e| QuarryError::Io {
            source: e,
            context: "Failed to read frame payload".to_string(),
        })?;

    serde_json::from_slice(&buffer).map_err(|e| QuarryError::Json {
        source: e,
        context: "Failed to decode frame".to_string(),
    })
}

/// Write one length-prefixed JSON frame (4-byte big-endian length)
pub async fn write_frame<T, W>(stream: &mut W, value: &T) -> Result<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(value).map_err(|e| QuarryError::Json {
        source: e,
        context: "Failed to encode frame".to_string(),
    })?;

    if payload.len() > MAX_FRAME_SIZE as usize {
        return Err(QuarryError::Server(format!(
            "Frame too large: {} bytes (max: {})",
            payload.len(),
            MAX_FRAME_SIZE
        )));
    }

    stream
        .write_u32(payload.len() as u32)
        .await
        .map_err(|e| QuarryError::Io {
            source: e,
            context: "Failed to write frame length".to_string(),
        })?;
    stream
        .write_all(&payload)
        .await
        .map_err(|e| QuarryError::Io {
            source: e,
            context: "Failed to write frame payload".to_string(),
        })?;
    stream.flush().await.map_err(|e| QuarryError::Io {
        source: e,
        context: "Failed to flush frame".to_string(),
    })?;

    Ok(())
}

/// Client for a running server
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Send one request and wait for its response
    pub async fn send(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| QuarryError::Io {
                source: e,
                context: format!("Failed to connect to server at {:?}", self.socket_path),
            })?;

        write_frame(&mut stream, request).await?;
        read_frame(&mut stream).await
    }

    /// Send a request and decode a successful payload
    pub async fn call<T: DeserializeOwned>(&self, request: &IpcRequest) -> Result<T> {
        self.send(request).await?.into_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ClearRequest;

    #[test]
    fn test_request_wire_format() {
        let request: IpcRequest =
            serde_json::from_str(r#"{"type": "search", "query": "rust", "pageSize": 5}"#).unwrap();
        match request {
            IpcRequest::Search(search) => {
                assert_eq!(search.query, "rust");
                assert_eq!(search.page_size, Some(5));
            }
            other => panic!("Wrong request type: {:?}", other),
        }

        let clear: IpcRequest = serde_json::from_str(r#"{"type": "clear"}"#).unwrap();
        assert!(matches!(clear, IpcRequest::Clear { scope: Scope::All }));
        assert_eq!(ClearRequest::default().scope, Scope::All);

        let json = serde_json::to_value(IpcRequest::Get { id: "d1".into() }).unwrap();
        assert_eq!(json["type"], "get");
        assert_eq!(json["id"], "d1");
    }

    #[test]
    fn test_failure_response_shape() {
        let response = IpcResponse::failure(&QuarryError::InvalidQuery("empty".into()));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "InvalidQuery");
        assert_eq!(json["status"], 400);
        assert!(json.get("data").is_none());

        assert!(response.into_data::<serde_json::Value>().is_err());
    }

    #[tokio::test]
    async fn test_frame_roundtrip_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, &IpcRequest::Status).await.unwrap();
        let received: IpcRequest = read_frame(&mut server).await.unwrap();
        assert!(matches!(received, IpcRequest::Status));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32(MAX_FRAME_SIZE + 1).await.unwrap();
        let result: Result<IpcRequest> = read_frame(&mut server).await;
        assert!(matches!(result, Err(QuarryError::Server(_))));
    }
}
