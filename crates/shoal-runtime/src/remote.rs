//! RemoteRuntime — the container-runtime contract over HTTP.
//!
//! Speaks to a runtime daemon (or shim in front of one) exposing the
//! fleet under a small REST surface:
//!
//! | Contract call | HTTP mapping |
//! |---|---|
//! | `create(name)` | `POST /containers/{name}` |
//! | `get(name)` | `GET /containers/{name}` (404 ⇒ not found) |
//! | `status()` | `GET /containers/{name}/state` → `{"status": "..."}` |
//! | `start_and_wait_for_ports()` | `POST /containers/{name}/start` (blocks until ports ready) |
//! | `fetch(request)` | `{method} /containers/{name}/proxy{path}` |
//! | `container_fetch(url)` | `GET /containers/{name}/fetch`, URL in `x-shoal-url` |
//! | `destroy()` | `DELETE /containers/{name}` |

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::debug;

use crate::runtime::{
    ContainerHandle, ContainerRuntime, ContainerStatus, HttpRequest, HttpResponse, RuntimeError,
    RuntimeResult,
};

/// HTTP adapter implementing [`ContainerRuntime`].
pub struct RemoteRuntime {
    /// `host:port` of the runtime daemon.
    authority: String,
}

impl RemoteRuntime {
    /// Build an adapter from a base URL like `http://127.0.0.1:7070`.
    pub fn new(base_url: &str) -> RuntimeResult<Self> {
        let uri: http::Uri = base_url
            .parse()
            .map_err(|e: http::uri::InvalidUri| RuntimeError::Transport(e.to_string()))?;
        let authority = uri
            .authority()
            .ok_or_else(|| {
                RuntimeError::Transport(format!("runtime url has no authority: {base_url}"))
            })?
            .to_string();
        Ok(Self { authority })
    }

    fn handle(&self, name: &str) -> Arc<dyn ContainerHandle> {
        Arc::new(RemoteHandle {
            authority: self.authority.clone(),
            name: name.to_string(),
        })
    }
}

#[async_trait]
impl ContainerRuntime for RemoteRuntime {
    async fn get(&self, name: &str) -> RuntimeResult<Arc<dyn ContainerHandle>> {
        let uri = container_uri(&self.authority, name, "");
        let response = request(&self.authority, http::Method::GET, &uri, Bytes::new()).await?;
        match response.status().as_u16() {
            404 => Err(RuntimeError::NotFound(name.to_string())),
            s if (200..300).contains(&s) => Ok(self.handle(name)),
            s => Err(RuntimeError::Http(s)),
        }
    }

    async fn create(&self, name: &str) -> RuntimeResult<Arc<dyn ContainerHandle>> {
        let uri = container_uri(&self.authority, name, "");
        let response = request(&self.authority, http::Method::POST, &uri, Bytes::new()).await?;
        if !response.status().is_success() {
            return Err(RuntimeError::Http(response.status().as_u16()));
        }
        debug!(name, "container provisioned");
        Ok(self.handle(name))
    }
}

#[derive(Debug)]
struct RemoteHandle {
    authority: String,
    name: String,
}

#[async_trait]
impl ContainerHandle for RemoteHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn status(&self) -> RuntimeResult<ContainerStatus> {
        let uri = container_uri(&self.authority, &self.name, "/state");
        let response = request(&self.authority, http::Method::GET, &uri, Bytes::new()).await?;
        match response.status().as_u16() {
            404 => Err(RuntimeError::NotFound(self.name.clone())),
            s if (200..300).contains(&s) => parse_status(response.body()),
            s => Err(RuntimeError::Http(s)),
        }
    }

    async fn start_and_wait_for_ports(&self) -> RuntimeResult<()> {
        let uri = container_uri(&self.authority, &self.name, "/start");
        let response = request(&self.authority, http::Method::POST, &uri, Bytes::new()).await?;
        if !response.status().is_success() {
            return Err(RuntimeError::Http(response.status().as_u16()));
        }
        Ok(())
    }

    async fn fetch(&self, incoming: HttpRequest) -> RuntimeResult<HttpResponse> {
        let path = incoming
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let uri = container_uri(&self.authority, &self.name, &format!("/proxy{path}"));

        let mut builder = http::Request::builder()
            .method(incoming.method().clone())
            .uri(&uri)
            .header(http::header::HOST, &self.authority);
        for (key, value) in incoming.headers() {
            if key != http::header::HOST {
                builder = builder.header(key, value);
            }
        }
        let request = builder
            .body(Full::new(incoming.into_body()))
            .map_err(|e| RuntimeError::Transport(e.to_string()))?;
        send(&self.authority, request).await
    }

    async fn container_fetch(&self, url: &str) -> RuntimeResult<HttpResponse> {
        let uri = container_uri(&self.authority, &self.name, "/fetch");
        let request = http::Request::builder()
            .method(http::Method::GET)
            .uri(&uri)
            .header(http::header::HOST, &self.authority)
            .header("x-shoal-url", url)
            .body(Full::new(Bytes::new()))
            .map_err(|e| RuntimeError::Transport(e.to_string()))?;
        send(&self.authority, request).await
    }

    async fn destroy(&self) -> RuntimeResult<()> {
        let uri = container_uri(&self.authority, &self.name, "");
        let response =
            request(&self.authority, http::Method::DELETE, &uri, Bytes::new()).await?;
        match response.status().as_u16() {
            404 => Err(RuntimeError::NotFound(self.name.clone())),
            s if (200..300).contains(&s) => Ok(()),
            s => Err(RuntimeError::Http(s)),
        }
    }
}

fn container_uri(authority: &str, name: &str, suffix: &str) -> String {
    format!("http://{authority}/containers/{name}{suffix}")
}

fn parse_status(body: &Bytes) -> RuntimeResult<ContainerStatus> {
    #[derive(serde::Deserialize)]
    struct StateBody {
        status: ContainerStatus,
    }
    let state: StateBody =
        serde_json::from_slice(body).map_err(|e| RuntimeError::Body(e.to_string()))?;
    Ok(state.status)
}

async fn request(
    authority: &str,
    method: http::Method,
    uri: &str,
    body: Bytes,
) -> RuntimeResult<HttpResponse> {
    let request = http::Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::HOST, authority)
        .body(Full::new(body))
        .map_err(|e| RuntimeError::Transport(e.to_string()))?;
    send(authority, request).await
}

/// One request over a fresh connection, body fully collected.
async fn send(
    authority: &str,
    request: http::Request<Full<Bytes>>,
) -> RuntimeResult<HttpResponse> {
    let transport = |e: &dyn std::fmt::Display| RuntimeError::Transport(e.to_string());

    let stream = TcpStream::connect(authority)
        .await
        .map_err(|e| transport(&e))?;
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| transport(&e))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| transport(&e))?;
    let (parts, body) = response.into_parts();
    let bytes = body
        .collect()
        .await
        .map_err(|e| transport(&e))?
        .to_bytes();
    Ok(HttpResponse::from_parts(parts, bytes))
}
