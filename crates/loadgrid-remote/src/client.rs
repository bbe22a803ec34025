//! Minimal HTTP/1 client: one TCP connection per request.
//!
//! Generation calls can run for minutes and each goes to a specific fleet
//! endpoint, so there is nothing to gain from connection pooling here.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tracing::debug;

use crate::RemoteError;

pub(crate) struct Response {
    pub(crate) status: http::StatusCode,
    pub(crate) body: Bytes,
}

impl Response {
    pub(crate) fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct HttpClient {
    timeout: Duration,
}

impl HttpClient {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub(crate) async fn get(&self, address: &str, path: &str) -> Result<Response, RemoteError> {
        self.request(http::Method::GET, address, path, Bytes::new())
            .await
    }

    pub(crate) async fn post_json(
        &self,
        address: &str,
        path: &str,
        body: &impl serde::Serialize,
    ) -> Result<Response, RemoteError> {
        let body = serde_json::to_vec(body)
            .map_err(|e| RemoteError::Schema(format!("request encoding failed: {e}")))?;
        self.request(http::Method::POST, address, path, Bytes::from(body))
            .await
    }

    pub(crate) async fn put_json(
        &self,
        address: &str,
        path: &str,
        body: &impl serde::Serialize,
    ) -> Result<Response, RemoteError> {
        let body = serde_json::to_vec(body)
            .map_err(|e| RemoteError::Schema(format!("request encoding failed: {e}")))?;
        self.request(http::Method::PUT, address, path, Bytes::from(body))
            .await
    }

    async fn request(
        &self,
        method: http::Method,
        address: &str,
        path: &str,
        body: Bytes,
    ) -> Result<Response, RemoteError> {
        let uri = format!("http://{address}{path}");
        tokio::time::timeout(self.timeout, async {
            let stream = tokio::net::TcpStream::connect(address).await.map_err(|e| {
                RemoteError::Connect {
                    address: address.to_string(),
                    source: e,
                }
            })?;

            let io = TokioIo::new(stream);
            let (mut sender, conn) =
                hyper::client::conn::http1::handshake::<_, Full<Bytes>>(io).await?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let req = http::Request::builder()
                .method(method)
                .uri(&uri)
                .header("host", address)
                .header("user-agent", "loadgrid/0.1")
                .header("content-type", "application/json")
                .body(Full::new(body))?;

            let resp = sender.send_request(req).await?;
            let status = resp.status();
            let body = resp.into_body().collect().await?.to_bytes();
            debug!(%uri, %status, bytes = body.len(), "remote request completed");
            Ok(Response { status, body })
        })
        .await
        .map_err(|_| RemoteError::Timeout { uri })?
    }
}
