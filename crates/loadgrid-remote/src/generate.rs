//! Client for the remote image-generation endpoint.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use loadgrid_core::{Endpoint, GenerateParams};
use loadgrid_pipeline::{BoxFuture, GenerateBackend};

use crate::RemoteError;
use crate::client::HttpClient;

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    /// Remote-side generation time, in seconds.
    duration: f64,
}

/// `GenerateBackend` speaking the generation endpoint's HTTP API: a
/// single long-polling GET that returns when the image is done.
pub struct HttpGenerateBackend {
    client: HttpClient,
}

impl HttpGenerateBackend {
    /// `timeout` bounds the whole call; generation regularly runs for
    /// minutes, so this should come from `remote.api_timeout_secs`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: HttpClient::new(timeout),
        }
    }

    async fn call(
        client: HttpClient,
        endpoint: Endpoint,
        params: GenerateParams,
        job_id: String,
    ) -> Result<Duration, RemoteError> {
        let path = generate_path(&params, &job_id);
        let resp = client.get(&endpoint.to_string(), &path).await?;
        if !resp.status.is_success() {
            warn!(job = %job_id, status = %resp.status, body = %resp.body_text(), "generation failed");
            return Err(RemoteError::Status {
                status: resp.status,
                uri: format!("http://{endpoint}{path}"),
            });
        }

        let parsed: GenerateResponse = serde_json::from_slice(&resp.body)
            .map_err(|e| RemoteError::Schema(format!("generate response: {e}")))?;
        debug!(job = %job_id, duration_secs = parsed.duration, "image generated");
        Ok(Duration::from_secs_f64(parsed.duration.max(0.0)))
    }
}

impl GenerateBackend for HttpGenerateBackend {
    fn generate(
        &self,
        endpoint: Endpoint,
        params: GenerateParams,
        job_id: String,
    ) -> BoxFuture<anyhow::Result<Duration>> {
        let client = self.client;
        Box::pin(async move {
            Self::call(client, endpoint, params, job_id)
                .await
                .map_err(anyhow::Error::from)
        })
    }
}

fn generate_path(params: &GenerateParams, job_id: &str) -> String {
    format!(
        "/generate?prompt={}&steps={}&cfg_scale={:.1}&sampler_index={}&width={}&height={}&id={}",
        query_escape(&params.prompt),
        params.steps,
        params.cfg_scale,
        query_escape(&params.sampler_index),
        params.width,
        params.height,
        query_escape(job_id),
    )
}

/// Percent-encode a query value (RFC 3986 unreserved characters pass
/// through).
fn query_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => {
                out.push('%');
                out.push_str(&format!("{byte:02X}"));
            }
        }
    }
    out
}
