//! The remote generation call, as a dyn-safe async seam.

use std::time::Duration;

use loadgrid_core::{Endpoint, GenerateParams};

pub type BoxFuture<T> = std::pin::Pin<Box<dyn Future<Output = T> + Send>>;

/// The synchronous remote generation RPC a worker invokes per job.
///
/// Implementations return the duration the remote side reported for the
/// generation; any transport, HTTP, or schema failure is an error and is
/// subject to the pipeline's retry policy.
pub trait GenerateBackend: Send + Sync {
    fn generate(
        &self,
        endpoint: Endpoint,
        params: GenerateParams,
        job_id: String,
    ) -> BoxFuture<anyhow::Result<Duration>>;
}
