//! loadgrid-remote — HTTP clients for the three external collaborators:
//! the image-generation endpoints, the fleet dashboard, and the external
//! forecaster.

mod client;
pub mod fleet;
pub mod generate;

pub use fleet::FleetApi;
pub use generate::HttpGenerateBackend;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("connection to {address} failed")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("http transport error")]
    Transport(#[from] hyper::Error),

    #[error("invalid request")]
    Request(#[from] http::Error),

    #[error("request to {uri} timed out")]
    Timeout { uri: String },

    #[error("unexpected status {status} from {uri}")]
    Status {
        status: http::StatusCode,
        uri: String,
    },

    #[error("malformed remote payload: {0}")]
    Schema(String),

    /// The remote deployment manages its own replica count; an external
    /// resize would be rejected or fought over.
    #[error("remote autoscaler owns the replica count, resize refused")]
    ExternalAutoscaler,
}
