//! loadgrid-api — REST API for batch replay control.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/batches` | Submit a batch for replay |
//! | GET | `/api/v1/batches/active` | Progress of the active batch |
//! | GET | `/api/v1/batches/{name}/result` | Download a batch's result CSV |
//! | GET | `/api/v1/batches/{name}/audit` | Download a batch's audit CSV |
//! | GET | `/api/v1/metrics/{key}` | Windowed read of one metric key |
//! | GET | `/api/v1/fleet` | Live fleet membership and scaling state |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};

use loadgrid_autoscale::Scaler;
use loadgrid_fleet::FleetView;
use loadgrid_metrics::MetricStore;
use loadgrid_replay::ReplayScheduler;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub scheduler: ReplayScheduler,
    pub scaler: Scaler,
    pub store: MetricStore,
    pub fleet: FleetView,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/batches", post(handlers::submit_batch))
        .route("/batches/active", get(handlers::active_batch))
        .route("/batches/{name}/result", get(handlers::download_result))
        .route("/batches/{name}/audit", get(handlers::download_audit))
        .route("/metrics/{key}", get(handlers::read_metric))
        .route("/fleet", get(handlers::fleet_status))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
