//! HTTP status API
//!
//! Routes:
//! - `GET /healthz`
//! - `GET /api/v1/accesspoints`
//! - `GET|PUT|DELETE /api/v1/namespaces/{ns}/accesspoints/{name}`
//!
//! `PUT` takes an AccessPoint spec as its JSON body. Reads are served from
//! published snapshots and never wait on a running reconcile.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::controller::ControllerClient;
use crate::crd::{AccessPoint, AccessPointSpec};
use crate::store::{ApplyOutcome, RecordKey, RecordSnapshot};

/// Error returned by status API handlers
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// No record under the requested key
    #[error("access point not found: {0}")]
    NotFound(String),

    /// The request can never succeed as sent
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The record is in a state that refuses the request
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<crate::Error> for ServerError {
    fn from(e: crate::Error) -> Self {
        let message = e.to_string();
        match e {
            crate::Error::NotFound(key) => Self::NotFound(key),
            crate::Error::Validation { .. } => Self::Conflict(message),
            crate::Error::Serialization(_) => Self::BadRequest(message),
            _ => Self::Internal(message),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}

/// Build the status API router for a running controller
pub fn router(client: ControllerClient) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/accesspoints", get(list_access_points))
        .route(
            "/api/v1/namespaces/{ns}/accesspoints/{name}",
            get(get_access_point)
                .put(put_access_point)
                .delete(delete_access_point),
        )
        .with_state(client)
}

/// Serve `router` on `listener` until `cancel` fires
pub async fn serve(
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "status API listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

async fn healthz(State(client): State<ControllerClient>) -> Response {
    if client.is_running() {
        (StatusCode::OK, "ok").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "stopping").into_response()
    }
}

async fn list_access_points(State(client): State<ControllerClient>) -> Response {
    let snapshots = client.list();
    let items: Vec<&RecordSnapshot> = snapshots.iter().map(|s| s.as_ref()).collect();
    Json(serde_json::json!({ "items": items })).into_response()
}

async fn get_access_point(
    State(client): State<ControllerClient>,
    Path((ns, name)): Path<(String, String)>,
) -> Result<Response, ServerError> {
    let key = RecordKey::new(ns, name);
    let snapshot = client
        .status(&key)
        .ok_or_else(|| ServerError::NotFound(key.to_string()))?;
    Ok(Json(snapshot.as_ref()).into_response())
}

async fn put_access_point(
    State(client): State<ControllerClient>,
    Path((ns, name)): Path<(String, String)>,
    Json(spec): Json<AccessPointSpec>,
) -> Result<Response, ServerError> {
    let key = RecordKey::new(ns.clone(), name.clone());
    let mut resource = AccessPoint::new(&name, spec);
    resource.metadata.namespace = Some(ns);

    let outcome = client.apply(resource).await?;
    debug!(record = %key, ?outcome, "applied access point");

    let status = match outcome {
        ApplyOutcome::Created => StatusCode::CREATED,
        ApplyOutcome::Updated | ApplyOutcome::Unchanged => StatusCode::OK,
    };
    let snapshot = client
        .status(&key)
        .ok_or_else(|| ServerError::Internal(format!("{key} vanished after apply")))?;
    Ok((status, Json(snapshot.as_ref())).into_response())
}

async fn delete_access_point(
    State(client): State<ControllerClient>,
    Path((ns, name)): Path<(String, String)>,
) -> Result<Response, ServerError> {
    let key = RecordKey::new(ns, name);
    client.request_delete(&key).await?;
    debug!(record = %key, "deletion requested");

    // A fast reconcile may already have removed the record
    match client.status(&key) {
        Some(snapshot) => Ok((StatusCode::ACCEPTED, Json(snapshot.as_ref())).into_response()),
        None => Ok(StatusCode::ACCEPTED.into_response()),
    }
}
