//! Ride pooling HTTP surface: rides, matching, booking, cancellation and fare quotes.
//!
//! Every failure, including a body that does not deserialize, is answered as JSON
//! `{"error": <code>, "message": <text>}` with the status picked from the error kind.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use crate::error::{AllocationError, ErrorKind};
use crate::middleware::with_http_layers;
use crate::types::{Location, NewRideRequest, RequestId};
use crate::Allocator;

/// Shared app state: one allocator per process.
#[derive(Clone)]
pub struct AppState {
    pub(crate) allocator: Arc<Allocator>,
}

/// Routes plus the shared HTTP layers, ready for `axum::serve`.
pub fn create_router(allocator: Arc<Allocator>) -> Router<()> {
    let state = AppState { allocator };
    let routes = Router::new()
        .route("/health", get(health))
        .route("/api/v1/rides", post(create_ride))
        .route("/api/v1/rides/:id", get(get_ride))
        .route("/api/v1/match/:request_id", post(match_ride))
        .route("/api/v1/book/:request_id", post(book_ride))
        .route("/api/v1/cancel/:request_id", post(cancel_ride))
        .route("/api/v1/fare/estimate", post(estimate_fare))
        .layer(Extension(state));
    with_http_layers(routes)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn create_ride(
    Extension(state): Extension<AppState>,
    body: Result<Json<NewRideRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    match state.allocator.create_ride(body).await {
        Ok(ride) => (StatusCode::CREATED, Json(ride)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn get_ride(Extension(state): Extension<AppState>, Path(raw): Path<String>) -> Response {
    let id = match parse_id(&raw) {
        Ok(id) => id,
        Err(r) => return r,
    };
    match state.allocator.get_ride(id).await {
        Ok(ride) => (StatusCode::OK, Json(ride)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn match_ride(Extension(state): Extension<AppState>, Path(raw): Path<String>) -> Response {
    let id = match parse_id(&raw) {
        Ok(id) => id,
        Err(r) => return r,
    };
    match state.allocator.match_ride(id).await {
        Ok(Some(m)) => (StatusCode::OK, Json(m)).into_response(),
        Ok(None) => error_body(
            StatusCode::NOT_FOUND,
            "no_match",
            format!("no compatible trip for ride request {}", id),
        ),
        Err(e) => error_response(&e),
    }
}

async fn book_ride(Extension(state): Extension<AppState>, Path(raw): Path<String>) -> Response {
    let id = match parse_id(&raw) {
        Ok(id) => id,
        Err(r) => return r,
    };
    match state.allocator.book_ride(id).await {
        Ok(booking) => (StatusCode::OK, Json(booking)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn cancel_ride(Extension(state): Extension<AppState>, Path(raw): Path<String>) -> Response {
    let id = match parse_id(&raw) {
        Ok(id) => id,
        Err(r) => return r,
    };
    match state.allocator.cancel_ride(id).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(serde::Deserialize)]
struct FareRequest {
    origin_lat: f64,
    origin_lon: f64,
    dest_lat: f64,
    dest_lon: f64,
}

async fn estimate_fare(
    Extension(state): Extension<AppState>,
    body: Result<Json<FareRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    let origin = Location::new(body.origin_lat, body.origin_lon);
    let destination = Location::new(body.dest_lat, body.dest_lon);
    match state.allocator.estimate_fare(origin, destination).await {
        Ok(fare) => (StatusCode::OK, Json(fare)).into_response(),
        Err(e) => error_response(&e),
    }
}

fn parse_id(raw: &str) -> Result<RequestId, Response> {
    raw.parse::<u64>().map(RequestId).map_err(|_| {
        error_body(
            StatusCode::BAD_REQUEST,
            "invalid_id",
            format!("'{}' is not a valid ride request id", raw),
        )
    })
}

/// Missing fields, wrong types, broken JSON and a wrong content type are all 400.
fn bad_body(rejection: JsonRejection) -> Response {
    error_body(
        StatusCode::BAD_REQUEST,
        "invalid_request",
        rejection.body_text(),
    )
}

fn status_for(err: &AllocationError) -> StatusCode {
    if matches!(err, AllocationError::NoCabNearby) {
        return StatusCode::NOT_FOUND;
    }
    match err.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::CapacityExceeded | ErrorKind::Unavailable => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Timeout => StatusCode::REQUEST_TIMEOUT,
        ErrorKind::Invalid => StatusCode::BAD_REQUEST,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &AllocationError) -> Response {
    error_body(status_for(err), err.code(), err.to_string())
}

fn error_body(status: StatusCode, code: &str, message: String) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": code, "message": message })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::types::CabId;

    #[test]
    fn status_mapping() {
        assert_eq!(status_for(&AllocationError::NoCabNearby), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&AllocationError::LockTimeout), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(
            status_for(&AllocationError::AlreadyCancelled(RequestId(1))),
            StatusCode::CONFLICT
        );
        let full = AllocationError::CabFull {
            cab_id: CabId(1),
            seats_remaining: 0,
            seats_needed: 1,
            luggage_remaining: 0,
            luggage_needed: 0,
        };
        assert_eq!(status_for(&full), StatusCode::UNPROCESSABLE_ENTITY);
        let storage: AllocationError = StoreError::Backend("x".into()).into();
        assert_eq!(status_for(&storage), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn malformed_id_is_bad_request() {
        assert_eq!(parse_id("17").unwrap(), RequestId(17));
        let response = parse_id("abc").unwrap_err();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
