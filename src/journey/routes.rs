//! REST endpoints: provisioning webhook, journey reads, compilation.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::comms::dispatcher::dispatch_communications;
use crate::comms::model::TriggerEvent;
use crate::error::{DatabaseError, EngineError, Error};
use crate::journey::compiler::compile_all_journeys_for_user;
use crate::journey::flip::{process_identity_flip, rollback_identity_flip};
use crate::notify::Notifier;
use crate::store::{queries, Store};

/// Shared state for journey routes.
#[derive(Clone)]
pub struct JourneyRouteState {
    pub store: Arc<Store>,
    pub notifier: Arc<dyn Notifier>,
    /// Bearer secret for the provisioning webhook. `None` rejects all calls.
    pub webhook_secret: Option<SecretString>,
}

/// Payload IT sends when a corporate account is ready.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProvisioningPayload {
    user_id: Uuid,
    corporate_email: String,
}

fn error_response(err: Error) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &err {
        Error::Database(DatabaseError::NotFound { .. })
        | Error::Engine(EngineError::JourneyNotFound { .. }) => StatusCode::NOT_FOUND,
        Error::Engine(EngineError::DuplicateJourney { .. }) => StatusCode::CONFLICT,
        Error::Engine(
            EngineError::InvalidTransition { .. } | EngineError::InvalidChecklist { .. },
        ) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!(error = %err, "Request failed");
    }
    (status, Json(json!({ "error": err.to_string() })))
}

fn check_bearer(headers: &HeaderMap, secret: &Option<SecretString>) -> bool {
    let Some(secret) = secret else { return false };
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == secret.expose_secret())
}

/// POST /api/webhooks/provisioning
///
/// IT's callback once the corporate account exists. Runs the identity
/// flip. Requires the shared bearer secret.
async fn provisioning_webhook(
    State(state): State<JourneyRouteState>,
    headers: HeaderMap,
    Json(payload): Json<ProvisioningPayload>,
) -> impl IntoResponse {
    if !check_bearer(&headers, &state.webhook_secret) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid webhook token" })),
        )
            .into_response();
    }

    match process_identity_flip(
        &state.store,
        state.notifier.as_ref(),
        payload.user_id,
        &payload.corporate_email,
    )
    .await
    {
        Ok(outcome) => Json(serde_json::to_value(outcome).unwrap_or_default()).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// POST /api/webhooks/provisioning/rollback
///
/// Reverses a flip reported by mistake. Same auth as the flip.
async fn provisioning_rollback(
    State(state): State<JourneyRouteState>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    if !check_bearer(&headers, &state.webhook_secret) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid webhook token" })),
        )
            .into_response();
    }
    let Some(user_id) = payload
        .get("userId")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "userId is required" })),
        )
            .into_response();
    };

    match rollback_identity_flip(&state.store, user_id).await {
        Ok(outcome) => Json(serde_json::to_value(outcome).unwrap_or_default()).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// GET /api/users/{id}/journeys
///
/// All journeys for a user, each with its steps in resolved order.
async fn list_user_journeys(
    State(state): State<JourneyRouteState>,
    Path(user_id): Path<Uuid>,
) -> impl IntoResponse {
    let conn = state.store.conn().await;
    let journeys = match queries::list_journeys_for_user(&conn, user_id).await {
        Ok(j) => j,
        Err(e) => return error_response(e.into()).into_response(),
    };
    let mut out = Vec::with_capacity(journeys.len());
    for journey in journeys {
        match queries::list_step_details(&conn, journey.id).await {
            Ok(steps) => out.push(crate::journey::model::JourneyWithSteps { journey, steps }),
            Err(e) => return error_response(e.into()).into_response(),
        }
    }
    Json(serde_json::to_value(out).unwrap_or_default()).into_response()
}

/// POST /api/users/{id}/compile
///
/// Compile every applicable active template the user lacks a journey
/// for, then dispatch USER_CREATED communications.
async fn compile_user_journeys(
    State(state): State<JourneyRouteState>,
    Path(user_id): Path<Uuid>,
) -> impl IntoResponse {
    match compile_all_journeys_for_user(&state.store, user_id).await {
        Ok(journeys) => {
            if let Err(e) = dispatch_communications(
                &state.store,
                state.notifier.as_ref(),
                user_id,
                TriggerEvent::UserCreated,
            )
            .await
            {
                warn!(user_id = %user_id, error = %e, "Post-compile communications failed");
            }
            (
                StatusCode::CREATED,
                Json(json!({ "journeysCreated": journeys.len(), "journeys": journeys })),
            )
                .into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

/// Build the journey REST routes.
pub fn journey_routes(state: JourneyRouteState) -> Router {
    Router::new()
        .route("/api/webhooks/provisioning", post(provisioning_webhook))
        .route(
            "/api/webhooks/provisioning/rollback",
            post(provisioning_rollback),
        )
        .route("/api/users/{user_id}/journeys", get(list_user_journeys))
        .route("/api/users/{user_id}/compile", post(compile_user_journeys))
        .with_state(state)
}
