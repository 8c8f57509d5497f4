//! HTTP endpoints for the guild config dashboard

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use lorikeet_redis::channels::known;
use lorikeet_redis::{AskError, PubSub, Transport};

/// Shared application state
#[derive(Clone)]
pub struct AppState<T: Transport> {
    pub pubsub: PubSub<T>,
}

impl<T: Transport> AppState<T> {
    pub fn new(pubsub: PubSub<T>) -> Self {
        Self { pubsub }
    }
}

/// Error body for failed lookups
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

/// Fetch a guild's configuration by asking the shard fleet.
///
/// Whichever shard owns the guild answers with its serialized config; the
/// three no-answer outcomes map to distinct statuses so the dashboard can
/// tell "bot offline" apart from "bot is not in that guild".
async fn get_guild_config<T: Transport>(
    State(state): State<AppState<T>>,
    Path(guild_id): Path<String>,
) -> Result<String, (StatusCode, Json<ErrorBody>)> {
    match state.pubsub.ask(&guild_id, known::CONFIG).await {
        Ok(config) => Ok(config),
        Err(e) => {
            let (status, message) = match &e {
                AskError::Unreachable => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Bot is completely offline, try again later.",
                ),
                AskError::Declined(_) => (
                    StatusCode::NOT_FOUND,
                    "Bot could not find the requested guild. Is it a member?",
                ),
                AskError::TimedOut(_) => (
                    StatusCode::GATEWAY_TIMEOUT,
                    "Bot did not answer in time, try again later.",
                ),
                AskError::Pending => (
                    StatusCode::CONFLICT,
                    "A lookup for this guild is already running.",
                ),
                AskError::Transport(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Unknown error"),
            };
            warn!(guild_id = %guild_id, error = %e, "guild config lookup failed");
            Err((
                status,
                Json(ErrorBody {
                    error: message.to_string(),
                }),
            ))
        }
    }
}

/// Tell every shard that a guild's stored configuration changed.
async fn refresh_guild_config<T: Transport>(
    State(state): State<AppState<T>>,
    Path(guild_id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    match state.pubsub.publish(known::CONFIG_REFRESH, &guild_id).await {
        Ok(shards) => {
            info!(guild_id = %guild_id, shards, "config refresh broadcast");
            Ok(StatusCode::ACCEPTED)
        }
        Err(e) => {
            warn!(guild_id = %guild_id, error = %e, "config refresh broadcast failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: "Unknown error".to_string(),
                }),
            ))
        }
    }
}

async fn health_handler() -> (StatusCode, Json<HealthStatus>) {
    (
        StatusCode::OK,
        Json(HealthStatus {
            status: "ok".to_string(),
        }),
    )
}

/// Create the service router
pub fn create_router<T: Transport>(state: AppState<T>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/guilds/:guild_id/config", get(get_guild_config::<T>))
        .route(
            "/guilds/:guild_id/config/refresh",
            post(refresh_guild_config::<T>),
        )
        .with_state(state)
}
