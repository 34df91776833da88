use crate::db::{PgStore, RecordQuery};
use crate::model::ReadingsResponse;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::error;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
struct AppState {
    store: PgStore,
}

#[derive(Debug, Deserialize)]
pub struct ReadingsQuery {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl ReadingsQuery {
    fn to_record_query(&self) -> RecordQuery {
        RecordQuery {
            start: self.start,
            end: self.end,
            limit: self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT),
            offset: self.offset.unwrap_or(0),
        }
    }
}

pub fn create_router(store: PgStore) -> Router {
    let state = AppState { store };

    Router::new()
        .route("/api/v1/readings", get(get_readings))
        .with_state(state)
}

async fn get_readings(
    State(state): State<AppState>,
    Query(params): Query<ReadingsQuery>,
) -> Result<Json<ReadingsResponse>, AppError> {
    let query = params.to_record_query();

    let records = state.store.recent(&query).await?;

    Ok(Json(ReadingsResponse {
        count: records.len(),
        data: records,
        limit: query.limit,
        offset: query.offset,
    }))
}

struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("API error: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Internal server error: {}", self.0),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
