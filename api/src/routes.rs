use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use axum_extra::extract::Query;
use serde::Deserialize;
use serde_json::{json, Value};
use shared::{DatasetRequest, DEFAULT_TIMEFRAMES};
use tracing::{error, instrument};

use crate::state::AppState;

/// Query parameters for /data
#[derive(Debug, Deserialize)]
pub struct DataQuery {
    /// Trading pair, "BTCUSDT" or "BTC/USDT"
    pub symbol: Option<String>,
    /// Repeatable: timeframe=1d&timeframe=4h
    #[serde(default)]
    pub timeframe: Vec<String>,
    /// Days of history ending with yesterday
    pub days: Option<u32>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/data", get(get_data))
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "git_hash": env!("GIT_HASH"),
        "build_time": env!("BUILD_TIME"),
    }))
}

/// GET /data?symbol=BTCUSDT&timeframe=1d&timeframe=4h&days=1000
///
/// Answers 200 with whatever could be served; timeframes that failed carry a
/// message under `errors`. Only the `fail` policy turns a fetch failure into 502.
#[instrument(skip(state))]
async fn get_data(State(state): State<AppState>, Query(params): Query<DataQuery>) -> Response {
    let timeframes = if params.timeframe.is_empty() {
        DEFAULT_TIMEFRAMES.iter().map(|t| t.to_string()).collect()
    } else {
        params.timeframe
    };

    let request = DatasetRequest {
        symbol: params
            .symbol
            .unwrap_or_else(|| state.default_symbol.clone()),
        timeframes,
        days: params.days.unwrap_or(state.default_days).max(1),
    };

    match state.service.get_dataset(&request).await {
        Ok(dataset) => Json(dataset).into_response(),
        Err(e) => {
            error!(symbol = %request.symbol, error = %e, "Dataset request failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "name": request.symbol.replace('/', ""),
                    "error": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}
