// GET/POST handlers: version, ingest, history, groups, filters, records

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::AppState;
use crate::aggregator::PersistOutcome;
use crate::models::{AggregationKey, ScrapEvent, Selection, format_timestamp_ms, topic_for};
use crate::version::{NAME, VERSION};

/// GET /version: returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

fn bad_request(message: impl ToString) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message.to_string() })),
    )
        .into_response()
}

/// POST /api/machines/{id}/scrap: one event for topic `machines/{id}/scrap`.
/// Returns the aggregate it produced; the persistence outcome rides along as a note.
pub(super) async fn ingest_handler(
    Path(machine_id): Path<String>,
    State(state): State<AppState>,
    body: String,
) -> Response {
    let event = match ScrapEvent::from_topic_payload(&topic_for(&machine_id), &body) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!(error = %e, machine_id = %machine_id, "rejected payload");
            return bad_request(e);
        }
    };
    match state.pipeline.process(&event) {
        Ok(ingested) => {
            let persistence = match &ingested.persistence {
                PersistOutcome::Queued => "queued".to_string(),
                PersistOutcome::Disabled => "disabled".to_string(),
                PersistOutcome::Failed(e) => format!("failed: {}", e),
            };
            Json(serde_json::json!({
                "aggregate": ingested.result,
                "persistence": persistence,
            }))
            .into_response()
        }
        Err(e) => bad_request(e),
    }
}

/// GET /api/machines/{id}/history: rolling chart history; 404 until the first tick saw it.
pub(super) async fn history_handler(
    Path(machine_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.dashboard.history(&machine_id) {
        Some(history) => Json(history.as_ref().clone()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("no history for machine {}", machine_id) })),
        )
            .into_response(),
    }
}

/// Comma-separated filter lists; missing or empty means "all".
#[derive(Debug, Default, Deserialize)]
pub(super) struct GroupsQuery {
    machines: Option<String>,
    indices: Option<String>,
}

impl GroupsQuery {
    fn selection(&self) -> Result<Selection, String> {
        let machines = split_list(self.machines.as_deref());
        let indices = split_list(self.indices.as_deref())
            .into_iter()
            .map(|s| {
                s.parse::<u32>()
                    .map_err(|_| format!("invalid index {:?}", s))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Selection::new(machines, indices))
    }
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// GET /api/groups?machines=A,B&indices=2: filtered per-machine groups, sorted by machine.
pub(super) async fn groups_handler(
    Query(query): Query<GroupsQuery>,
    State(state): State<AppState>,
) -> Response {
    match query.selection() {
        Ok(selection) => Json(state.dashboard.groups(&selection)).into_response(),
        Err(e) => bad_request(e),
    }
}

/// GET /api/filters: machines and indices seen so far (filter bar options).
pub(super) async fn filters_handler(State(state): State<AppState>) -> impl IntoResponse {
    let (machines, indices) = state.dashboard.filters();
    Json(serde_json::json!({ "machines": machines, "indices": indices }))
}

#[derive(Debug, Deserialize)]
pub(super) struct RecordsQuery {
    limit: Option<u32>,
}

/// GET /api/records?limit=N: stored record count and the most recent records.
pub(super) async fn records_handler(
    Query(query): Query<RecordsQuery>,
    State(state): State<AppState>,
) -> Response {
    let Some(repo) = state.repo.as_ref() else {
        return service_unavailable();
    };
    let limit = query.limit.unwrap_or(20).min(1000);
    let result = async {
        let count = repo.count_records().await?;
        let records = repo.get_recent_records(limit).await?;
        anyhow::Ok((count, records))
    }
    .await;
    match result {
        Ok((count, records)) => {
            Json(serde_json::json!({ "count": count, "records": records })).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, operation = "get_recent_records", "records query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

fn service_unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({ "error": "persistence is not configured" })),
    )
        .into_response()
}

/// GET /api/machines/{id}/scrap/{index}/totals: live window vs. stored records over the same
/// window, ending at the key's newest sample. The counts differ while the writer is behind or
/// after a dropped batch.
pub(super) async fn totals_handler(
    Path((machine_id, scrap_index)): Path<(String, u32)>,
    State(state): State<AppState>,
) -> Response {
    let Some(repo) = state.repo.as_ref() else {
        return service_unavailable();
    };
    let aggregator = state.pipeline.aggregator();
    let key = AggregationKey::new(machine_id.clone(), scrap_index);
    let (Some(live), Some(window_end_ms)) =
        (aggregator.stats(&key), aggregator.latest_sample_ms(&key))
    else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": format!("no window for machine {} index {}", machine_id, scrap_index)
            })),
        )
            .into_response();
    };
    let cutoff_ms = window_end_ms - aggregator.window_ms();
    match repo
        .window_totals(&machine_id, scrap_index, cutoff_ms, window_end_ms)
        .await
    {
        Ok((stored_sum, stored_count)) => Json(serde_json::json!({
            "machineId": machine_id,
            "scrapIndex": scrap_index,
            "windowEnd": format_timestamp_ms(window_end_ms),
            "live": { "sum": live.sum, "count": live.count },
            "stored": { "sum": stored_sum, "count": stored_count },
        }))
        .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, operation = "window_totals", "totals query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
