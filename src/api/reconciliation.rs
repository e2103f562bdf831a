use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::engine::ScanOutcome;
use crate::error::AppError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
    pub scan_id: String,
    pub outcome: String,
    pub anomalies: Vec<serde_json::Value>,
}

pub async fn run_scan(State(state): State<AppState>) -> Result<Json<ScanResponse>, AppError> {
    let report = state.guard.scan().await?;

    let anomalies = report
        .anomalies
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(ScanResponse {
        scan_id: report.scan_id,
        outcome: match report.outcome {
            ScanOutcome::Clean => "clean".to_string(),
            ScanOutcome::AnomaliesFound => "anomalies_found".to_string(),
        },
        anomalies,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomaliesQuery {
    pub scan_id: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomaliesResponse {
    pub anomalies: Vec<AnomalyDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyDto {
    pub scan_id: String,
    pub kind: String,
    pub detail: serde_json::Value,
    pub observed_at_ms: i64,
}

pub async fn get_anomalies(
    Query(params): Query<AnomaliesQuery>,
    State(state): State<AppState>,
) -> Result<Json<AnomaliesResponse>, AppError> {
    let limit = params.limit.unwrap_or(100).clamp(1, 1000);
    let rows = state
        .repo
        .query_anomaly_reports(params.scan_id.as_deref(), limit)
        .await?;

    let anomalies = rows
        .into_iter()
        .map(|row| {
            let detail = serde_json::from_str(&row.detail)
                .unwrap_or(serde_json::Value::String(row.detail));
            AnomalyDto {
                scan_id: row.scan_id,
                kind: row.kind,
                detail,
                observed_at_ms: row.observed_at_ms.as_ms(),
            }
        })
        .collect();

    Ok(Json(AnomaliesResponse { anomalies }))
}
