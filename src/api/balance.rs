use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::network::parse_member_id;
use super::AppState;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceQuery {
    pub member: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub member_id: String,
    pub total_minor: i64,
    pub by_category: BTreeMap<String, i64>,
    pub entry_count: usize,
    pub as_of_ms: i64,
}

pub async fn get_balance(
    Query(params): Query<BalanceQuery>,
    State(state): State<AppState>,
) -> Result<Json<BalanceResponse>, AppError> {
    let member_id = parse_member_id(&params.member)?;
    let projection = state.projector.balance(&member_id).await?;

    Ok(Json(BalanceResponse {
        member_id: projection.member_id.to_string(),
        total_minor: projection.total.as_minor(),
        by_category: projection
            .by_category
            .iter()
            .map(|(category, amount)| (category.as_str().to_string(), amount.as_minor()))
            .collect(),
        entry_count: projection.entry_count,
        as_of_ms: projection.as_of_ms.as_ms(),
    }))
}
