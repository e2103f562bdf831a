use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::domain::{MemberId, NetworkPosition};
use crate::error::AppError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionDto {
    pub member_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sponsor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement_parent_id: Option<String>,
    pub depth: u32,
    pub slot_index: u32,
    pub created_at_ms: i64,
}

impl PositionDto {
    pub fn from_position(position: &NetworkPosition) -> Self {
        PositionDto {
            member_id: position.member_id.to_string(),
            sponsor_id: position.sponsor_id.as_ref().map(|s| s.to_string()),
            placement_parent_id: position
                .placement_parent_id
                .as_ref()
                .map(|p| p.to_string()),
            depth: position.depth,
            slot_index: position.slot_index,
            created_at_ms: position.created_at_ms.as_ms(),
        }
    }
}

pub async fn get_position(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PositionDto>, AppError> {
    let member_id = parse_member_id(&id)?;
    let position = state
        .repo
        .get_position(&member_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("member {} has no placement", member_id)))?;

    Ok(Json(PositionDto::from_position(&position)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AncestorsQuery {
    pub max_level: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AncestorsResponse {
    pub ancestors: Vec<AncestorDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AncestorDto {
    pub member_id: String,
    pub level: u32,
}

pub async fn get_ancestors(
    Path(id): Path<String>,
    Query(params): Query<AncestorsQuery>,
    State(state): State<AppState>,
) -> Result<Json<AncestorsResponse>, AppError> {
    let member_id = parse_member_id(&id)?;
    let max_level = params.max_level.unwrap_or(state.config.matrix_depth);
    if max_level == 0 {
        return Err(AppError::BadRequest("maxLevel must be >= 1".into()));
    }

    let ancestors = state
        .topology
        .ancestors_within_levels(&member_id, max_level)
        .await?;

    Ok(Json(AncestorsResponse {
        ancestors: ancestors
            .into_iter()
            .map(|(member_id, level)| AncestorDto {
                member_id: member_id.to_string(),
                level,
            })
            .collect(),
    }))
}

pub(super) fn parse_member_id(raw: &str) -> Result<MemberId, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest("member id must not be empty".into()));
    }
    Ok(MemberId::new(trimmed))
}
