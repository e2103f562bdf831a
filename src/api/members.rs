use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::network::{parse_member_id, PositionDto};
use super::AppState;
use crate::domain::Tier;
use crate::error::AppError;
use crate::orchestration::{EnrollOutcome, EnrollmentRequest};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollRequestDto {
    pub member_id: String,
    /// Omitted only when bootstrapping a forest root.
    pub sponsor_id: Option<String>,
    pub tier: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollResponse {
    pub member_id: String,
    pub status: String,
    pub tier: String,
    pub already_enrolled: bool,
    pub position: PositionDto,
}

pub async fn enroll_member(
    State(state): State<AppState>,
    Json(body): Json<EnrollRequestDto>,
) -> Result<Json<EnrollResponse>, AppError> {
    let member_id = parse_member_id(&body.member_id)?;
    let sponsor_id = match body.sponsor_id.as_deref() {
        Some("") | None => None,
        Some(raw) => Some(parse_member_id(raw)?),
    };
    let tier = match body.tier.as_deref() {
        None => Tier::None,
        Some(raw) => Tier::parse(raw)
            .ok_or_else(|| AppError::BadRequest(format!("unknown tier {:?}", raw)))?,
    };

    let outcome = state
        .orchestrator
        .enroll(EnrollmentRequest {
            member_id,
            sponsor_id,
            tier,
        })
        .await?;

    let (member, position, already_enrolled) = match &outcome {
        EnrollOutcome::Enrolled { member, position } => (member, position, false),
        EnrollOutcome::AlreadyEnrolled { member, position } => (member, position, true),
    };

    Ok(Json(EnrollResponse {
        member_id: member.member_id.to_string(),
        status: member.status.as_str().to_string(),
        tier: member.tier.as_str().to_string(),
        already_enrolled,
        position: PositionDto::from_position(position),
    }))
}
