use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::network::parse_member_id;
use super::AppState;
use crate::domain::{
    Amount, EntryCategory, EntryId, EntryMetadata, LedgerEntry, LedgerEntryDraft, TimeMs,
};
use crate::error::AppError;
use crate::orchestration::RecordOutcome;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordEntryRequest {
    pub member_id: String,
    pub category: String,
    pub amount_minor: i64,
    pub idempotency_key: String,
    pub caused_by_entry_id: Option<String>,
    /// Tagged metadata object; defaults to the category's empty shape.
    pub metadata: Option<EntryMetadata>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordEntryResponse {
    pub entry: EntryDto,
    pub already_recorded: bool,
    pub commissions: Vec<EntryDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryDto {
    pub entry_id: String,
    pub member_id: String,
    pub category: String,
    pub amount_minor: i64,
    pub idempotency_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caused_by_entry_id: Option<String>,
    pub metadata: EntryMetadata,
    pub created_at_ms: i64,
}

impl EntryDto {
    pub fn from_entry(entry: &LedgerEntry) -> Self {
        EntryDto {
            entry_id: entry.entry_id.to_string(),
            member_id: entry.member_id.to_string(),
            category: entry.category.as_str().to_string(),
            amount_minor: entry.amount.as_minor(),
            idempotency_key: entry.idempotency_key.clone(),
            caused_by_entry_id: entry.caused_by_entry_id.map(|id| id.to_string()),
            metadata: entry.metadata.clone(),
            created_at_ms: entry.created_at_ms.as_ms(),
        }
    }
}

pub async fn record_entry(
    State(state): State<AppState>,
    Json(body): Json<RecordEntryRequest>,
) -> Result<Json<RecordEntryResponse>, AppError> {
    let member_id = parse_member_id(&body.member_id)?;
    let category = EntryCategory::parse(&body.category)
        .ok_or_else(|| AppError::BadRequest(format!("unknown category {:?}", body.category)))?;

    // Commissions and reversals are derived by the engine, never
    // submitted over the wire.
    if category == EntryCategory::Commission || category == EntryCategory::Reversal {
        return Err(AppError::BadRequest(format!(
            "{} entries cannot be submitted directly",
            category
        )));
    }

    let caused_by_entry_id = body
        .caused_by_entry_id
        .as_deref()
        .map(parse_entry_id)
        .transpose()?;

    let metadata = match body.metadata {
        Some(metadata) => metadata,
        None => empty_metadata(category),
    };

    let draft = LedgerEntryDraft {
        member_id,
        category,
        amount: Amount::from_minor(body.amount_minor),
        idempotency_key: body.idempotency_key,
        caused_by_entry_id,
        metadata,
    };

    let RecordOutcome {
        append,
        commissions,
    } = state.orchestrator.record(&draft).await?;

    Ok(Json(RecordEntryResponse {
        entry: EntryDto::from_entry(append.entry()),
        already_recorded: !append.was_recorded(),
        commissions: commissions.iter().map(EntryDto::from_entry).collect(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReverseEntryRequest {
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReverseEntryResponse {
    pub entry: EntryDto,
    pub already_reversed: bool,
}

pub async fn reverse_entry(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<ReverseEntryRequest>,
) -> Result<Json<ReverseEntryResponse>, AppError> {
    let entry_id = parse_entry_id(&id)?;
    if body.reason.trim().is_empty() {
        return Err(AppError::BadRequest("reason must not be empty".into()));
    }

    let outcome = state.orchestrator.reverse(entry_id, &body.reason).await?;
    let already_reversed = matches!(
        outcome,
        crate::engine::ReverseOutcome::AlreadyReversed(_)
    );

    Ok(Json(ReverseEntryResponse {
        entry: EntryDto::from_entry(outcome.entry()),
        already_reversed,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntriesQuery {
    pub member: String,
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntriesResponse {
    pub entries: Vec<EntryDto>,
}

pub async fn get_entries(
    Query(params): Query<EntriesQuery>,
    State(state): State<AppState>,
) -> Result<Json<EntriesResponse>, AppError> {
    let member_id = parse_member_id(&params.member)?;
    if let (Some(from_ms), Some(to_ms)) = (params.from_ms, params.to_ms) {
        if from_ms > to_ms {
            return Err(AppError::BadRequest("fromMs must be <= toMs".into()));
        }
    }

    if state.repo.get_member(&member_id).await?.is_none() {
        return Err(AppError::NotFound(format!("unknown member {}", member_id)));
    }

    let entries = state
        .repo
        .query_entries_for_member(
            &member_id,
            params.from_ms.map(TimeMs::new),
            params.to_ms.map(TimeMs::new),
        )
        .await?;

    Ok(Json(EntriesResponse {
        entries: entries.iter().map(EntryDto::from_entry).collect(),
    }))
}

fn parse_entry_id(raw: &str) -> Result<EntryId, AppError> {
    EntryId::parse(raw.trim())
        .map_err(|_| AppError::BadRequest(format!("invalid entry id {:?}", raw)))
}

fn empty_metadata(category: EntryCategory) -> EntryMetadata {
    match category {
        EntryCategory::Deposit => EntryMetadata::Deposit { source: None },
        EntryCategory::ProfitShare => EntryMetadata::ProfitShare { period: None },
        EntryCategory::PurchaseDebit => EntryMetadata::PurchaseDebit {
            order_ref: None,
            overdraft_allowed: false,
        },
        EntryCategory::Withdrawal => EntryMetadata::Withdrawal { destination: None },
        EntryCategory::ExpenseDebit => EntryMetadata::ExpenseDebit { note: None },
        // Rejected above; unreachable through the router.
        EntryCategory::Commission | EntryCategory::Reversal => EntryMetadata::Reversal {
            reason: String::new(),
        },
    }
}
