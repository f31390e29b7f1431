use axum::extract::{Path, State};
use axum::Json;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::auth::{roles::Role, AuthenticatedUser};
use crate::error::{AppError, AppResult};
use crate::history;
use crate::models::{FutureCampaign, FutureCampaignEntry, NewFutureCampaign, NewFutureCampaignEntry};
use crate::response::{ok, ApiResponse};
use crate::schema::{future_campaign_entries, future_campaigns};
use crate::state::AppState;
use crate::utils::{clean_split, get_short_name, parse_number, valid_campaign_name, valid_pwg};

#[derive(Debug, Deserialize)]
pub struct CreateFutureCampaignRequest {
    pub name: String,
    #[serde(default)]
    pub reference: String,
}

pub async fn create_future_campaign(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreateFutureCampaignRequest>,
) -> AppResult<Json<ApiResponse<FutureCampaign>>> {
    user.require_role(Role::ProductionManager)?;
    let name = request.name.trim().to_string();
    if !valid_campaign_name(&name) {
        return Err(AppError::bad_request(format!(
            "Name \"{name}\" is not valid"
        )));
    }

    info!(name, reference = request.reference, "creating future campaign");
    let mut conn = state.db()?;
    let campaign = diesel::insert_into(future_campaigns::table)
        .values(NewFutureCampaign {
            id: Uuid::new_v4(),
            name: name.clone(),
            reference: request.reference.trim().to_string(),
        })
        .get_result::<FutureCampaign>(&mut conn)
        .map_err(|err| match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                AppError::conflict(format!("Future campaign \"{name}\" already exists"))
            }
            other => other.into(),
        })?;

    history::record_action(&mut conn, &user.username, "", "create future campaign", &name)?;
    Ok(ok(campaign))
}

pub async fn get_future_campaigns(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Vec<FutureCampaign>>>> {
    let mut conn = state.db()?;
    let campaigns: Vec<FutureCampaign> = future_campaigns::table
        .order(future_campaigns::name.asc())
        .load(&mut conn)?;
    Ok(ok(campaigns))
}

pub async fn get_future_campaign(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<ApiResponse<Value>>> {
    campaign_with_entries(&state, &name, None)
}

pub async fn get_future_campaign_for_pwg(
    State(state): State<AppState>,
    Path((name, pwg)): Path<(String, String)>,
) -> AppResult<Json<ApiResponse<Value>>> {
    campaign_with_entries(&state, &name, Some(&pwg))
}

/// Campaign with its entries, entries ordered by dataset name case
/// insensitively and optionally narrowed to one interested PWG.
fn campaign_with_entries(
    state: &AppState,
    name: &str,
    pwg: Option<&str>,
) -> AppResult<Json<ApiResponse<Value>>> {
    info!(name, pwg = pwg.unwrap_or(""), "getting future campaign");
    let mut conn = state.db()?;
    let campaign: FutureCampaign = future_campaigns::table
        .filter(future_campaigns::name.eq(name))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found(format!("Future campaign \"{name}\" not found")))?;

    let mut query = future_campaign_entries::table
        .filter(future_campaign_entries::campaign_id.eq(campaign.id))
        .into_boxed();
    if let Some(pwg) = pwg {
        let pwg = pwg.trim().to_uppercase();
        query = query.filter(future_campaign_entries::interested_pwgs.contains(vec![pwg]));
    }

    let mut entries: Vec<FutureCampaignEntry> = query.load(&mut conn)?;
    entries.sort_by(|a, b| a.dataset.to_lowercase().cmp(&b.dataset.to_lowercase()));

    let mut value = serde_json::to_value(&campaign)?;
    if let Value::Object(map) = &mut value {
        map.insert("entries".to_string(), serde_json::to_value(&entries)?);
    }
    Ok(ok(value))
}

#[derive(Debug, Deserialize)]
pub struct UpdateFutureCampaignRequest {
    pub uid: Uuid,
    pub name: String,
    #[serde(default)]
    pub reference: String,
}

pub async fn update_future_campaign(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<UpdateFutureCampaignRequest>,
) -> AppResult<Json<ApiResponse<FutureCampaign>>> {
    user.require_role(Role::ProductionManager)?;
    let name = request.name.trim().to_string();
    if !valid_campaign_name(&name) {
        return Err(AppError::bad_request(format!(
            "Name \"{name}\" is not valid"
        )));
    }

    info!(uid = %request.uid, name, "updating future campaign");
    let mut conn = state.db()?;
    let campaign = diesel::update(future_campaigns::table.find(request.uid))
        .set((
            future_campaigns::name.eq(&name),
            future_campaigns::reference.eq(request.reference.trim()),
        ))
        .get_result::<FutureCampaign>(&mut conn)
        .map_err(|err| match err {
            DieselError::NotFound => {
                AppError::not_found(format!("Future campaign \"{name}\" not found"))
            }
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                AppError::conflict(format!("Future campaign \"{name}\" already exists"))
            }
            other => other.into(),
        })?;

    history::record_action(&mut conn, &user.username, "", "update future campaign", &name)?;
    Ok(ok(campaign))
}

#[derive(Debug, Deserialize)]
pub struct DeleteFutureCampaignRequest {
    pub uid: Uuid,
    pub name: String,
}

pub async fn delete_future_campaign(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<DeleteFutureCampaignRequest>,
) -> AppResult<Json<ApiResponse<Value>>> {
    user.require_role(Role::ProductionManager)?;
    info!(uid = %request.uid, name = request.name, "deleting future campaign");
    let mut conn = state.db()?;
    conn.transaction::<_, AppError, _>(|conn| {
        future_campaigns::table
            .filter(future_campaigns::id.eq(request.uid))
            .filter(future_campaigns::name.eq(&request.name))
            .first::<FutureCampaign>(conn)
            .optional()?
            .ok_or_else(|| {
                AppError::not_found(format!("Future campaign \"{}\" not found", request.name))
            })?;
        // Entries go first, the foreign key does not cascade.
        diesel::delete(
            future_campaign_entries::table
                .filter(future_campaign_entries::campaign_id.eq(request.uid)),
        )
        .execute(conn)?;
        diesel::delete(future_campaigns::table.find(request.uid)).execute(conn)?;
        Ok(())
    })?;

    history::record_action(
        &mut conn,
        &user.username,
        "",
        "delete future campaign",
        &request.name,
    )?;
    Ok(ok(Value::Null))
}

#[derive(Debug, Deserialize)]
pub struct AddEntryRequest {
    pub campaign_uid: Uuid,
    pub dataset: String,
    pub short_name: Option<String>,
    #[serde(default)]
    pub chain_tag: String,
    pub events: Value,
    #[serde(default)]
    pub cross_section: f64,
    #[serde(default)]
    pub interested_pwgs: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub fragment: String,
}

fn parse_events(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|events| events as i64)),
        Value::String(text) => parse_number(text),
        _ => None,
    }
}

fn split_pwgs(raw: &str) -> Vec<String> {
    let mut pwgs = clean_split(&raw.to_uppercase());
    pwgs.sort();
    pwgs.dedup();
    pwgs
}

fn checked_pwgs(raw: &str) -> Result<Vec<String>, AppError> {
    let pwgs = split_pwgs(raw);
    if let Some(pwg) = pwgs.iter().find(|pwg| !valid_pwg(pwg)) {
        return Err(AppError::bad_request(format!("Invalid PWG: {pwg}")));
    }
    Ok(pwgs)
}

pub async fn add_entry(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<AddEntryRequest>,
) -> AppResult<Json<ApiResponse<FutureCampaignEntry>>> {
    user.require_role(Role::User)?;
    info!(campaign_uid = %request.campaign_uid, dataset = request.dataset, "adding entry");
    let events = parse_events(&request.events).ok_or_else(|| {
        AppError::bad_request(format!("Invalid number of events: {}", request.events))
    })?;
    let interested_pwgs = checked_pwgs(&request.interested_pwgs)?;
    let short_name = match request.short_name.as_deref().map(str::trim) {
        Some(short_name) if !short_name.is_empty() => short_name.to_string(),
        _ => get_short_name(&request.dataset),
    };

    let mut conn = state.db()?;
    let entry = diesel::insert_into(future_campaign_entries::table)
        .values(NewFutureCampaignEntry {
            id: Uuid::new_v4(),
            campaign_id: request.campaign_uid,
            short_name,
            dataset: request.dataset.clone(),
            chain_tag: request.chain_tag.clone(),
            events,
            cross_section: request.cross_section,
            ref_interested_pwgs: interested_pwgs.clone(),
            interested_pwgs,
            comment: request.comment.clone(),
            fragment: request.fragment.clone(),
            in_reference: String::new(),
            in_target: String::new(),
        })
        .get_result::<FutureCampaignEntry>(&mut conn)
        .map_err(|err| match err {
            DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => {
                AppError::not_found(format!(
                    "Future campaign \"{}\" not found",
                    request.campaign_uid
                ))
            }
            other => other.into(),
        })?;

    history::record_action(
        &mut conn,
        &user.username,
        &request.dataset,
        "add entry",
        &entry.id.to_string(),
    )?;
    Ok(ok(entry))
}

#[derive(Debug, Deserialize)]
pub struct UpdateEntryRequest {
    pub uid: Uuid,
    pub dataset: String,
    #[serde(default)]
    pub chain_tag: String,
    pub events: Value,
    #[serde(default)]
    pub interested_pwgs: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub fragment: String,
}

/// Edit the user facing fields of an entry. Links to reference and target
/// campaigns are managed by the sync job and stay untouched here.
pub async fn update_entry(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<UpdateEntryRequest>,
) -> AppResult<Json<ApiResponse<FutureCampaignEntry>>> {
    user.require_role(Role::User)?;
    info!(uid = %request.uid, dataset = request.dataset, "updating entry");
    let events = parse_events(&request.events).ok_or_else(|| {
        AppError::bad_request(format!("Invalid number of events: {}", request.events))
    })?;
    let interested_pwgs = checked_pwgs(&request.interested_pwgs)?;

    let mut conn = state.db()?;
    let entry = diesel::update(future_campaign_entries::table.find(request.uid))
        .set((
            future_campaign_entries::short_name.eq(get_short_name(&request.dataset)),
            future_campaign_entries::dataset.eq(&request.dataset),
            future_campaign_entries::chain_tag.eq(&request.chain_tag),
            future_campaign_entries::events.eq(events),
            future_campaign_entries::interested_pwgs.eq(&interested_pwgs),
            future_campaign_entries::comment.eq(&request.comment),
            future_campaign_entries::fragment.eq(&request.fragment),
        ))
        .get_result::<FutureCampaignEntry>(&mut conn)
        .map_err(|err| match err {
            DieselError::NotFound => {
                AppError::not_found(format!("Entry \"{}\" not found", request.uid))
            }
            other => other.into(),
        })?;

    history::record_action(
        &mut conn,
        &user.username,
        &request.dataset,
        "update entry",
        &request.uid.to_string(),
    )?;
    Ok(ok(entry))
}

#[derive(Debug, Deserialize)]
pub struct DeleteEntryRequest {
    pub uid: Uuid,
    pub campaign_uid: Uuid,
}

pub async fn delete_entry(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<DeleteEntryRequest>,
) -> AppResult<Json<ApiResponse<Value>>> {
    user.require_role(Role::User)?;
    info!(uid = %request.uid, campaign_uid = %request.campaign_uid, "deleting entry");
    let mut conn = state.db()?;
    let deleted = diesel::delete(
        future_campaign_entries::table
            .filter(future_campaign_entries::id.eq(request.uid))
            .filter(future_campaign_entries::campaign_id.eq(request.campaign_uid)),
    )
    .execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found(format!(
            "Entry \"{}\" not found",
            request.uid
        )));
    }

    history::record_action(
        &mut conn,
        &user.username,
        &request.uid.to_string(),
        "delete entry",
        "",
    )?;
    Ok(ok(Value::Null))
}
