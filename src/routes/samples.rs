use std::collections::BTreeSet;

use axum::extract::{Multipart, Query, State};
use axum::Json;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::Bool;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::auth::{roles::Role, AuthenticatedUser};
use crate::error::{AppError, AppResult};
use crate::history;
use crate::models::Sample;
use crate::response::{ok, ApiResponse};
use crate::schema::{samples, tags};
use crate::state::AppState;
use crate::utils::{
    clean_split, get_chain_tag, get_short_name, get_xaod_version, sorted_dedup, valid_pwg,
};

const RESULT_LIMIT: i64 = 25000;

pub(crate) type SampleFilter = Box<dyn BoxableExpression<samples::table, Pg, SqlType = Bool>>;

#[derive(Debug, Clone, Copy)]
pub(crate) enum SampleField {
    Campaign,
    ChainedRequest,
    Dataset,
    Root,
    Miniaod,
    Nanoaod,
}

/// Translate a `*` wildcard into a LIKE pattern, escaping the characters
/// LIKE treats specially.
pub(crate) fn like_pattern(value: &str) -> String {
    let mut pattern = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '*' => pattern.push('%'),
            '%' | '_' | '\\' => {
                pattern.push('\\');
                pattern.push(ch);
            }
            _ => pattern.push(ch),
        }
    }
    pattern
}

/// Build one filter for a text column: values are ORed together, values with
/// a `*` match case insensitively.
pub(crate) fn sample_field_filter(field: SampleField, values: &[String]) -> Option<SampleFilter> {
    let mut parts: Vec<SampleFilter> = Vec::new();
    for value in values {
        let part: SampleFilter = if value.contains('*') {
            let pattern = like_pattern(value);
            match field {
                SampleField::Campaign => Box::new(samples::campaign.ilike(pattern)),
                SampleField::ChainedRequest => Box::new(samples::chained_request.ilike(pattern)),
                SampleField::Dataset => Box::new(samples::dataset.ilike(pattern)),
                SampleField::Root => Box::new(samples::root.ilike(pattern)),
                SampleField::Miniaod => Box::new(samples::miniaod.ilike(pattern)),
                SampleField::Nanoaod => Box::new(samples::nanoaod.ilike(pattern)),
            }
        } else {
            let value = value.clone();
            match field {
                SampleField::Campaign => Box::new(samples::campaign.eq(value)),
                SampleField::ChainedRequest => Box::new(samples::chained_request.eq(value)),
                SampleField::Dataset => Box::new(samples::dataset.eq(value)),
                SampleField::Root => Box::new(samples::root.eq(value)),
                SampleField::Miniaod => Box::new(samples::miniaod.eq(value)),
                SampleField::Nanoaod => Box::new(samples::nanoaod.eq(value)),
            }
        };
        parts.push(part);
    }

    parts
        .into_iter()
        .reduce(|prev, next| Box::new(prev.or(next)) as SampleFilter)
}

#[derive(Debug, Default, Deserialize)]
pub struct SampleArgs {
    pub campaign: Option<String>,
    pub tags: Option<String>,
    pub pwgs: Option<String>,
    pub dataset: Option<String>,
}

pub async fn get_samples(
    State(state): State<AppState>,
    Query(args): Query<SampleArgs>,
) -> AppResult<Json<ApiResponse<Vec<Value>>>> {
    info!(
        campaign = args.campaign.as_deref().unwrap_or(""),
        tags = args.tags.as_deref().unwrap_or(""),
        pwgs = args.pwgs.as_deref().unwrap_or(""),
        dataset = args.dataset.as_deref().unwrap_or(""),
        "getting samples"
    );
    fetch_samples(&state, args)
}

/// Same as the GET endpoint, but dataset names come from an uploaded file,
/// one per line.
pub async fn get_samples_from_file(
    State(state): State<AppState>,
    Query(args): Query<SampleArgs>,
    mut multipart: Multipart,
) -> AppResult<Json<ApiResponse<Vec<Value>>>> {
    let mut uploaded: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.to_string()))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|err| AppError::bad_request(err.to_string()))?;
            uploaded = Some(bytes.to_vec());
        }
    }

    let Some(bytes) = uploaded else {
        return Ok(Json(ApiResponse {
            response: Vec::new(),
            success: false,
            message: "No file".to_string(),
        }));
    };

    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            return Ok(Json(ApiResponse {
                response: Vec::new(),
                success: false,
                message: err.to_string(),
            }));
        }
    };

    info!(bytes = text.len(), "getting samples from uploaded dataset list");
    let dataset = clean_split(&text.replace('\n', ",")).join(",");
    let args = SampleArgs {
        dataset: (!dataset.is_empty()).then_some(dataset),
        ..args
    };
    fetch_samples(&state, args)
}

fn fetch_samples(
    state: &AppState,
    args: SampleArgs,
) -> AppResult<Json<ApiResponse<Vec<Value>>>> {
    let campaign_values = args.campaign.as_deref().map(clean_split).unwrap_or_default();
    let tag_values = args.tags.as_deref().map(clean_split).unwrap_or_default();
    let pwg_values = args.pwgs.as_deref().map(clean_split).unwrap_or_default();
    let dataset_values = args.dataset.as_deref().map(clean_split).unwrap_or_default();

    if campaign_values.is_empty()
        && tag_values.is_empty()
        && pwg_values.is_empty()
        && dataset_values.is_empty()
    {
        return Ok(Json(ApiResponse {
            response: Vec::new(),
            success: false,
            message: "No campaign or tag specified".to_string(),
        }));
    }

    let mut conn = state.db()?;
    let known_tags: BTreeSet<String> = tags::table
        .select(tags::name)
        .load::<String>(&mut conn)?
        .into_iter()
        .collect();

    let mut query = samples::table.into_boxed();
    if let Some(filter) = sample_field_filter(SampleField::Campaign, &campaign_values) {
        query = query.filter(filter);
    }
    if let Some(filter) = sample_field_filter(SampleField::Dataset, &dataset_values) {
        query = query.filter(filter);
    }
    if !tag_values.is_empty() {
        query = query.filter(samples::tags.overlaps_with(tag_values.clone()));
    }
    if !pwg_values.is_empty() {
        query = query.filter(samples::pwgs.overlaps_with(pwg_values.clone()));
    }

    let rows: Vec<Sample> = query.limit(RESULT_LIMIT).load(&mut conn)?;
    let mut enriched: Vec<((String, String, String, String, String), Value)> = Vec::new();
    for sample in rows {
        let short_name = get_short_name(&sample.dataset);
        let chain_tag = get_chain_tag(&sample.chained_request);
        let miniaod_version = get_xaod_version(&sample.miniaod);
        let nanoaod_version = get_xaod_version(&sample.nanoaod);
        let visible_tags: Vec<String> = sample
            .tags
            .iter()
            .filter(|tag| known_tags.contains(*tag))
            .cloned()
            .collect();

        let key = (
            short_name.to_lowercase(),
            sample.dataset.to_lowercase(),
            sample.root.to_lowercase(),
            sample.miniaod.to_lowercase(),
            sample.nanoaod.to_lowercase(),
        );
        let mut value = serde_json::to_value(&sample)?;
        if let Value::Object(map) = &mut value {
            map.insert("short_name".to_string(), json!(short_name));
            map.insert("chain_tag".to_string(), json!(chain_tag));
            map.insert("miniaod_version".to_string(), json!(miniaod_version));
            map.insert("nanoaod_version".to_string(), json!(nanoaod_version));
            map.insert("tags".to_string(), json!(visible_tags));
        }
        enriched.push((key, value));
    }

    enriched.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(ok(enriched.into_iter().map(|(_, value)| value).collect()))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSampleRequest {
    pub prepid: String,
    pub action: String,
    pub value: String,
}

/// Apply add/remove tag or PWG actions to every sample sharing a root
/// request. Invalid values are skipped, failures are logged per item.
pub async fn update_samples(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<Value>,
) -> AppResult<Json<ApiResponse<Vec<Value>>>> {
    user.require_role(Role::User)?;

    let entries: Vec<UpdateSampleRequest> = if payload.is_array() {
        serde_json::from_value(payload).map_err(|err| AppError::bad_request(err.to_string()))?
    } else {
        vec![serde_json::from_value(payload)
            .map_err(|err| AppError::bad_request(err.to_string()))?]
    };

    let mut conn = state.db()?;
    let all_tags: BTreeSet<String> = tags::table
        .select(tags::name)
        .load::<String>(&mut conn)?
        .into_iter()
        .collect();

    let mut updated = Vec::new();
    for entry in &entries {
        if let Err(err) = apply_sample_update(&mut conn, &user, &all_tags, entry, &mut updated) {
            error!(prepid = entry.prepid, error = %err, "sample update failed");
        }
    }

    Ok(ok(updated))
}

fn apply_sample_update(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    all_tags: &BTreeSet<String>,
    entry: &UpdateSampleRequest,
    updated: &mut Vec<Value>,
) -> Result<(), AppError> {
    info!(
        prepid = entry.prepid,
        action = entry.action,
        value = entry.value,
        "updating samples"
    );
    let matching: Vec<Sample> = samples::table
        .filter(samples::root.eq(&entry.prepid))
        .load(conn)?;

    for sample in matching {
        let mut sample_tags = sample.tags.clone();
        let mut sample_pwgs = sample.pwgs.clone();
        let mut sample_notes = sample.notes.clone();
        let applied;
        match entry.action.as_str() {
            "add_tag" | "remove_tag" => {
                if !all_tags.contains(&entry.value) {
                    info!(value = entry.value, "invalid tag");
                    continue;
                }
                if entry.action == "add_tag" {
                    sample_tags.push(entry.value.clone());
                } else if sample_tags.contains(&entry.value) {
                    sample_tags.retain(|tag| tag != &entry.value);
                } else {
                    continue;
                }
                sample_tags = sorted_dedup(sample_tags);
                applied = entry.value.clone();
            }
            "add_pwg" | "remove_pwg" => {
                let pwg = entry.value.to_uppercase();
                if !valid_pwg(&pwg) {
                    info!(value = entry.value, "invalid pwg");
                    continue;
                }
                if entry.action == "add_pwg" {
                    sample_pwgs.push(pwg.clone());
                } else if sample_pwgs.contains(&pwg) {
                    sample_pwgs.retain(|current| current != &pwg);
                } else {
                    continue;
                }
                sample_pwgs = sorted_dedup(sample_pwgs);
                applied = pwg;
            }
            "set_notes" => {
                if sample_notes == entry.value {
                    continue;
                }
                sample_notes = entry.value.clone();
                applied = entry.value.clone();
            }
            _ => {
                warn!(action = entry.action, "invalid action");
                continue;
            }
        }

        // Tags that no longer exist in the tags table are dropped on save.
        sample_tags.retain(|tag| all_tags.contains(tag));
        diesel::update(samples::table.find(sample.id))
            .set((
                samples::tags.eq(&sample_tags),
                samples::pwgs.eq(&sample_pwgs),
                samples::notes.eq(&sample_notes),
            ))
            .execute(conn)?;
        updated.push(json!({
            "id": sample.id,
            "tags": sample_tags,
            "pwgs": sample_pwgs,
            "notes": sample_notes,
        }));
        history::record_action(
            conn,
            &user.username,
            &entry.prepid,
            &entry.action.replace('_', " "),
            &applied,
        )?;
    }

    Ok(())
}
