use axum::extract::{Query, State};
use axum::Json;
use diesel::prelude::*;
use serde::Deserialize;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::response::{ok, ApiResponse};
use crate::routes::samples::{like_pattern, sample_field_filter, SampleField, SampleFilter};
use crate::schema::{campaigns, samples, tags};
use crate::state::AppState;

const SEARCH_LIMIT: i64 = 100;

const SAMPLE_FIELDS: [SampleField; 5] = [
    SampleField::Dataset,
    SampleField::Root,
    SampleField::Miniaod,
    SampleField::Nanoaod,
    SampleField::ChainedRequest,
];

#[derive(Debug, Deserialize)]
pub struct SearchArgs {
    pub db_name: String,
    pub q: String,
}

/// Name lookup across one collection. Samples match on the dataset name or
/// any of the prepids in the chain, `*` acts as a wildcard everywhere.
pub async fn search(
    State(state): State<AppState>,
    Query(args): Query<SearchArgs>,
) -> AppResult<Json<ApiResponse<Vec<String>>>> {
    let term = args.q.trim().to_string();
    if term.is_empty() {
        return Err(AppError::bad_request("No search term specified"));
    }

    info!(db_name = args.db_name, q = term, "searching");
    let mut conn = state.db()?;
    let names: Vec<String> = match args.db_name.as_str() {
        "campaigns" => {
            let mut query = campaigns::table.select(campaigns::name).into_boxed();
            query = if term.contains('*') {
                query.filter(campaigns::name.ilike(like_pattern(&term)))
            } else {
                query.filter(campaigns::name.eq(term.clone()))
            };
            query
                .order(campaigns::name.asc())
                .limit(SEARCH_LIMIT)
                .load(&mut conn)?
        }
        "tags" => {
            let mut query = tags::table.select(tags::name).into_boxed();
            query = if term.contains('*') {
                query.filter(tags::name.ilike(like_pattern(&term)))
            } else {
                query.filter(tags::name.eq(term.clone()))
            };
            query
                .order(tags::name.asc())
                .limit(SEARCH_LIMIT)
                .load(&mut conn)?
        }
        "samples" => {
            let values = vec![term.clone()];
            let filter = SAMPLE_FIELDS
                .iter()
                .filter_map(|&field| sample_field_filter(field, &values))
                .reduce(|prev, next| Box::new(prev.or(next)) as SampleFilter);
            let mut query = samples::table
                .select(samples::dataset)
                .distinct()
                .into_boxed();
            if let Some(filter) = filter {
                query = query.filter(filter);
            }
            query
                .order(samples::dataset.asc())
                .limit(SEARCH_LIMIT)
                .load(&mut conn)?
        }
        other => {
            return Err(AppError::bad_request(format!(
                "Unknown database \"{other}\""
            )));
        }
    };

    Ok(ok(names))
}
