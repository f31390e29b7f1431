use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::auth::{roles::Role, AuthenticatedUser};
use crate::error::{AppError, AppResult};
use crate::history;
use crate::models::NewCampaign;
use crate::response::{ok, ApiResponse};
use crate::schema::{campaigns, samples};
use crate::state::AppState;
use crate::utils::valid_campaign_name;

use diesel::prelude::*;

#[derive(Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
}

pub async fn create_campaign(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateCampaignRequest>,
) -> AppResult<Json<ApiResponse<Value>>> {
    user.require_role(Role::ProductionManager)?;

    let name = payload.name.trim().to_string();
    info!(name, "creating campaign");
    if !valid_campaign_name(&name) {
        return Err(AppError::bad_request(format!("Name \"{name}\" is not valid")));
    }

    let mut conn = state.db()?;
    let new_campaign = NewCampaign {
        id: Uuid::new_v4(),
        name: name.clone(),
    };
    match diesel::insert_into(campaigns::table)
        .values(&new_campaign)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            return Err(AppError::conflict(format!(
                "Campaign \"{name}\" already exists"
            )));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    history::record_action(&mut conn, &user.username, "", "create campaign", &name)?;
    Ok(ok(json!({ "name": name })))
}

pub async fn get_campaigns(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Vec<String>>>> {
    let mut conn = state.db()?;
    let names: Vec<String> = campaigns::table
        .select(campaigns::name)
        .order(campaigns::name.asc())
        .load(&mut conn)?;
    Ok(ok(names))
}

pub async fn delete_campaign(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(campaign_name): Path<String>,
) -> AppResult<Json<ApiResponse<Value>>> {
    user.require_role(Role::ProductionManager)?;
    info!(name = campaign_name, "deleting campaign");

    let mut conn = state.db()?;
    conn.transaction::<_, AppError, _>(|conn| {
        let deleted =
            diesel::delete(campaigns::table.filter(campaigns::name.eq(&campaign_name)))
                .execute(conn)?;
        if deleted == 0 {
            return Err(AppError::not_found(format!(
                "Campaign \"{campaign_name}\" does not exist"
            )));
        }
        // No foreign key between samples and campaigns, cascade by hand.
        diesel::delete(samples::table.filter(samples::campaign.eq(&campaign_name)))
            .execute(conn)?;
        Ok(())
    })?;

    history::record_action(&mut conn, &user.username, "", "delete campaign", &campaign_name)?;
    Ok(ok(Value::Null))
}
