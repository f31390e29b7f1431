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
use crate::models::NewTag;
use crate::response::{ok, ApiResponse};
use crate::schema::{samples, tags};
use crate::state::AppState;
use crate::utils::valid_tag_name;

use diesel::prelude::*;

#[derive(Deserialize)]
pub struct CreateTagRequest {
    pub name: String,
}

pub async fn create_tag(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateTagRequest>,
) -> AppResult<Json<ApiResponse<Value>>> {
    user.require_role(Role::User)?;

    let name = payload.name.trim().to_string();
    info!(name, "creating tag");
    if !valid_tag_name(&name) {
        return Err(AppError::bad_request(format!("Name \"{name}\" is not valid")));
    }

    let mut conn = state.db()?;
    let new_tag = NewTag {
        id: Uuid::new_v4(),
        name: name.clone(),
    };
    match diesel::insert_into(tags::table)
        .values(&new_tag)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            return Err(AppError::conflict(format!("Tag \"{name}\" already exists")));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    history::record_action(&mut conn, &user.username, "", "create tag", &name)?;
    Ok(ok(json!({ "name": name })))
}

pub async fn get_tags(State(state): State<AppState>) -> AppResult<Json<ApiResponse<Vec<String>>>> {
    let mut conn = state.db()?;
    let names: Vec<String> = tags::table
        .select(tags::name)
        .order(tags::name.asc())
        .load(&mut conn)?;
    Ok(ok(names))
}

pub async fn delete_tag(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(tag): Path<String>,
) -> AppResult<Json<ApiResponse<Value>>> {
    user.require_role(Role::ProductionManager)?;
    info!(name = tag, "deleting tag");

    let mut conn = state.db()?;
    conn.transaction::<_, AppError, _>(|conn| {
        let deleted = diesel::delete(tags::table.filter(tags::name.eq(&tag))).execute(conn)?;
        if deleted == 0 {
            return Err(AppError::not_found(format!("Tag \"{tag}\" does not exist")));
        }
        // Strip the tag from every sample that carries it.
        let tagged: Vec<(Uuid, Vec<String>)> = samples::table
            .filter(samples::tags.contains(vec![tag.clone()]))
            .select((samples::id, samples::tags))
            .load(conn)?;
        for (id, mut sample_tags) in tagged {
            sample_tags.retain(|name| name != &tag);
            diesel::update(samples::table.find(id))
                .set(samples::tags.eq(sample_tags))
                .execute(conn)?;
        }
        Ok(())
    })?;

    history::record_action(&mut conn, &user.username, "", "delete tag", &tag)?;
    Ok(ok(Value::Null))
}
