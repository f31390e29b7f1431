use anyhow::Result;
use diesel::prelude::*;
use tracing::{debug, info};
use uuid::Uuid;

use crate::mcm::McmApi;
use crate::models::NewUser;
use crate::schema::users;

/// Replaces the local user list with the one from McM. Role strings are
/// stored as McM sends them and interpreted at authentication time.
pub struct UserUpdater<'a> {
    mcm: &'a dyn McmApi,
}

impl<'a> UserUpdater<'a> {
    pub fn new(mcm: &'a dyn McmApi) -> Self {
        Self { mcm }
    }

    pub async fn run(&self, conn: &mut PgConnection) -> Result<()> {
        info!("updating users");
        let rows: Vec<NewUser> = self
            .mcm
            .get_all_users()
            .await?
            .into_iter()
            .map(|user| {
                debug!(username = user.username, role = user.role, "updating user");
                NewUser {
                    id: Uuid::new_v4(),
                    username: user.username,
                    fullname: user.fullname,
                    role: user.role,
                }
            })
            .collect();

        let inserted = conn.transaction::<_, anyhow::Error, _>(|conn| {
            diesel::delete(users::table).execute(conn)?;
            Ok(diesel::insert_into(users::table)
                .values(&rows)
                .execute(conn)?)
        })?;
        info!(count = inserted, "replaced users");
        Ok(())
    }
}
