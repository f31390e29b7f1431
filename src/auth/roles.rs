use std::fmt;
use std::time::Duration;

use diesel::pg::PgConnection;
use diesel::prelude::*;
use moka::sync::Cache;

use crate::schema::users;

/// McM roles, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Anonymous = 0,
    User = 1,
    GeneratorContact = 2,
    GeneratorConvener = 3,
    ProductionManager = 4,
    Administrator = 5,
}

impl Role {
    /// Case insensitive parse of a stored role name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "anonymous" => Some(Self::Anonymous),
            "user" => Some(Self::User),
            "generator_contact" => Some(Self::GeneratorContact),
            "generator_convener" => Some(Self::GeneratorConvener),
            "production_manager" => Some(Self::ProductionManager),
            "administrator" => Some(Self::Administrator),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::User => "user",
            Self::GeneratorContact => "generator_contact",
            Self::GeneratorConvener => "generator_convener",
            Self::ProductionManager => "production_manager",
            Self::Administrator => "administrator",
        }
    }

    pub fn index(self) -> i64 {
        self as i64
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// TTL cache of username to role lookups. Only usernames present in the
/// users table are cached; unknown users stay anonymous and are re-checked
/// on every request.
#[derive(Clone)]
pub struct RoleCache {
    cache: Cache<String, Role>,
}

impl RoleCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder().time_to_live(ttl).build(),
        }
    }

    pub fn role_for(
        &self,
        conn: &mut PgConnection,
        username: &str,
    ) -> Result<Role, diesel::result::Error> {
        if let Some(role) = self.cache.get(username) {
            return Ok(role);
        }

        let stored: Option<String> = users::table
            .filter(users::username.eq(username))
            .select(users::role)
            .first(conn)
            .optional()?;

        match stored {
            Some(raw) => {
                let role = Role::from_name(&raw).unwrap_or(Role::User);
                self.cache.insert(username.to_string(), role);
                Ok(role)
            }
            None => Ok(Role::Anonymous),
        }
    }

}
