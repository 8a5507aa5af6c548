// src/actor.rs - Acting-user identity attached to every mutating call
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Role of the acting user. The route layer authenticates and resolves the
/// role; the engine only enforces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Clerk,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Admins and managers may open audits and move stock between locations.
    pub fn can_manage_stock(&self) -> bool {
        matches!(self, Role::Admin | Role::Manager)
    }
}

/// Identity attached to every call that writes an activity entry or is
/// subject to an authorization rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: id.into(), role }
    }
}
