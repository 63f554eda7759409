// 👤 Employee Entity + Actor
//
// The guard takes the acting user as an explicit parameter instead of reading
// it from request state. Role checks happen above the guard; the actor is
// recorded on every audit event.

use serde::{Deserialize, Serialize};

// ============================================================================
// ROLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Back-office administrator (manages registers, employees)
    Administrator,

    /// Regular operator working a till
    Seller,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Administrator => "administrator",
            Role::Seller => "seller",
        }
    }

    pub fn parse(value: &str) -> Option<Role> {
        match value.trim().to_lowercase().as_str() {
            "administrator" | "admin" | "administrador" => Some(Role::Administrator),
            "seller" | "vendedor" => Some(Role::Seller),
            _ => None,
        }
    }
}

// ============================================================================
// EMPLOYEE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
}

impl Employee {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn as_actor(&self) -> Actor {
        Actor {
            id: format!("employee:{}", self.id),
            role: self.role,
        }
    }
}

// ============================================================================
// ACTOR
// ============================================================================

/// Who is performing a guarded operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Actor {
            id: id.into(),
            role,
        }
    }

    /// Actor used by the CLI and maintenance jobs
    pub fn system() -> Self {
        Actor::new("system", Role::Administrator)
    }
}
