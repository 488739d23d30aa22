//! Caller identity and role checks
//!
//! A `Caller` is produced by the session layer for every authenticated
//! request and passed explicitly into each service call.

use serde::{Deserialize, Serialize};

/// Platform role. The sole authorization input for privileged transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    StoreOwner,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::StoreOwner => "store_owner",
            Role::SuperAdmin => "super_admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Role::Customer),
            "store_owner" => Ok(Role::StoreOwner),
            "super_admin" => Ok(Role::SuperAdmin),
            other => Err(format!("Unknown role '{}'", other)),
        }
    }
}

/// Access check failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("Authentication required")]
    Unauthenticated,
    #[error("Access denied")]
    Unauthorized,
}

/// Resolved identity of the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Caller {
    pub uid: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
}

impl Caller {
    /// Privileged operations need an active super admin
    pub fn require_super_admin(&self) -> Result<(), AccessError> {
        if self.role == Role::SuperAdmin && self.is_active {
            Ok(())
        } else {
            tracing::warn!(
                uid = %self.uid,
                role = %self.role,
                is_active = self.is_active,
                "Unauthorized privileged access attempt"
            );
            Err(AccessError::Unauthorized)
        }
    }

    pub fn is_super_admin(&self) -> bool {
        self.role == Role::SuperAdmin && self.is_active
    }
}

/// Caller identity plus request metadata recorded on audit entries
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub caller: Caller,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new(caller: Caller) -> Self {
        Self {
            caller,
            ip_address: None,
            user_agent: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(role: Role, is_active: bool) -> Caller {
        Caller {
            uid: "u1".to_string(),
            email: "u1@example.com".to_string(),
            role,
            is_active,
        }
    }

    #[test]
    fn test_only_active_super_admin_passes() {
        assert!(caller(Role::SuperAdmin, true).require_super_admin().is_ok());
        assert_eq!(
            caller(Role::SuperAdmin, false).require_super_admin(),
            Err(AccessError::Unauthorized)
        );
        assert_eq!(
            caller(Role::StoreOwner, true).require_super_admin(),
            Err(AccessError::Unauthorized)
        );
        assert_eq!(
            caller(Role::Customer, true).require_super_admin(),
            Err(AccessError::Unauthorized)
        );
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("super_admin".parse::<Role>(), Ok(Role::SuperAdmin));
        assert!("admin".parse::<Role>().is_err());
    }
}
