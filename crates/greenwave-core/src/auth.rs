use std::collections::{BTreeMap, HashMap};

use greenwave_ir::types::HolderId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing or unknown credentials")]
    Unauthenticated,

    #[error("Not permitted: {0}")]
    Unauthorized(String),
}

/// Who a request is acting as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Principal {
    /// An emergency vehicle; may only act on its own claims.
    Vehicle(HolderId),
    /// A traffic operator; may create lockdowns and override signals.
    Operator,
}

impl Principal {
    pub fn require_operator(&self) -> Result<(), AuthError> {
        match self {
            Principal::Operator => Ok(()),
            Principal::Vehicle(id) => Err(AuthError::Unauthorized(format!(
                "vehicle '{id}' cannot perform operator actions"
            ))),
        }
    }

    /// Vehicles may act for themselves; operators for anyone.
    pub fn require_vehicle(&self, vehicle_id: &str) -> Result<(), AuthError> {
        match self {
            Principal::Operator => Ok(()),
            Principal::Vehicle(id) if id == vehicle_id => Ok(()),
            Principal::Vehicle(id) => Err(AuthError::Unauthorized(format!(
                "vehicle '{id}' cannot act for '{vehicle_id}'"
            ))),
        }
    }
}

pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: Option<&str>) -> Result<Principal, AuthError>;
}

/// Fixed token table, typically from `auth.tokens` in the config.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, Principal>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: BTreeMap<String, Principal>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>, principal: Principal) -> Self {
        self.tokens.insert(token.into(), principal);
        self
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn authenticate(&self, token: Option<&str>) -> Result<Principal, AuthError> {
        token
            .filter(|t| !t.is_empty())
            .and_then(|t| self.tokens.get(t))
            .cloned()
            .ok_or(AuthError::Unauthenticated)
    }
}
