use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller identity forwarded by the API gateway. The gateway owns token
/// verification; requests reaching the engine carry the resolved identity
/// in `x-actor-id` / `x-actor-role` headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: ActorRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Patient,
    Doctor,
}

impl Actor {
    pub fn new(id: Uuid, role: ActorRole) -> Self {
        Self { id, role }
    }

    pub fn is_patient(&self) -> bool {
        self.role == ActorRole::Patient
    }

    pub fn is_doctor(&self) -> bool {
        self.role == ActorRole::Doctor
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorRole::Patient => write!(f, "patient"),
            ActorRole::Doctor => write!(f, "doctor"),
        }
    }
}

impl FromStr for ActorRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patient" => Ok(ActorRole::Patient),
            "doctor" => Ok(ActorRole::Doctor),
            other => Err(format!("Unknown actor role: {}", other)),
        }
    }
}
