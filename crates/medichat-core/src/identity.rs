use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Which side of the care relationship a user is on. Determines how a
/// direct conversation stores its participant pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Professional,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Patient => write!(f, "patient"),
            Self::Professional => write!(f, "professional"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patient" => Ok(Self::Patient),
            "professional" => Ok(Self::Professional),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Authenticated (user id, role) pair. Derived once per connection from a
/// verified token and immutable for the connection's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: impl Into<UserId>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Patient).unwrap(), "\"patient\"");
        assert_eq!(
            serde_json::to_string(&Role::Professional).unwrap(),
            "\"professional\""
        );
    }

    #[test]
    fn role_from_str() {
        assert_eq!("professional".parse::<Role>().unwrap(), Role::Professional);
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn identity_carries_id_and_role() {
        let id = Identity::new(5, Role::Patient);
        assert_eq!(id.user_id.as_i64(), 5);
        assert_eq!(id.role, Role::Patient);
    }
}
