use serde::{Deserialize, Serialize};
use std::fmt;

/// What a role may do with tickets. The matrix lives in [`Role::capabilities`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Read every ticket regardless of requester.
    ViewAll,
    /// Read only tickets the caller requested.
    ViewOwn,
    /// Change every mutable ticket field.
    EditAll,
    /// Change only `title` and `description`.
    EditOwnFieldsOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Agent,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::User, Role::Agent, Role::Admin];

    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            Self::User => &[Capability::ViewOwn, Capability::EditOwnFieldsOnly],
            Self::Agent | Self::Admin => &[Capability::ViewAll, Capability::EditAll],
        }
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::Admin => "admin",
        }
    }

    /// Lenient parse used for stored rows and self-service registration.
    pub fn parse_or_user(value: &str) -> Self {
        value.parse().unwrap_or(Self::User)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: i64,
    pub role: Role,
}

impl Principal {
    pub fn new(id: i64, role: Role) -> Self {
        Self { id, role }
    }

    pub fn user(id: i64) -> Self {
        Self::new(id, Role::User)
    }

    pub fn agent(id: i64) -> Self {
        Self::new(id, Role::Agent)
    }

    pub fn admin(id: i64) -> Self {
        Self::new(id, Role::Admin)
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.role.has_capability(capability)
    }
}

/// Outcome of resolving an inbound credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Identity {
    #[default]
    Anonymous,
    Authenticated(Principal),
}

impl Identity {
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Self::Anonymous => None,
            Self::Authenticated(principal) => Some(principal),
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        self.principal().map(|p| p.id)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }
}

impl From<Principal> for Identity {
    fn from(principal: Principal) -> Self {
        Self::Authenticated(principal)
    }
}
