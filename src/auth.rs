use crate::fields::{AccessLevel, Attribute, FieldId, FIELD_COUNT};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Anonymous,
    Authenticated,
}

/// Who a session acts as. Fixed when the session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    role: Role,
    principal: Option<String>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            role: Role::Anonymous,
            principal: None,
        }
    }

    fn authenticated(principal: impl Into<String>) -> Self {
        Self {
            role: Role::Authenticated,
            principal: Some(principal.into()),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.role == Role::Authenticated
    }
}

/// What a client presented when opening its session.
#[derive(Debug, Clone, Copy)]
pub enum Credential<'a> {
    None,
    UserPassword { username: &'a str, password: &'a str },
    /// Credential-less protocols identify sessions by peer address only.
    Peer(IpAddr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyPreset {
    /// Anonymous sessions may write nothing.
    Strict,
    /// Anonymous sessions may toggle the manual override and nothing else.
    Operator,
    /// Anonymous sessions may write every writable field.
    Open,
}

impl core::str::FromStr for PolicyPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(PolicyPreset::Strict),
            "operator" => Ok(PolicyPreset::Operator),
            "open" => Ok(PolicyPreset::Open),
            other => Err(format!("unknown policy preset '{other}'")),
        }
    }
}

/// Per-field, per-role write permissions.
///
/// A matrix entry only matters for `ReadWrite` fields; read-only fields stay
/// unwritable whatever the matrix says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    anonymous: [bool; FIELD_COUNT],
    authenticated: [bool; FIELD_COUNT],
}

impl AccessPolicy {
    pub fn strict() -> Self {
        Self {
            anonymous: [false; FIELD_COUNT],
            authenticated: [true; FIELD_COUNT],
        }
    }

    pub fn operator() -> Self {
        Self::strict().allow(Role::Anonymous, FieldId::ManualOverride)
    }

    pub fn open() -> Self {
        Self {
            anonymous: [true; FIELD_COUNT],
            authenticated: [true; FIELD_COUNT],
        }
    }

    pub fn from_preset(preset: PolicyPreset) -> Self {
        match preset {
            PolicyPreset::Strict => Self::strict(),
            PolicyPreset::Operator => Self::operator(),
            PolicyPreset::Open => Self::open(),
        }
    }

    #[must_use]
    pub fn allow(mut self, role: Role, field: FieldId) -> Self {
        self.row_mut(role)[field.index()] = true;
        self
    }

    #[must_use]
    pub fn deny(mut self, role: Role, field: FieldId) -> Self {
        self.row_mut(role)[field.index()] = false;
        self
    }

    pub fn permits(&self, role: Role, field: FieldId) -> bool {
        let row = match role {
            Role::Anonymous => &self.anonymous,
            Role::Authenticated => &self.authenticated,
        };
        field.descriptor().is_writable() && row[field.index()]
    }

    fn row_mut(&mut self, role: Role) -> &mut [bool; FIELD_COUNT] {
        match role {
            Role::Anonymous => &mut self.anonymous,
            Role::Authenticated => &mut self.authenticated,
        }
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::strict()
    }
}

#[derive(Debug, Clone)]
struct UserEntry {
    username: String,
    password: String,
}

/// Turns credentials into identities and answers "may this role write that field".
#[derive(Debug, Clone, Default)]
pub struct RoleAuthenticator {
    users: Vec<UserEntry>,
    trusted_peers: Vec<IpAddr>,
    policy: AccessPolicy,
}

impl RoleAuthenticator {
    pub fn new(policy: AccessPolicy) -> Self {
        Self {
            users: Vec::new(),
            trusted_peers: Vec::new(),
            policy,
        }
    }

    #[must_use]
    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.push(UserEntry {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    #[must_use]
    pub fn with_trusted_peer(mut self, peer: IpAddr) -> Self {
        self.trusted_peers.push(peer);
        self
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// Never fails: anything short of a valid credential is an anonymous session.
    pub fn authenticate(&self, credential: &Credential<'_>) -> Identity {
        match credential {
            Credential::None => {
                debug!("granting anonymous role");
                Identity::anonymous()
            }
            Credential::UserPassword { username, password } => {
                match self.users.iter().find(|u| u.username == *username) {
                    Some(user) if bool::from(user.password.as_bytes().ct_eq(password.as_bytes())) => {
                        info!(user = %username, "user authenticated");
                        Identity::authenticated(*username)
                    }
                    _ => {
                        warn!(user = %username, "authentication failed, continuing as anonymous");
                        Identity::anonymous()
                    }
                }
            }
            Credential::Peer(addr) => {
                if self.trusted_peers.contains(addr) {
                    debug!(peer = %addr, "trusted peer authenticated");
                    Identity::authenticated(addr.to_string())
                } else {
                    Identity::anonymous()
                }
            }
        }
    }

    pub fn authorize_field_write(&self, field: FieldId, role: Role) -> bool {
        self.policy.permits(role, field)
    }

    /// What an identity may do with a field, before any degradation.
    pub fn user_access_level(&self, identity: &Identity, field: FieldId) -> AccessLevel {
        if self.authorize_field_write(field, identity.role()) {
            AccessLevel::READ_WRITE
        } else {
            AccessLevel::CURRENT_READ
        }
    }

    /// Anonymous sessions always see `UserAccessLevel` as read-only, so writable
    /// fields cannot be discovered through introspection.
    pub fn degrade_read_attribute(
        &self,
        identity: &Identity,
        attribute: Attribute,
        level: AccessLevel,
    ) -> AccessLevel {
        if attribute == Attribute::UserAccessLevel && identity.role() == Role::Anonymous {
            AccessLevel::CURRENT_READ
        } else {
            level
        }
    }
}
