use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A single authority tag an account may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    User,
    Unverified,
}

impl Role {
    const fn bit(self) -> u8 {
        match self {
            Self::Admin => 0b001,
            Self::User => 0b010,
            Self::Unverified => 0b100,
        }
    }

    const ALL: [Self; 3] = [Self::Admin, Self::User, Self::Unverified];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admin => write!(f, "ADMIN"),
            Self::User => write!(f, "USER"),
            Self::Unverified => write!(f, "UNVERIFIED"),
        }
    }
}

impl FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(Self::Admin),
            "USER" => Ok(Self::User),
            "UNVERIFIED" => Ok(Self::Unverified),
            other => Err(RoleParseError(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown role: {0}")]
pub struct RoleParseError(String);

/// Fixed set of [`Role`] tags, stored as a bit-set.
///
/// Persisted as a comma-joined string column (`"ADMIN,UNVERIFIED"`),
/// serialized over the wire as a list of role names.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RoleSet(u8);

impl RoleSet {
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub fn of(roles: &[Role]) -> Self {
        let mut set = Self::empty();
        for role in roles {
            set.insert(*role);
        }
        set
    }

    #[must_use]
    pub const fn contains(self, role: Role) -> bool {
        self.0 & role.bit() != 0
    }

    pub const fn insert(&mut self, role: Role) {
        self.0 |= role.bit();
    }

    pub const fn remove(&mut self, role: Role) {
        self.0 &= !role.bit();
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Role> {
        Role::ALL.into_iter().filter(move |r| self.contains(*r))
    }
}

impl fmt::Display for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for role in self.iter() {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{role}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for RoleSet {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = Self::empty();
        for part in s.split(',').filter(|p| !p.is_empty()) {
            set.insert(part.parse()?);
        }
        Ok(set)
    }
}

impl Serialize for RoleSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for RoleSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let roles = Vec::<Role>::deserialize(deserializer)?;
        Ok(Self::of(&roles))
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        let mut set = Self::empty();
        for role in iter {
            set.insert(role);
        }
        set
    }
}

/// Domain account record.
///
/// `verification_code` is present exactly while the account carries
/// [`Role::Unverified`]; `reset_password_code` only during an active
/// password-reset flow. Both are single-use opaque capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub roles: RoleSet,
    #[serde(skip_serializing)]
    pub verification_code: Option<String>,
    #[serde(skip_serializing)]
    pub reset_password_code: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Account {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.roles.contains(Role::Admin)
    }

    #[must_use]
    pub fn is_unverified(&self) -> bool {
        self.roles.contains(Role::Unverified)
    }
}
