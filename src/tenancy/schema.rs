use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Name of the shared schema holding the control-plane tables
pub const PUBLIC_SCHEMA: &str = "public";

/// Prefixes that collide with PostgreSQL system schemas
pub const FORBIDDEN_PREFIXES: [&str; 3] = ["pg_", "postgres", "information_schema"];

const MIN_LEN: usize = 5;
const MAX_LEN: usize = 63;

/// Reason a candidate schema name was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaRejection {
    #[error("length must be between 5 and 63 characters (got {0})")]
    Length(usize),

    #[error("must start with a lowercase letter")]
    LeadingCharacter,

    #[error("contains invalid character {0:?}")]
    InvalidCharacter(char),

    #[error("uses reserved prefix '{0}'")]
    ReservedPrefix(&'static str),
}

/// Validate a candidate schema identifier.
///
/// Accepts exactly the names matching `^[a-z][a-z0-9_]{4,62}$` that do not start
/// with a reserved system prefix. Must run before a name ever reaches an SQL
/// identifier position.
pub fn validate(candidate: &str) -> Result<(), SchemaRejection> {
    let len = candidate.len();
    if !(MIN_LEN..=MAX_LEN).contains(&len) {
        return Err(SchemaRejection::Length(len));
    }

    let mut chars = candidate.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return Err(SchemaRejection::LeadingCharacter),
    }

    if let Some(bad) = chars.find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')) {
        return Err(SchemaRejection::InvalidCharacter(bad));
    }

    if let Some(prefix) = FORBIDDEN_PREFIXES.iter().find(|p| candidate.starts_with(**p)) {
        return Err(SchemaRejection::ReservedPrefix(*prefix));
    }

    Ok(())
}

/// A validated schema identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaName(String);

impl SchemaName {
    /// Validate and wrap an untrusted schema name
    pub fn parse(candidate: &str) -> Result<Self, SchemaRejection> {
        validate(candidate)?;
        Ok(Self(candidate.to_string()))
    }

    /// The shared public schema
    pub fn public() -> Self {
        Self(PUBLIC_SCHEMA.to_string())
    }

    pub fn is_public(&self) -> bool {
        self.0 == PUBLIC_SCHEMA
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted identifier for interpolation into SQL
    pub fn quoted(&self) -> String {
        quote_identifier(&self.0)
    }
}

/// Quote SQL identifier to prevent injection
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SchemaName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for SchemaName {
    type Err = SchemaRejection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SchemaName {
    type Error = SchemaRejection;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate(&value)?;
        Ok(Self(value))
    }
}

impl From<SchemaName> for String {
    fn from(schema: SchemaName) -> Self {
        schema.0
    }
}
