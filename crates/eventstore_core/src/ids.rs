use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

use crate::{EventStoreError, EventStoreResult};

/// Time-ordered identifier of one migration run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MigrationId(pub Ulid);

impl MigrationId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn parse(value: &str) -> EventStoreResult<Self> {
        let ulid = Ulid::from_string(value).map_err(|err| {
            EventStoreError::validation(format!("invalid migration id '{value}': {err}"))
        })?;
        Ok(Self(ulid))
    }

    /// Milliseconds since the unix epoch encoded in the identifier.
    pub fn timestamp_ms(self) -> u64 {
        self.0.timestamp_ms()
    }
}

impl Default for MigrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MigrationId {
    type Err = EventStoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl Serialize for MigrationId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for MigrationId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        MigrationId::parse(&value).map_err(serde::de::Error::custom)
    }
}
