//! Port entries: identity, properties and search vocabulary.
//!
//! An entry is one recorded port instance, identified by the row id SQLite
//! assigns to it. Callers address entries through [`Entry`] values, which pair
//! that id with the session handle minted for it.

pub mod store;

use crate::handles::Handle;
use crate::{RegistryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Storage identity of an entry (the `ports` row id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub i64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live entry exposed to the caller: its storage id and session handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    id: EntryId,
    handle: Handle,
}

impl Entry {
    pub(crate) fn new(id: EntryId, handle: Handle) -> Self {
        Self { id, handle }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

/// The closed set of entry properties callers may read, write or search on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryProperty {
    Name,
    Portfile,
    Url,
    Location,
    Epoch,
    Version,
    Revision,
    Variants,
    Date,
    State,
}

impl EntryProperty {
    pub const ALL: [EntryProperty; 10] = [
        EntryProperty::Name,
        EntryProperty::Portfile,
        EntryProperty::Url,
        EntryProperty::Location,
        EntryProperty::Epoch,
        EntryProperty::Version,
        EntryProperty::Revision,
        EntryProperty::Variants,
        EntryProperty::Date,
        EntryProperty::State,
    ];

    /// Property name, which is also the `ports` column name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryProperty::Name => "name",
            EntryProperty::Portfile => "portfile",
            EntryProperty::Url => "url",
            EntryProperty::Location => "location",
            EntryProperty::Epoch => "epoch",
            EntryProperty::Version => "version",
            EntryProperty::Revision => "revision",
            EntryProperty::Variants => "variants",
            EntryProperty::Date => "date",
            EntryProperty::State => "state",
        }
    }

    /// Properties whose values must be non-negative integers.
    pub fn is_numeric(&self) -> bool {
        matches!(self, EntryProperty::Epoch | EntryProperty::Revision)
    }

    /// Parse every key of a predicate list, failing on the first unknown key.
    pub fn parse_all<'a>(predicates: &[(&str, &'a str)]) -> Result<Vec<(EntryProperty, &'a str)>> {
        predicates
            .iter()
            .map(|(key, value)| -> Result<(EntryProperty, &'a str)> {
                Ok((key.parse()?, *value))
            })
            .collect()
    }
}

impl FromStr for EntryProperty {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        EntryProperty::ALL
            .iter()
            .copied()
            .find(|prop| prop.as_str() == s)
            .ok_or_else(|| RegistryError::InvalidKey { key: s.to_string() })
    }
}

impl fmt::Display for EntryProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Installation state of an entry.
///
/// The registry does not police transitions; any caller-defined string is
/// kept as [`EntryState::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntryState {
    Imported,
    Installed,
    Active,
    Other(String),
}

impl EntryState {
    pub fn as_str(&self) -> &str {
        match self {
            EntryState::Imported => "imported",
            EntryState::Installed => "installed",
            EntryState::Active => "active",
            EntryState::Other(s) => s,
        }
    }
}

impl From<&str> for EntryState {
    fn from(s: &str) -> Self {
        match s {
            "imported" => EntryState::Imported,
            "installed" => EntryState::Installed,
            "active" => EntryState::Active,
            other => EntryState::Other(other.to_string()),
        }
    }
}

impl From<String> for EntryState {
    fn from(s: String) -> Self {
        EntryState::from(s.as_str())
    }
}

impl From<EntryState> for String {
    fn from(state: EntryState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How search predicate values are matched against property values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchStrategy {
    /// Equality under the column's collation (version-aware for
    /// `version` and `revision`).
    #[default]
    Exact,
    /// SQLite `GLOB` pattern (case-sensitive, `*` and `?` wildcards).
    Glob,
    /// Regular expression, evaluated with the `regex` crate.
    Regexp,
}

impl MatchStrategy {
    pub(crate) fn operator(&self) -> &'static str {
        match self {
            MatchStrategy::Exact => "=",
            MatchStrategy::Glob => "GLOB",
            MatchStrategy::Regexp => "REGEXP",
        }
    }
}

/// Snapshot of every property of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRecord {
    pub id: EntryId,
    pub name: String,
    pub portfile: Option<String>,
    pub url: Option<String>,
    pub location: Option<String>,
    pub epoch: u64,
    pub version: String,
    pub revision: u64,
    pub variants: String,
    pub state: Option<EntryState>,
    pub date: Option<String>,
}

impl EntryRecord {
    /// The `date` property read as a unix timestamp, if it is one.
    pub fn date_time(&self) -> Option<DateTime<Utc>> {
        let secs = self.date.as_deref()?.trim().parse::<i64>().ok()?;
        DateTime::from_timestamp(secs, 0)
    }

    /// Whether the entry is installed, active or not.
    pub fn is_installed(&self) -> bool {
        matches!(
            self.state,
            Some(EntryState::Installed) | Some(EntryState::Active)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_round_trips_through_name() {
        for prop in EntryProperty::ALL {
            assert_eq!(prop.as_str().parse::<EntryProperty>().unwrap(), prop);
        }
    }

    #[test]
    fn test_unknown_property_is_invalid_key() {
        let err = "rowid".parse::<EntryProperty>().unwrap_err();
        assert!(matches!(err, RegistryError::InvalidKey { key } if key == "rowid"));
        assert!("Name".parse::<EntryProperty>().is_err());
    }

    #[test]
    fn test_parse_all_stops_at_first_bad_key() {
        let parsed = EntryProperty::parse_all(&[("name", "vim"), ("state", "active")]).unwrap();
        assert_eq!(
            parsed,
            vec![(EntryProperty::Name, "vim"), (EntryProperty::State, "active")]
        );

        let err = EntryProperty::parse_all(&[("name", "vim"), ("colour", "red")]).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidKey { key } if key == "colour"));
    }

    #[test]
    fn test_state_strings() {
        assert_eq!(EntryState::from("active"), EntryState::Active);
        assert_eq!(
            EntryState::from("staged"),
            EntryState::Other("staged".to_string())
        );
        assert_eq!(EntryState::Installed.to_string(), "installed");
    }

    #[test]
    fn test_record_date_time() {
        let record = EntryRecord {
            id: EntryId(1),
            name: "zlib".into(),
            portfile: None,
            url: None,
            location: None,
            epoch: 0,
            version: "1.2.3".into(),
            revision: 1,
            variants: String::new(),
            state: Some(EntryState::Active),
            date: Some("1700000000".into()),
        };
        assert_eq!(record.date_time().unwrap().timestamp(), 1_700_000_000);
        assert!(record.is_installed());

        let undated = EntryRecord {
            date: Some("yesterday".into()),
            state: Some(EntryState::Imported),
            ..record
        };
        assert!(undated.date_time().is_none());
        assert!(!undated.is_installed());
    }
}
