//! The versioned snapshot envelope.
//!
//! A `Snapshot` is the full state of a pod at a point in time: every domain
//! record grouped by entity type, plus the deletion tombstones that keep a
//! merge from resurrecting deleted records. The JSON field names are
//! camelCase because that is the wire format existing pods already use.

use crate::ids::{EntityType, RecordId, TenantId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// The format version this build writes. Older versions load read-only and
/// are upgraded in memory before any merge logic runs.
pub const CURRENT_FORMAT_VERSION: FormatVersion = FormatVersion::V3;

/// Snapshot format version.
///
/// | Version | Adds | Merge support |
/// |---|---|---|
/// | 1.0 | `data` only | read-only legacy load |
/// | 2.0 | `tenantId`, `tenantName` | read-only legacy load |
/// | 3.0 | `deletions` tombstone log | full merge |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FormatVersion {
    V1,
    V2,
    V3,
}

impl FormatVersion {
    /// Returns the on-disk version string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1 => "1.0",
            Self::V2 => "2.0",
            Self::V3 => "3.0",
        }
    }

    /// Parses an on-disk version string. Unknown strings (including future
    /// versions) are rejected outright, never partially parsed.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "1.0" => Ok(Self::V1),
            "2.0" => Ok(Self::V2),
            "3.0" => Ok(Self::V3),
            other => Err(Error::UnsupportedVersion(other.to_string())),
        }
    }
}

impl TryFrom<String> for FormatVersion {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<FormatVersion> for String {
    fn from(v: FormatVersion) -> Self {
        v.as_str().to_string()
    }
}

impl std::fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A domain record as the engine sees it: a stable `id`, the authoritative
/// `updatedAt`, and an opaque bag of domain fields it never interprets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Stable unique identifier within the record's entity type.
    pub id: RecordId,
    /// Strictly advances on every mutation; the merge authority.
    pub updated_at: DateTime<Utc>,
    /// Domain fields, passed through untouched.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Creates a record with the given id and timestamp and no domain fields.
    #[must_use]
    pub fn new(id: RecordId, updated_at: DateTime<Utc>) -> Self {
        Self {
            id,
            updated_at,
            fields: Map::new(),
        }
    }

    /// Adds a domain field (builder style).
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

/// An authoritative deletion marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    /// Id of the deleted record.
    pub id: RecordId,
    /// Entity type the record belonged to.
    pub entity_type: EntityType,
    /// When the deletion happened; compared against record `updatedAt`
    /// during merge.
    pub deleted_at: DateTime<Utc>,
}

impl Tombstone {
    /// Creates a tombstone.
    #[must_use]
    pub fn new(id: RecordId, entity_type: EntityType, deleted_at: DateTime<Utc>) -> Self {
        Self {
            id,
            entity_type,
            deleted_at,
        }
    }
}

/// The full state of a pod at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Strictly gates merge; see [`FormatVersion`].
    pub format_version: FormatVersion,
    /// Owning tenant. Empty on v1 snapshots, which predate tenants.
    #[serde(default)]
    pub tenant_id: TenantId,
    /// Human-readable tenant name, for display only.
    #[serde(default)]
    pub tenant_name: String,
    /// Whether the pod this snapshot was read from / will be written to is
    /// encrypted at rest.
    #[serde(default)]
    pub encrypted: bool,
    /// When this snapshot was built.
    pub exported_at: DateTime<Utc>,
    /// Records grouped by entity type. BTreeMap keeps serialization
    /// deterministic.
    pub data: BTreeMap<EntityType, Vec<Record>>,
    /// Deletion tombstones. Absent before v3; defaulted to empty on load.
    #[serde(default)]
    pub deletions: Vec<Tombstone>,
}

impl Snapshot {
    /// Creates an empty snapshot at the current format version.
    #[must_use]
    pub fn new(tenant_id: TenantId, tenant_name: impl Into<String>, encrypted: bool) -> Self {
        Self {
            format_version: CURRENT_FORMAT_VERSION,
            tenant_id,
            tenant_name: tenant_name.into(),
            encrypted,
            exported_at: Utc::now(),
            data: BTreeMap::new(),
            deletions: Vec::new(),
        }
    }

    /// Returns the records for an entity type (empty slice if absent).
    #[must_use]
    pub fn records(&self, entity_type: &EntityType) -> &[Record] {
        self.data.get(entity_type).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Replaces the records for an entity type.
    pub fn set_records(&mut self, entity_type: EntityType, records: Vec<Record>) {
        self.data.insert(entity_type, records);
    }

    /// Total record count across all entity types.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.data.values().map(Vec::len).sum()
    }

    /// Upgrades a legacy snapshot in memory to the current format version.
    /// v1/v2 snapshots gain an empty `deletions` log (serde already
    /// defaulted it); the version marker moves forward so merge logic only
    /// ever sees v3 shapes. Writes always emit v3.
    #[must_use]
    pub fn upgraded(mut self) -> Self {
        self.format_version = CURRENT_FORMAT_VERSION;
        self
    }

    /// Serializes the snapshot to its JSON wire form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a snapshot from its JSON wire form, gating on the format
    /// version before any other field is interpreted.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        gate_format_version(&value)?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Rejects unknown format versions before the rest of the document is
/// parsed. A document without a version field is not a pod at all.
pub(crate) fn gate_format_version(value: &Value) -> Result<FormatVersion> {
    match value.get("formatVersion").and_then(Value::as_str) {
        Some(s) => FormatVersion::parse(s),
        None => Err(Error::UnsupportedVersion("missing".to_string())),
    }
}
