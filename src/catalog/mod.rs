//! Role catalog: which guild roles matter and how each one maps onto a
//! metadata field.
//!
//! A catalog is loaded once at startup and is read-only afterwards. Two shapes
//! are supported and may be mixed:
//!
//! - **per-role boolean**: every entry owns an independent `0`/`1` field;
//! - **combined bitfield**: entries sharing a key OR their flag into one
//!   integer field (conventionally `role_flags`).
//!
//! Every rule that would make the encoding ambiguous is checked in
//! [`RoleCatalog::new`], so a misconfigured catalog never reaches runtime.

pub mod schema;

pub use schema::{MetadataField, MetadataType};

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::types::RoleId;

/// The platform accepts at most this many metadata records per application.
pub const MAX_METADATA_FIELDS: usize = 5;

/// Maximum length of a metadata key.
pub const MAX_KEY_LEN: usize = 50;

/// Highest usable flag. Metadata integers are signed 64-bit on the platform,
/// so the sum of all flags up to this one still fits.
pub const MAX_FLAG: u64 = 1 << 62;

/// Catalog validation errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog defines no roles")]
    Empty,

    #[error("Invalid field key {key:?}: expected 1-50 chars of a-z, 0-9 or _")]
    InvalidKey { key: String },

    #[error("Field key {key:?} is used by more than one boolean role")]
    DuplicateKey { key: String },

    #[error("Field key {key:?} mixes boolean and bit flag roles")]
    MixedEncoding { key: String },

    #[error("Role {role_id} uses bit_flag encoding but has no flag")]
    MissingFlag { role_id: RoleId },

    #[error("Role {role_id} sets a flag but uses boolean encoding")]
    UnexpectedFlag { role_id: RoleId },

    #[error("Flag {flag} for field {key:?} is not a power of two")]
    FlagNotPowerOfTwo { key: String, flag: u64 },

    #[error("Flag {flag} for field {key:?} is above the highest usable flag {max}")]
    FlagOutOfRange { key: String, flag: u64, max: u64 },

    #[error("Flag {flag} is assigned twice in field {key:?}")]
    FlagCollision { key: String, flag: u64 },

    #[error("Role {role_id} appears twice in field {key:?}")]
    DuplicateRole { key: String, role_id: RoleId },

    #[error("Label given for {key:?}, which is not a bitfield")]
    UnknownFieldLabel { key: String },

    #[error("Bitfield {key:?} cannot use boolean type {metadata_type:?}")]
    InvalidFieldType {
        key: String,
        metadata_type: MetadataType,
    },

    #[error("Catalog derives {count} metadata fields, the platform allows {max}")]
    TooManyFields { count: usize, max: usize },

    #[error("Invalid catalog file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to read catalog {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// How a role contributes to its field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// The field is `1` when the role is held, `0` otherwise.
    Boolean,
    /// The flag is OR-ed into the field when the role is held.
    BitFlag(u64),
}

/// One tracked role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleEntry {
    pub role_id: RoleId,
    /// Human readable role name, used as the schema name of boolean fields
    pub name: String,
    /// Metadata field this role writes to
    pub key: String,
    pub description: Option<String>,
    pub encoding: Encoding,
}

impl RoleEntry {
    pub fn boolean(
        role_id: impl Into<RoleId>,
        name: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            role_id: role_id.into(),
            name: name.into(),
            key: key.into(),
            description: None,
            encoding: Encoding::Boolean,
        }
    }

    pub fn bit_flag(
        role_id: impl Into<RoleId>,
        name: impl Into<String>,
        key: impl Into<String>,
        flag: u64,
    ) -> Self {
        Self {
            role_id: role_id.into(),
            name: name.into(),
            key: key.into(),
            description: None,
            encoding: Encoding::BitFlag(flag),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Schema label for a shared bitfield.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldLabel {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub metadata_type: Option<MetadataType>,
}

/// Validated, immutable role catalog.
#[derive(Debug, Clone)]
pub struct RoleCatalog {
    platform_name: Option<String>,
    entries: Vec<RoleEntry>,
    schema: Vec<MetadataField>,
}

impl RoleCatalog {
    /// Validate entries and derive the metadata schema.
    pub fn new(entries: Vec<RoleEntry>) -> Result<Self, CatalogError> {
        Self::build(entries, BTreeMap::new())
    }

    /// Like [`RoleCatalog::new`], with labels for bitfield fields.
    pub fn with_labels(
        entries: Vec<RoleEntry>,
        labels: BTreeMap<String, FieldLabel>,
    ) -> Result<Self, CatalogError> {
        Self::build(entries, labels)
    }

    /// Set the platform name sent alongside every metadata update.
    pub fn with_platform_name(mut self, platform_name: impl Into<String>) -> Self {
        self.platform_name = Some(platform_name.into());
        self
    }

    /// Parse a catalog from TOML.
    pub fn from_toml_str(source: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(source)?;

        let entries = file
            .roles
            .into_iter()
            .map(RoleFile::into_entry)
            .collect::<Result<Vec<_>, _>>()?;

        let catalog = Self::build(entries, file.fields)?;
        Ok(match file.platform_name {
            Some(name) => catalog.with_platform_name(name),
            None => catalog,
        })
    }

    /// Read and parse a catalog file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Tracked roles in declaration order.
    pub fn entries(&self) -> &[RoleEntry] {
        &self.entries
    }

    /// Schema records in the order they are registered.
    pub fn metadata_schema(&self) -> &[MetadataField] {
        &self.schema
    }

    pub fn platform_name(&self) -> Option<&str> {
        self.platform_name.as_deref()
    }

    pub fn field(&self, key: &str) -> Option<&MetadataField> {
        self.schema.iter().find(|f| f.key == key)
    }

    pub fn field_keys(&self) -> impl Iterator<Item = &str> {
        self.schema.iter().map(|f| f.key.as_str())
    }

    fn build(
        entries: Vec<RoleEntry>,
        mut labels: BTreeMap<String, FieldLabel>,
    ) -> Result<Self, CatalogError> {
        if entries.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut plans: Vec<FieldPlan> = Vec::new();
        let mut by_key: HashMap<&str, usize> = HashMap::new();

        for (index, entry) in entries.iter().enumerate() {
            validate_key(&entry.key)?;

            match (entry.encoding, by_key.get(entry.key.as_str()).copied()) {
                (Encoding::Boolean, None) => {
                    by_key.insert(&entry.key, plans.len());
                    plans.push(FieldPlan::Boolean { entry: index });
                }
                (Encoding::Boolean, Some(existing)) => {
                    return Err(match plans[existing] {
                        FieldPlan::Boolean { .. } => CatalogError::DuplicateKey {
                            key: entry.key.clone(),
                        },
                        FieldPlan::BitFlag { .. } => CatalogError::MixedEncoding {
                            key: entry.key.clone(),
                        },
                    });
                }
                (Encoding::BitFlag(flag), existing) => {
                    if !flag.is_power_of_two() {
                        return Err(CatalogError::FlagNotPowerOfTwo {
                            key: entry.key.clone(),
                            flag,
                        });
                    }
                    if flag > MAX_FLAG {
                        return Err(CatalogError::FlagOutOfRange {
                            key: entry.key.clone(),
                            flag,
                            max: MAX_FLAG,
                        });
                    }

                    let slot = match existing {
                        Some(existing) => existing,
                        None => {
                            by_key.insert(&entry.key, plans.len());
                            plans.push(FieldPlan::BitFlag {
                                key: entry.key.clone(),
                                flags: HashSet::new(),
                                roles: HashSet::new(),
                            });
                            plans.len() - 1
                        }
                    };

                    match &mut plans[slot] {
                        FieldPlan::Boolean { .. } => {
                            return Err(CatalogError::MixedEncoding {
                                key: entry.key.clone(),
                            });
                        }
                        FieldPlan::BitFlag { flags, roles, .. } => {
                            if !flags.insert(flag) {
                                return Err(CatalogError::FlagCollision {
                                    key: entry.key.clone(),
                                    flag,
                                });
                            }
                            if !roles.insert(entry.role_id.clone()) {
                                return Err(CatalogError::DuplicateRole {
                                    key: entry.key.clone(),
                                    role_id: entry.role_id.clone(),
                                });
                            }
                        }
                    }
                }
            }
        }

        let is_bitfield = |key: &str| {
            matches!(
                by_key.get(key).map(|&i| &plans[i]),
                Some(FieldPlan::BitFlag { .. })
            )
        };
        if let Some(key) = labels.keys().find(|key| !is_bitfield(key)) {
            return Err(CatalogError::UnknownFieldLabel { key: key.clone() });
        }

        let mut schema = Vec::with_capacity(plans.len());
        for plan in &plans {
            match plan {
                FieldPlan::Boolean { entry } => {
                    let entry = &entries[*entry];
                    schema.push(MetadataField {
                        key: entry.key.clone(),
                        name: entry.name.clone(),
                        description: entry
                            .description
                            .clone()
                            .unwrap_or_else(|| format!("Has the {} role in the server", entry.name)),
                        metadata_type: MetadataType::BooleanEqual,
                    });
                }
                FieldPlan::BitFlag { key, .. } => {
                    let label = labels.remove(key).unwrap_or_default();
                    let metadata_type = label
                        .metadata_type
                        .unwrap_or(MetadataType::IntegerLessThanOrEqual);
                    if metadata_type.is_boolean() {
                        return Err(CatalogError::InvalidFieldType {
                            key: key.clone(),
                            metadata_type,
                        });
                    }
                    schema.push(MetadataField {
                        key: key.clone(),
                        name: label.name.unwrap_or_else(|| key.clone()),
                        description: label
                            .description
                            .unwrap_or_else(|| "Bitfield of roles held in the server".to_string()),
                        metadata_type,
                    });
                }
            }
        }

        if schema.len() > MAX_METADATA_FIELDS {
            return Err(CatalogError::TooManyFields {
                count: schema.len(),
                max: MAX_METADATA_FIELDS,
            });
        }

        debug!(
            roles = entries.len(),
            fields = schema.len(),
            "Role catalog validated"
        );

        Ok(Self {
            platform_name: None,
            entries,
            schema,
        })
    }
}

enum FieldPlan {
    Boolean {
        entry: usize,
    },
    BitFlag {
        key: String,
        flags: HashSet<u64>,
        roles: HashSet<RoleId>,
    },
}

fn validate_key(key: &str) -> Result<(), CatalogError> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');

    if valid {
        Ok(())
    } else {
        Err(CatalogError::InvalidKey {
            key: key.to_string(),
        })
    }
}

// ==================== File format ====================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    platform_name: Option<String>,
    #[serde(default)]
    roles: Vec<RoleFile>,
    #[serde(default)]
    fields: BTreeMap<String, FieldLabel>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RoleFile {
    role_id: RoleId,
    name: String,
    key: String,
    encoding: Option<EncodingKind>,
    flag: Option<u64>,
    description: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum EncodingKind {
    Boolean,
    BitFlag,
}

impl RoleFile {
    fn into_entry(self) -> Result<RoleEntry, CatalogError> {
        let encoding = match (self.encoding, self.flag) {
            (None | Some(EncodingKind::Boolean), None) => Encoding::Boolean,
            (None | Some(EncodingKind::BitFlag), Some(flag)) => Encoding::BitFlag(flag),
            (Some(EncodingKind::Boolean), Some(_)) => {
                return Err(CatalogError::UnexpectedFlag {
                    role_id: self.role_id,
                })
            }
            (Some(EncodingKind::BitFlag), None) => {
                return Err(CatalogError::MissingFlag {
                    role_id: self.role_id,
                })
            }
        };

        Ok(RoleEntry {
            role_id: self.role_id,
            name: self.name,
            key: self.key,
            description: self.description,
            encoding,
        })
    }
}
