//! Metadata schema records registered with the platform.

use serde::{Deserialize, Serialize};

/// Comparison type tag of a role connection metadata record.
///
/// Discriminants are fixed by the platform API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum MetadataType {
    IntegerLessThanOrEqual = 1,
    IntegerGreaterThanOrEqual = 2,
    IntegerEqual = 3,
    IntegerNotEqual = 4,
    DatetimeLessThanOrEqual = 5,
    DatetimeGreaterThanOrEqual = 6,
    BooleanEqual = 7,
    BooleanNotEqual = 8,
}

impl MetadataType {
    pub fn is_boolean(self) -> bool {
        matches!(self, MetadataType::BooleanEqual | MetadataType::BooleanNotEqual)
    }
}

impl From<MetadataType> for u8 {
    fn from(value: MetadataType) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for MetadataType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => MetadataType::IntegerLessThanOrEqual,
            2 => MetadataType::IntegerGreaterThanOrEqual,
            3 => MetadataType::IntegerEqual,
            4 => MetadataType::IntegerNotEqual,
            5 => MetadataType::DatetimeLessThanOrEqual,
            6 => MetadataType::DatetimeGreaterThanOrEqual,
            7 => MetadataType::BooleanEqual,
            8 => MetadataType::BooleanNotEqual,
            other => return Err(format!("unknown metadata type {}", other)),
        })
    }
}

/// One record of the application's role connection metadata schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataField {
    pub key: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub metadata_type: MetadataType,
}
