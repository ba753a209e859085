//! The two small tag enums that drive bulk dispatch across the parameter tree.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Filter applied by bulk tree operations (`streamline`, `assign_values`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityMode {
    Active,
    Inactive,
    /// Matches leaves regardless of their `adaptions_active` flag.
    All,
    /// Matches leaves that are both active and modifiable — the filter
    /// bulk operations use to skip parameters pinned by configuration even
    /// though adaption is nominally on for them.
    ActiveIfModifiable,
}

impl fmt::Display for ActivityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActivityMode::Active => "active",
            ActivityMode::Inactive => "inactive",
            ActivityMode::All => "all",
            ActivityMode::ActiveIfModifiable => "active_if_modifiable",
        };
        f.write_str(s)
    }
}

impl FromStr for ActivityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ActivityMode::Active),
            "inactive" => Ok(ActivityMode::Inactive),
            "all" => Ok(ActivityMode::All),
            "active_if_modifiable" => Ok(ActivityMode::ActiveIfModifiable),
            other => Err(format!("unknown activity mode {other:?}")),
        }
    }
}

impl ActivityMode {
    pub fn matches(self, adaptions_active: bool, modifiable: bool) -> bool {
        match self {
            ActivityMode::Active => adaptions_active,
            ActivityMode::Inactive => !adaptions_active,
            ActivityMode::All => true,
            ActivityMode::ActiveIfModifiable => adaptions_active && modifiable,
        }
    }
}

/// The four leaf value kinds the parameter model supports.
///
/// Arithmetic/boolean bulk operations are trap methods over this enum: an
/// operation invoked against a kind it does not support returns
/// [`crate::error::MetaError::UnsupportedKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Double,
    Float,
    Int32,
    Bool,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::Double => "double",
            ValueKind::Float => "float",
            ValueKind::Int32 => "int32",
            ValueKind::Bool => "bool",
        };
        f.write_str(s)
    }
}

impl ValueKind {
    /// Arithmetic bulk ops (`multiply_by`, `add`, `subtract`, ...) are
    /// defined for every kind except `bool`.
    pub fn supports_arithmetic(self) -> bool {
        !matches!(self, ValueKind::Bool)
    }
}
