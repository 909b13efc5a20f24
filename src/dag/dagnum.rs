//! DAG numbers.
//!
//! Every logical history in a repository lives in its own numbered DAG. The
//! number encodes what kind of snapshot its changesets carry: a file tree, or
//! structured records.

use crate::error::{DagError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

const ID_MASK: u64 = 0xFFFF_FFFF;
const TREE_FLAG: u64 = 1 << 32;
const DB_FLAG: u64 = 1 << 33;
const KNOWN_BITS: u64 = ID_MASK | TREE_FLAG | DB_FLAG;

/// What a DAG's changesets describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DagKind {
    /// Changesets carry a file-tree root.
    Tree,
    /// Changesets carry structured-record delta/template roots.
    Db,
}

/// Identifier of one logical history within a repository.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DagNum(u64);

impl DagNum {
    /// The version-controlled file tree.
    pub const VERSION_CONTROL: DagNum = DagNum(TREE_FLAG | 1);
    /// Work item records.
    pub const WORK_ITEMS: DagNum = DagNum(DB_FLAG | 2);
    /// User records.
    pub const USERS: DagNum = DagNum(DB_FLAG | 3);

    /// Builds a dag number from its kind and logical id.
    pub fn new(kind: DagKind, id: u32) -> Result<Self> {
        let flag = match kind {
            DagKind::Tree => TREE_FLAG,
            DagKind::Db => DB_FLAG,
        };
        let num = DagNum(flag | u64::from(id));
        num.validate()?;
        Ok(num)
    }

    /// Wraps a raw value without checking it. Use [`DagNum::validate`] before trusting it.
    pub const fn from_raw(raw: u64) -> Self {
        DagNum(raw)
    }

    /// Returns the raw encoded value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns the logical id part.
    pub fn id(&self) -> u32 {
        (self.0 & ID_MASK) as u32
    }

    /// Checks that this number is structurally well-formed.
    pub fn validate(&self) -> Result<()> {
        if self.0 & !KNOWN_BITS != 0 {
            return Err(DagError::invalid_argument(format!(
                "dag number {:#x} has unknown flag bits",
                self.0
            )));
        }
        if self.id() == 0 {
            return Err(DagError::invalid_argument(format!(
                "dag number {:#x} has no logical id",
                self.0
            )));
        }
        match (self.0 & TREE_FLAG != 0, self.0 & DB_FLAG != 0) {
            (true, false) | (false, true) => Ok(()),
            _ => Err(DagError::invalid_argument(format!(
                "dag number {:#x} must be exactly one of tree or db",
                self.0
            ))),
        }
    }

    /// Returns the kind, or an error for a malformed number.
    pub fn kind(&self) -> Result<DagKind> {
        self.validate()?;
        if self.0 & TREE_FLAG != 0 {
            Ok(DagKind::Tree)
        } else {
            Ok(DagKind::Db)
        }
    }

    /// Returns true for well-formed tree DAG numbers.
    pub fn is_tree(&self) -> bool {
        matches!(self.kind(), Ok(DagKind::Tree))
    }

    /// Returns true for well-formed db DAG numbers.
    pub fn is_db(&self) -> bool {
        matches!(self.kind(), Ok(DagKind::Db))
    }
}

impl fmt::Debug for DagNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DagNum({:#x})", self.0)
    }
}

impl fmt::Display for DagNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_known_numbers_are_valid() {
        assert!(DagNum::VERSION_CONTROL.is_tree());
        assert!(DagNum::WORK_ITEMS.is_db());
        assert!(DagNum::USERS.is_db());
    }

    #[test]
    fn test_new_roundtrips_kind_and_id() {
        let num = DagNum::new(DagKind::Db, 42).unwrap();
        assert_eq!(num.kind().unwrap(), DagKind::Db);
        assert_eq!(num.id(), 42);
        assert_eq!(DagNum::from_raw(num.as_u64()), num);
    }

    #[test]
    fn test_malformed_numbers_rejected() {
        assert!(DagNum::from_raw(0).validate().is_err());
        assert!(DagNum::from_raw(7).validate().is_err(), "no kind flag");
        assert!(DagNum::from_raw(TREE_FLAG).validate().is_err(), "no id");
        assert!(DagNum::from_raw(TREE_FLAG | DB_FLAG | 1).validate().is_err());
        assert!(DagNum::from_raw((1 << 40) | TREE_FLAG | 1).validate().is_err());
        assert!(DagNum::new(DagKind::Tree, 0).is_err());
    }
}
