//! Blob Key Scheme
//!
//! Objects live at `type/id/filename`; snapshots use the same scheme with
//! `backups` as the type and the tenant id as the owner.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Structured object key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobKey {
    /// Object type (e.g. "attachments", "backups")
    pub kind: String,
    /// Owning entity, usually a tenant id
    pub owner: String,
    /// File name within the owner
    pub name: String,
}

impl BlobKey {
    /// Build a key, validating every segment
    pub fn new(
        kind: impl Into<String>,
        owner: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self> {
        let key = Self {
            kind: kind.into(),
            owner: owner.into(),
            name: name.into(),
        };
        for (label, segment) in [("type", &key.kind), ("id", &key.owner), ("filename", &key.name)] {
            validate_segment(label, segment)?;
        }
        Ok(key)
    }

    /// Prefix covering every object of `kind` owned by `owner`
    pub fn owner_prefix(kind: &str, owner: &str) -> String {
        format!("{}/{}/", kind, owner)
    }

    pub fn to_storage_key(&self) -> String {
        format!("{}/{}/{}", self.kind, self.owner, self.name)
    }
}

fn validate_segment(label: &str, segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::InvalidBlobKey(format!("{} segment is empty", label)));
    }
    if segment.contains('/') {
        return Err(Error::InvalidBlobKey(format!(
            "{} segment contains '/': {}",
            label, segment
        )));
    }
    if segment == "." || segment == ".." {
        return Err(Error::InvalidBlobKey(format!(
            "{} segment is a relative path component",
            label
        )));
    }
    Ok(())
}

impl FromStr for BlobKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [kind, owner, name] => BlobKey::new(*kind, *owner, *name),
            _ => Err(Error::InvalidBlobKey(format!(
                "expected type/id/filename, got {}",
                s
            ))),
        }
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_storage_key())
    }
}
