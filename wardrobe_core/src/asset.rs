//! Asset identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an equippable item, e.g. `shirt-1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        AssetId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetId {
    fn from(id: &str) -> Self {
        AssetId::new(id)
    }
}

impl From<String> for AssetId {
    fn from(id: String) -> Self {
        AssetId(id)
    }
}

/// A fully loaded domain object that can be equipped.
///
/// Two assets are the same member of an equipped set when their ids match,
/// regardless of any other field.
pub trait Asset: Clone + Send + Sync + 'static {
    fn id(&self) -> &AssetId;
}
