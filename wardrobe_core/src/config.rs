//! Configuration.
//!
//! Controller and pool settings load from JSON (file IO left to the host).

use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Equip controller behavior switches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EquipFlags: u32 {
        const NONE = 0;
        const AUTO_RELEASE_UNEQUIPPED = 1 << 0; // Release on unequip, not on rebuild
        const RESOLVE_ON_UNEQUIP = 1 << 1;      // Re-run validation/resolution after unequip
        const CACHE_LOADS = 1 << 2;             // Keep loaded handles for reuse
    }
}

impl Default for EquipFlags {
    fn default() -> Self {
        Self::AUTO_RELEASE_UNEQUIPPED | Self::RESOLVE_ON_UNEQUIP | Self::CACHE_LOADS
    }
}

/// Equip controller settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipConfig {
    /// Release unequipped assets immediately. When false, releases wait for
    /// the next rebuild notification.
    #[serde(default = "default_true")]
    pub auto_release_unequipped: bool,
    /// Fill emptied slots with defaults after an unequip.
    #[serde(default = "default_true")]
    pub resolve_on_unequip: bool,
    /// Cache loaded handles by request.
    #[serde(default = "default_true")]
    pub cache_loads: bool,
    /// Level of detail forwarded to loaders.
    #[serde(default)]
    pub level_of_detail: Option<u8>,
}

fn default_true() -> bool {
    true
}

impl Default for EquipConfig {
    fn default() -> Self {
        Self {
            auto_release_unequipped: true,
            resolve_on_unequip: true,
            cache_loads: true,
            level_of_detail: None,
        }
    }
}

impl EquipConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn flags(&self) -> EquipFlags {
        let mut flags = EquipFlags::NONE;
        flags.set(
            EquipFlags::AUTO_RELEASE_UNEQUIPPED,
            self.auto_release_unequipped,
        );
        flags.set(EquipFlags::RESOLVE_ON_UNEQUIP, self.resolve_on_unequip);
        flags.set(EquipFlags::CACHE_LOADS, self.cache_loads);
        flags
    }
}

/// Resource pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Empty slots created up front for each value type.
    #[serde(default = "default_prewarm")]
    pub prewarm: usize,
}

fn default_prewarm() -> usize {
    16
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            prewarm: default_prewarm(),
        }
    }
}
