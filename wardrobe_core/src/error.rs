//! Equip rejection reasons.

use std::fmt;

use crate::asset::AssetId;

/// Why an equip, unequip, or resolve request did not change anything.
///
/// These are reported, never thrown: the controller logs them and returns
/// them inside an [`EquipOutcome`](crate::controller::EquipOutcome).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EquipError {
    /// The slot is not part of the controller's valid-slot set.
    InvalidSlot(String),
    /// The loader found nothing for this id.
    NotFound(AssetId),
    /// The loader failed.
    LoadFailed { id: AssetId, message: String },
    /// The controller was already disposed.
    Disposed,
}

impl fmt::Display for EquipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EquipError::InvalidSlot(slot) => write!(f, "invalid slot {}", slot),
            EquipError::NotFound(id) => write!(f, "asset {} not found", id),
            EquipError::LoadFailed { id, message } => {
                write!(f, "failed to load asset {}: {}", id, message)
            }
            EquipError::Disposed => write!(f, "controller disposed"),
        }
    }
}

impl std::error::Error for EquipError {}
