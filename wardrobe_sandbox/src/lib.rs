//! `wardrobe_sandbox`
//!
//! A small host for the equip engine:
//! - Outfit feature: slotted garments whose materials own host textures
//! - Tattoo feature: unslotted, one tattoo per placement
//! - Command session driving both controllers

pub mod outfit;
pub mod session;

pub use session::{SandboxConfig, WardrobeSession};
