//! `wardrobe_core`
//!
//! Ownership and equip primitives shared by every customizable avatar feature
//! (outfits, materials, blend shapes, makeup, tattoos, skin colors).
//!
//! Design goals:
//! - Every loaded resource is released exactly once, after its last owner.
//! - Hot load/unload paths recycle wrapper storage instead of allocating.
//! - One generic equip state machine, customized through composition and rules.
//! - No `unsafe`, no process-wide mutable state.

pub mod asset;
pub mod cache;
pub mod config;
pub mod context;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod loader;
pub mod pool;
pub mod reference;
pub mod resource;
pub mod rules;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::asset::*;
    pub use crate::cache::HandleCache;
    pub use crate::config::*;
    pub use crate::context::ExecutionContext;
    pub use crate::controller::*;
    pub use crate::error::EquipError;
    pub use crate::event::*;
    pub use crate::loader::*;
    pub use crate::reference::{ErasedReference, Reference};
    pub use crate::resource::{Dispose, ResourceKind};
    pub use crate::rules::*;
}
