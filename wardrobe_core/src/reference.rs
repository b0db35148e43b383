//! Owning handles over pooled resources.
//!
//! A [`Reference`] is one owner token. Tokens are never implicitly shared:
//! [`Reference::duplicate`] mints a new token over the same resource, which
//! bumps the owner count kept in the pool slot. The release behavior runs once,
//! when the last token is released (or immediately on [`Reference::revoke`]).
//!
//! Releasing a token twice, or releasing a default token, does nothing.

use std::fmt;

use crate::{
    context::ExecutionContext,
    pool::{ResourcePool, SlotKey},
    resource::{Dispose, Resource, ResourceKind},
};

/// Type-erased reference, used for heterogeneous dependency lists.
pub trait ErasedReference: Send {
    fn is_alive(&self) -> bool;
    fn release(&mut self);
}

struct Lease<T: Send + 'static> {
    pool: ResourcePool<T>,
    key: SlotKey,
}

/// An owner token over a resource of type `T`.
pub struct Reference<T: Send + 'static> {
    value: Option<T>,
    lease: Option<Lease<T>>,
}

impl<T: Send + 'static> Default for Reference<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Send + 'static> Reference<T> {
    /// A reference that is never alive.
    pub fn empty() -> Self {
        Self {
            value: None,
            lease: None,
        }
    }

    /// True until this token is released or the resource is revoked.
    pub fn is_alive(&self) -> bool {
        match (&self.value, &self.lease) {
            (Some(_), Some(lease)) => lease.pool.is_current(lease.key),
            _ => false,
        }
    }

    /// The value, or `None` once dead.
    pub fn value(&self) -> Option<&T> {
        if self.is_alive() {
            self.value.as_ref()
        } else {
            None
        }
    }

    /// Releases this token. Idempotent.
    pub fn release(&mut self) {
        self.value = None;
        if let Some(lease) = self.lease.take() {
            lease.pool.release(lease.key);
        }
    }

    /// Releases the underlying resource now, invalidating every token over it.
    pub fn revoke(&mut self) -> bool {
        self.value = None;
        match self.lease.take() {
            Some(lease) => lease.pool.revoke(lease.key),
            None => false,
        }
    }

    /// Number of live tokens over the underlying resource.
    pub fn owners(&self) -> u32 {
        self.lease
            .as_ref()
            .map_or(0, |lease| lease.pool.owners(lease.key))
    }

    pub fn kind(&self) -> Option<ResourceKind> {
        self.lease
            .as_ref()
            .and_then(|lease| lease.pool.kind(lease.key))
    }

    /// Whether both tokens are over the same live resource.
    pub fn shares_resource_with(&self, other: &Self) -> bool {
        match (&self.lease, &other.lease) {
            (Some(a), Some(b)) => a.key == b.key && a.pool.same_pool(&b.pool) && self.is_alive(),
            _ => false,
        }
    }

    /// Boxes this token as a dependency of a [`Reference::from_dependent`].
    pub fn into_dependency(self) -> Box<dyn ErasedReference> {
        Box::new(self)
    }
}

impl<T: Clone + Send + 'static> Reference<T> {
    fn install(pool: ResourcePool<T>, resource: Resource<T>) -> Self {
        let value = resource.value().clone();
        let key = pool.acquire(resource);
        Self {
            value: Some(value),
            lease: Some(Lease { pool, key }),
        }
    }

    /// Release invokes `on_release` with the value.
    pub fn from_callback(
        ctx: &ExecutionContext,
        value: T,
        on_release: impl FnOnce(T) + Send + 'static,
    ) -> Self {
        Self::install(ctx.pool::<T>(), Resource::callback(value, on_release))
    }

    /// Release invokes the value's [`Dispose`].
    pub fn from_disposable(ctx: &ExecutionContext, value: T) -> Self
    where
        T: Dispose,
    {
        Self::install(ctx.pool::<T>(), Resource::disposable(value))
    }

    /// Release invokes `on_release` on the context's owner thread.
    pub fn from_host_object(
        ctx: &ExecutionContext,
        value: T,
        on_release: impl FnOnce(T) + Send + 'static,
    ) -> Self {
        Self::install(
            ctx.pool::<T>(),
            Resource::host_object(value, on_release, ctx.dispatcher().clone()),
        )
    }

    /// Bundles `owned` with the references it keeps alive.
    ///
    /// Releasing the result releases `owned` first, then each dependency in
    /// order. A dead `owned` yields an empty reference and releases the
    /// dependencies right away.
    pub fn from_dependent(
        ctx: &ExecutionContext,
        owned: Reference<T>,
        mut dependencies: Vec<Box<dyn ErasedReference>>,
    ) -> Self {
        let Some(value) = owned.value().cloned() else {
            for dependency in dependencies.iter_mut() {
                dependency.release();
            }
            return Self::empty();
        };
        Self::install(
            ctx.pool::<T>(),
            Resource::dependent(value, owned, dependencies),
        )
    }

    /// Mints another owner token over the same resource.
    ///
    /// Returns an empty reference when this one is dead.
    pub fn duplicate(&self) -> Self {
        match (&self.value, &self.lease) {
            (Some(value), Some(lease)) if lease.pool.retain(lease.key) => Self {
                value: Some(value.clone()),
                lease: Some(Lease {
                    pool: lease.pool.clone(),
                    key: lease.key,
                }),
            },
            _ => Self::empty(),
        }
    }
}

impl<T: Send + 'static> Drop for Reference<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: Send + 'static> ErasedReference for Reference<T> {
    fn is_alive(&self) -> bool {
        Reference::is_alive(self)
    }

    fn release(&mut self) {
        Reference::release(self);
    }
}

impl<T: fmt::Debug + Send + 'static> fmt::Debug for Reference<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("alive", &self.is_alive())
            .field("value", &self.value())
            .field("owners", &self.owners())
            .finish()
    }
}
