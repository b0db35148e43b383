//! Release capabilities.
//!
//! A resource is "a thing that can be released exactly once". The release
//! behavior is one of four variants; all of them are consumed by
//! [`Resource::release`], so a second release cannot be expressed.

use crate::{
    dispatch::MainThreadDispatcher,
    reference::{ErasedReference, Reference},
};

/// Resource variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Release invokes a stored closure with the value.
    Callback,
    /// Release invokes the value's own [`Dispose`].
    Disposable,
    /// Release runs on the owner thread of a [`MainThreadDispatcher`].
    HostObject,
    /// Release releases an owned reference, then its dependencies.
    Dependent,
}

/// Disposal capability of a value.
pub trait Dispose {
    fn dispose(&mut self);
}

pub(crate) type ReleaseFn<T> = Box<dyn FnOnce(T) + Send>;

pub(crate) enum Release<T: Send + 'static> {
    Invoke(ReleaseFn<T>),
    OnHost {
        on_release: ReleaseFn<T>,
        dispatcher: MainThreadDispatcher,
    },
    Dependent {
        owned: Reference<T>,
        dependencies: Vec<Box<dyn ErasedReference>>,
    },
}

/// A pooled release record: the master value plus how to release it.
pub(crate) struct Resource<T: Send + 'static> {
    kind: ResourceKind,
    value: T,
    release: Release<T>,
}

impl<T: Send + 'static> Resource<T> {
    pub(crate) fn callback(value: T, on_release: impl FnOnce(T) + Send + 'static) -> Self {
        Self {
            kind: ResourceKind::Callback,
            value,
            release: Release::Invoke(Box::new(on_release)),
        }
    }

    pub(crate) fn disposable(value: T) -> Self
    where
        T: Dispose,
    {
        Self {
            kind: ResourceKind::Disposable,
            value,
            release: Release::Invoke(Box::new(|mut value: T| value.dispose())),
        }
    }

    pub(crate) fn host_object(
        value: T,
        on_release: impl FnOnce(T) + Send + 'static,
        dispatcher: MainThreadDispatcher,
    ) -> Self {
        Self {
            kind: ResourceKind::HostObject,
            value,
            release: Release::OnHost {
                on_release: Box::new(on_release),
                dispatcher,
            },
        }
    }

    pub(crate) fn dependent(
        value: T,
        owned: Reference<T>,
        dependencies: Vec<Box<dyn ErasedReference>>,
    ) -> Self {
        Self {
            kind: ResourceKind::Dependent,
            value,
            release: Release::Dependent {
                owned,
                dependencies,
            },
        }
    }

    pub(crate) fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub(crate) fn value(&self) -> &T {
        &self.value
    }

    /// Runs the release behavior. Must be called without holding the pool lock.
    pub(crate) fn release(self) {
        let Resource { value, release, .. } = self;
        match release {
            Release::Invoke(on_release) => on_release(value),
            Release::OnHost {
                on_release,
                dispatcher,
            } => dispatcher.run_or_defer(move || on_release(value)),
            Release::Dependent {
                mut owned,
                mut dependencies,
            } => {
                drop(value);
                owned.release();
                for dependency in dependencies.iter_mut() {
                    dependency.release();
                }
            }
        }
    }
}
