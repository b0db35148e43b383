//! Loading collaborators.
//!
//! A [`Loader`] turns a [`LoadRequest`] into an owning [`Reference`]. An empty
//! reference means "not found"; an `Err` means the load itself failed. The
//! controller treats both as "nothing changes".

use std::{
    collections::HashMap,
    hash::Hash,
    marker::PhantomData,
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::{asset::AssetId, context::ExecutionContext, reference::Reference};

/// What to load. Also the controller's cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoadRequest<S> {
    pub id: AssetId,
    /// Target slot, for loaders with per-slot variants. `None` when unslotted.
    pub slot: Option<S>,
    pub level_of_detail: Option<u8>,
}

impl<S> LoadRequest<S> {
    pub fn new(id: impl Into<AssetId>) -> Self {
        Self {
            id: id.into(),
            slot: None,
            level_of_detail: None,
        }
    }

    pub fn in_slot(mut self, slot: S) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn with_level_of_detail(mut self, level_of_detail: Option<u8>) -> Self {
        self.level_of_detail = level_of_detail;
        self
    }
}

#[async_trait]
pub trait Loader<S, A: Send + 'static>: Send + Sync {
    async fn load(&self, request: &LoadRequest<S>) -> anyhow::Result<Reference<A>>;
}

#[async_trait]
impl<S, A, L> Loader<S, A> for Arc<L>
where
    S: Sync,
    A: Send + 'static,
    L: Loader<S, A> + ?Sized,
{
    async fn load(&self, request: &LoadRequest<S>) -> anyhow::Result<Reference<A>> {
        (**self).load(request).await
    }
}

/// Collapses concurrent identical requests into one inner load.
///
/// Every caller gets its own owner token over the shared result. Entries
/// leave the in-flight table as soon as the load settles; a failed load is
/// retried by the next waiter.
pub struct CoalescingLoader<S, A: Send + 'static, L> {
    inner: L,
    in_flight: Mutex<HashMap<LoadRequest<S>, Arc<OnceCell<Reference<A>>>>>,
}

impl<S, A: Send + 'static, L> CoalescingLoader<S, A, L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    /// Requests currently being loaded.
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl<S, A, L> Loader<S, A> for CoalescingLoader<S, A, L>
where
    S: Clone + Eq + Hash + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    L: Loader<S, A>,
{
    async fn load(&self, request: &LoadRequest<S>) -> anyhow::Result<Reference<A>> {
        let cell = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            in_flight.entry(request.clone()).or_default().clone()
        };

        if cell.initialized() {
            debug!(id = %request.id, "Joined settled load");
        }
        let result = cell
            .get_or_try_init(|| self.inner.load(request))
            .await
            .map(Reference::duplicate);

        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if in_flight
                .get(request)
                .is_some_and(|current| Arc::ptr_eq(current, &cell))
            {
                in_flight.remove(request);
            }
        }
        result
    }
}

/// Source of raw records that loaders turn into assets.
#[async_trait]
pub trait DataRepository<D>: Send + Sync {
    async fn get_ids(&self) -> anyhow::Result<Vec<AssetId>>;
    async fn get_by_id(&self, id: &AssetId) -> anyhow::Result<Option<D>>;
}

/// Repository over records held in memory.
#[derive(Debug, Clone)]
pub struct InMemoryRepository<D> {
    records: HashMap<AssetId, D>,
}

impl<D> Default for InMemoryRepository<D> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
        }
    }
}

impl<D> InMemoryRepository<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<AssetId>, record: D) -> Option<D> {
        self.records.insert(id.into(), record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<D> FromIterator<(AssetId, D)> for InMemoryRepository<D> {
    fn from_iter<I: IntoIterator<Item = (AssetId, D)>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

#[async_trait]
impl<D: Clone + Send + Sync> DataRepository<D> for InMemoryRepository<D> {
    async fn get_ids(&self) -> anyhow::Result<Vec<AssetId>> {
        let mut ids: Vec<AssetId> = self.records.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_by_id(&self, id: &AssetId) -> anyhow::Result<Option<D>> {
        Ok(self.records.get(id).cloned())
    }
}

/// Adapts a [`DataRepository`] into a [`Loader`].
///
/// Records are built into assets with `build` and wrapped in callback
/// references from `ctx`.
pub struct RepositoryLoader<D, R, F> {
    ctx: Arc<ExecutionContext>,
    repository: R,
    build: F,
    _record: PhantomData<fn() -> D>,
}

impl<D, R, F> RepositoryLoader<D, R, F> {
    pub fn new(ctx: Arc<ExecutionContext>, repository: R, build: F) -> Self {
        Self {
            ctx,
            repository,
            build,
            _record: PhantomData,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }
}

#[async_trait]
impl<S, A, D, R, F> Loader<S, A> for RepositoryLoader<D, R, F>
where
    S: Sync,
    A: Clone + Send + Sync + 'static,
    D: Send + 'static,
    R: DataRepository<D>,
    F: Fn(D) -> anyhow::Result<A> + Send + Sync,
{
    async fn load(&self, request: &LoadRequest<S>) -> anyhow::Result<Reference<A>> {
        let record = self
            .repository
            .get_by_id(&request.id)
            .await
            .with_context(|| format!("reading record {}", request.id))?;
        let Some(record) = record else {
            return Ok(Reference::empty());
        };

        let asset = (self.build)(record).with_context(|| format!("building asset {}", request.id))?;
        let id = request.id.clone();
        Ok(Reference::from_callback(&self.ctx, asset, move |_| {
            debug!(%id, "Released repository asset");
        }))
    }
}
