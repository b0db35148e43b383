//! Shared collaborators for the integration tests under `tests/`.

use std::{
    collections::HashMap,
    fmt::{Debug, Display},
    hash::Hash,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use async_trait::async_trait;
use wardrobe_core::prelude::*;

/// Installs a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: AssetId,
    pub category: Option<String>,
}

impl Asset for Item {
    fn id(&self) -> &AssetId {
        &self.id
    }
}

pub fn category(item: &Item) -> Option<String> {
    item.category.clone()
}

/// Catalog-backed loader that counts invocations and releases.
pub struct Shelf {
    ctx: Arc<ExecutionContext>,
    catalog: HashMap<AssetId, Option<String>>,
    loads: AtomicUsize,
    released: Arc<Mutex<Vec<String>>>,
}

impl Shelf {
    pub fn new(ctx: Arc<ExecutionContext>, items: &[(&str, Option<&str>)]) -> Self {
        Self {
            ctx,
            catalog: items
                .iter()
                .map(|(id, c)| (AssetId::new(*id), c.map(str::to_string)))
                .collect(),
            loads: AtomicUsize::new(0),
            released: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Ids whose release behavior ran, in order.
    pub fn released(&self) -> Vec<String> {
        self.released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl<S: Sync> Loader<S, Item> for Shelf {
    async fn load(&self, request: &LoadRequest<S>) -> anyhow::Result<Reference<Item>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if request.id.as_str() == "broken" {
            anyhow::bail!("checksum mismatch");
        }
        let Some(category) = self.catalog.get(&request.id) else {
            return Ok(Reference::empty());
        };

        let released = self.released.clone();
        Ok(Reference::from_callback(
            &self.ctx,
            Item {
                id: request.id.clone(),
                category: category.clone(),
            },
            move |item| {
                released
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(item.id.to_string());
            },
        ))
    }
}

/// Feature over a shared, coalescing [`Shelf`].
pub struct Feature<S: Send + Sync + 'static> {
    pub loader: Arc<CoalescingLoader<S, Item, Arc<Shelf>>>,
    pub valid: Option<Vec<S>>,
    /// `+id@slot` / `-id@slot` side effects, in order.
    pub log: Vec<String>,
}

impl<S: Send + Sync + 'static> Feature<S> {
    pub fn new(loader: Arc<CoalescingLoader<S, Item, Arc<Shelf>>>) -> Self {
        Self {
            loader,
            valid: None,
            log: Vec::new(),
        }
    }

    pub fn with_slots(mut self, slots: Vec<S>) -> Self {
        self.valid = Some(slots);
        self
    }
}

#[async_trait]
impl<S> EquipCapability for Feature<S>
where
    S: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static,
{
    type Slot = S;
    type Asset = Item;

    async fn load(&self, request: &LoadRequest<S>) -> anyhow::Result<Reference<Item>> {
        self.loader.load(request).await
    }

    fn on_equipped(&mut self, slot: &S, item: &Item) {
        self.log.push(format!("+{}@{}", item.id, slot));
    }

    fn on_unequipped(&mut self, slot: &S, item: &Item) {
        self.log.push(format!("-{}@{}", item.id, slot));
    }

    fn is_slot_valid(&self, slot: &S) -> bool {
        self.valid.as_ref().map_or(true, |valid| valid.contains(slot))
    }
}

/// A shelf plus a coalescing loader over it.
pub fn shelf<S>(
    items: &[(&str, Option<&str>)],
) -> (Arc<Shelf>, Arc<CoalescingLoader<S, Item, Arc<Shelf>>>)
where
    S: Send + Sync + 'static,
{
    let ctx = Arc::new(ExecutionContext::new());
    let shelf = Arc::new(Shelf::new(ctx, items));
    let loader = Arc::new(CoalescingLoader::new(shelf.clone()));
    (shelf, loader)
}
