//! Equip controller.
//!
//! One generic state machine for every customizable feature. The feature
//! plugs in through [`EquipCapability`] (how to load, what to do once an asset
//! goes on or comes off) and through the controller's rule lists.
//!
//! Slotted features key the arrangement by slot. Unslotted features use
//! `Slot = AssetId` and key by the asset's own id.
//!
//! Nothing here panics or returns an error to the caller: every call yields
//! an [`EquipOutcome`] and logs why a request was refused.

use std::{
    fmt::{Debug, Display},
    hash::Hash,
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    asset::{Asset, AssetId},
    cache::HandleCache,
    config::{EquipConfig, EquipFlags},
    error::EquipError,
    event::{EquipEvent, EventBus, RebuildSubscription},
    loader::LoadRequest,
    reference::Reference,
    rules::{AdjustmentRule, Arrangement, ResolutionRule, RuleSet, ValidationRule},
};

/// What a feature supplies to its controller.
#[async_trait]
pub trait EquipCapability: Send + Sync {
    type Slot: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static;
    type Asset: Asset;

    /// Loads an asset. An empty reference means "not found".
    async fn load(
        &self,
        request: &LoadRequest<Self::Slot>,
    ) -> anyhow::Result<Reference<Self::Asset>>;

    fn on_equipped(&mut self, slot: &Self::Slot, asset: &Self::Asset);

    fn on_unequipped(&mut self, slot: &Self::Slot, asset: &Self::Asset);

    fn is_slot_valid(&self, _slot: &Self::Slot) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquipMode {
    Slotted,
    Unslotted,
}

/// Result of an equip, unequip, or resolve call.
#[derive(Debug, Clone, PartialEq)]
pub enum EquipOutcome {
    /// The arrangement changed.
    Applied,
    /// Nothing to do.
    Unchanged,
    /// Refused; the arrangement is untouched.
    Rejected(EquipError),
}

impl EquipOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, EquipOutcome::Applied)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, EquipOutcome::Rejected(_))
    }
}

struct Retained<S, A: Send + 'static> {
    request: LoadRequest<S>,
    slot: S,
    asset: A,
    /// Install stamp of the arrangement entry this reference backs.
    sequence: u64,
    reference: Reference<A>,
}

type Slot<C> = <C as EquipCapability>::Slot;
type AssetOf<C> = <C as EquipCapability>::Asset;

pub struct EquipController<C: EquipCapability> {
    capability: C,
    mode: EquipMode,
    flags: EquipFlags,
    level_of_detail: Option<u8>,
    rules: RuleSet<Slot<C>, AssetOf<C>>,
    current: Arrangement<Slot<C>, AssetOf<C>>,
    retained: Vec<Retained<Slot<C>, AssetOf<C>>>,
    deferred: Vec<(LoadRequest<Slot<C>>, Reference<AssetOf<C>>)>,
    cache: HandleCache<LoadRequest<Slot<C>>, AssetOf<C>>,
    events: EventBus<EquipEvent<Slot<C>>>,
    rebuild: Option<RebuildSubscription>,
    disposed: bool,
}

impl<C: EquipCapability> EquipController<C> {
    /// Controller whose loads carry the target slot.
    pub fn slotted(capability: C, cfg: &EquipConfig) -> Self {
        Self::with_mode(capability, cfg, EquipMode::Slotted)
    }

    fn with_mode(capability: C, cfg: &EquipConfig, mode: EquipMode) -> Self {
        Self {
            capability,
            mode,
            flags: cfg.flags(),
            level_of_detail: cfg.level_of_detail,
            rules: RuleSet::new(),
            current: Arrangement::new(),
            retained: Vec::new(),
            deferred: Vec::new(),
            cache: HandleCache::new(),
            events: EventBus::new(),
            rebuild: None,
            disposed: false,
        }
    }

    /// Loads `id` and installs it into `slot`.
    pub async fn equip(&mut self, id: impl Into<AssetId>, slot: Slot<C>) -> EquipOutcome {
        let id = id.into();
        if self.disposed {
            return EquipOutcome::Rejected(EquipError::Disposed);
        }
        if !self.capability.is_slot_valid(&slot) {
            warn!(%slot, %id, "Rejected equip into invalid slot");
            let reason = EquipError::InvalidSlot(slot_name(&slot));
            return self.reject(slot, id, reason);
        }
        if self.current.get(&slot).is_some_and(|asset| *asset.id() == id) {
            return EquipOutcome::Unchanged;
        }

        let (request, reference) = match self.acquire(&id, &slot).await {
            Ok(loaded) => loaded,
            Err(reason) => return self.reject(slot, id, reason),
        };
        let Some(asset) = reference.value().cloned() else {
            return self.reject(slot, id.clone(), EquipError::NotFound(id));
        };

        self.rules.adjust(&mut self.current, &slot, &asset);
        let incoming = self.install(request, slot, asset, reference);
        self.settle(vec![incoming]).await;
        EquipOutcome::Applied
    }

    /// Removes whatever occupies `slot`.
    pub async fn unequip(&mut self, slot: Slot<C>) -> EquipOutcome {
        if self.disposed {
            return EquipOutcome::Rejected(EquipError::Disposed);
        }
        if !self.capability.is_slot_valid(&slot) {
            warn!(%slot, "Rejected unequip from invalid slot");
            return EquipOutcome::Rejected(EquipError::InvalidSlot(slot_name(&slot)));
        }
        let Some(removed) = self.current.remove(&slot) else {
            return EquipOutcome::Unchanged;
        };
        debug!(%slot, id = %removed.id(), "Unequipping");

        if self.flags.contains(EquipFlags::RESOLVE_ON_UNEQUIP) {
            self.settle(Vec::new()).await;
        } else {
            self.reconcile(Vec::new());
        }
        EquipOutcome::Applied
    }

    /// Re-runs validation and resolution over the current arrangement.
    ///
    /// Idempotent: a second call on a settled arrangement is `Unchanged`.
    pub async fn validate_and_resolve(&mut self) -> EquipOutcome {
        if self.disposed {
            return EquipOutcome::Rejected(EquipError::Disposed);
        }
        let before = self.current.snapshot();
        self.settle(Vec::new()).await;
        if self.current.snapshot() == before {
            EquipOutcome::Unchanged
        } else {
            EquipOutcome::Applied
        }
    }

    fn reject(&mut self, slot: Slot<C>, id: AssetId, reason: EquipError) -> EquipOutcome {
        self.events.publish(&EquipEvent::Rejected {
            slot,
            id,
            reason: reason.clone(),
        });
        EquipOutcome::Rejected(reason)
    }

    fn request_for(&self, id: &AssetId, slot: &Slot<C>) -> LoadRequest<Slot<C>> {
        LoadRequest {
            id: id.clone(),
            slot: match self.mode {
                EquipMode::Slotted => Some(slot.clone()),
                EquipMode::Unslotted => None,
            },
            level_of_detail: self.level_of_detail,
        }
    }

    // Cache first, then the capability. The returned reference is always alive.
    async fn acquire(
        &mut self,
        id: &AssetId,
        slot: &Slot<C>,
    ) -> Result<(LoadRequest<Slot<C>>, Reference<AssetOf<C>>), EquipError> {
        let request = self.request_for(id, slot);
        let caching = self.flags.contains(EquipFlags::CACHE_LOADS);

        if caching {
            if let Some(reference) = self.cache.try_get_new_reference(&request) {
                debug!(%id, %slot, "Cache hit");
                return Ok((request, reference));
            }
        }

        let reference = match self.capability.load(&request).await {
            Ok(reference) => reference,
            Err(e) => {
                let message = format!("{e:#}");
                warn!(%id, %slot, error = %message, "Asset load failed");
                return Err(EquipError::LoadFailed {
                    id: id.clone(),
                    message,
                });
            }
        };
        if !reference.is_alive() {
            warn!(%id, %slot, "Asset not found");
            return Err(EquipError::NotFound(id.clone()));
        }

        if caching {
            self.cache.cache_as(request.clone(), reference.duplicate());
        }
        Ok((request, reference))
    }

    fn install(
        &mut self,
        request: LoadRequest<Slot<C>>,
        slot: Slot<C>,
        asset: AssetOf<C>,
        reference: Reference<AssetOf<C>>,
    ) -> Retained<Slot<C>, AssetOf<C>> {
        self.current.insert(slot.clone(), asset.clone());
        let sequence = self.current.entry(&slot).map_or(0, |e| e.sequence);
        Retained {
            request,
            slot,
            asset,
            sequence,
            reference,
        }
    }

    async fn settle(&mut self, mut incoming: Vec<Retained<Slot<C>, AssetOf<C>>>) {
        self.prune_dead();
        self.rules.validate(&mut self.current);
        self.resolve(&mut incoming).await;
        self.reconcile(incoming);
    }

    // Members whose resource was revoked underneath the controller.
    fn prune_dead(&mut self) {
        for retained in self.retained.iter().filter(|r| !r.reference.is_alive()) {
            let backs_entry = self
                .current
                .entry(&retained.slot)
                .is_some_and(|e| e.sequence == retained.sequence);
            if backs_entry {
                debug!(
                    slot = %retained.slot,
                    id = %retained.asset.id(),
                    "Dropping revoked asset"
                );
                self.current.remove(&retained.slot);
            }
        }
    }

    // Each rule's default requests are loaded before the next rule runs.
    async fn resolve(&mut self, incoming: &mut Vec<Retained<Slot<C>, AssetOf<C>>>) {
        for index in 0..self.rules.resolution.len() {
            self.rules.resolution[index].apply(&mut self.current);

            for (slot, id) in self.current.take_requests() {
                if self.current.contains_slot(&slot) {
                    continue;
                }
                if !self.capability.is_slot_valid(&slot) {
                    debug!(%slot, %id, "Ignoring default for invalid slot");
                    continue;
                }

                match self.acquire(&id, &slot).await {
                    Ok((request, reference)) => {
                        let Some(asset) = reference.value().cloned() else {
                            continue;
                        };
                        debug!(%slot, %id, "Resolved default");
                        let retained = self.install(request, slot, asset, reference);
                        incoming.push(retained);
                    }
                    Err(reason) => {
                        debug!(%slot, %id, %reason, "Default not applied");
                    }
                }
            }
        }
    }

    fn holds(&self, retained: &Retained<Slot<C>, AssetOf<C>>) -> bool {
        retained.reference.is_alive()
            && self
                .current
                .entry(&retained.slot)
                .is_some_and(|e| e.sequence == retained.sequence)
    }

    // Unequip callbacks for everything that left, then equip callbacks for
    // everything that arrived and survived the rules. Departed items are
    // released last so a reload under the same request keeps its cache entry.
    fn reconcile(&mut self, incoming: Vec<Retained<Slot<C>, AssetOf<C>>>) {
        let (kept, gone): (Vec<_>, Vec<_>) = std::mem::take(&mut self.retained)
            .into_iter()
            .partition(|r| self.holds(r));
        self.retained = kept;

        for retained in &gone {
            self.capability
                .on_unequipped(&retained.slot, &retained.asset);
            self.events.publish(&EquipEvent::Unequipped {
                slot: retained.slot.clone(),
                id: retained.asset.id().clone(),
            });
        }

        for retained in incoming {
            if !self.holds(&retained) {
                debug!(
                    slot = %retained.slot,
                    id = %retained.asset.id(),
                    "Removed by rules before it was applied"
                );
                self.release_now(&retained.request, retained.reference);
                continue;
            }
            self.capability.on_equipped(&retained.slot, &retained.asset);
            self.events.publish(&EquipEvent::Equipped {
                slot: retained.slot.clone(),
                id: retained.asset.id().clone(),
            });
            self.retained.push(retained);
        }

        for retained in gone {
            self.release_or_defer(retained.request, retained.reference);
        }
    }

    // The cache entry stays while an equipped item was loaded under the same request.
    fn release_now(
        &mut self,
        request: &LoadRequest<Slot<C>>,
        mut reference: Reference<AssetOf<C>>,
    ) {
        reference.release();
        if self.retained.iter().any(|r| r.request == *request) {
            return;
        }
        self.cache.release(request);
    }

    fn release_or_defer(
        &mut self,
        request: LoadRequest<Slot<C>>,
        reference: Reference<AssetOf<C>>,
    ) {
        if self.flags.contains(EquipFlags::AUTO_RELEASE_UNEQUIPPED) {
            self.release_now(&request, reference);
        } else {
            debug!(id = %request.id, "Release deferred until rebuild");
            self.deferred.push((request, reference));
        }
    }

    /// Releases everything unequipped since the last rebuild.
    pub fn release_deferred(&mut self) -> usize {
        let deferred = std::mem::take(&mut self.deferred);
        let count = deferred.len();
        for (request, reference) in deferred {
            self.release_now(&request, reference);
        }
        count
    }

    /// Ties deferred releases to a host rebuild signal.
    pub fn attach_rebuild(&mut self, subscription: RebuildSubscription) {
        self.rebuild = Some(subscription);
    }

    /// Flushes deferred releases if a rebuild happened since the last poll.
    pub fn poll_rebuild(&mut self) -> usize {
        let rebuilt = self
            .rebuild
            .as_mut()
            .is_some_and(RebuildSubscription::take_pending);
        if rebuilt {
            self.release_deferred()
        } else {
            0
        }
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<EquipEvent<Slot<C>>> {
        self.events.subscribe()
    }

    pub fn adjustment_rules_mut(
        &mut self,
    ) -> &mut Vec<Box<dyn AdjustmentRule<Slot<C>, AssetOf<C>>>> {
        &mut self.rules.adjustment
    }

    pub fn validation_rules_mut(
        &mut self,
    ) -> &mut Vec<Box<dyn ValidationRule<Slot<C>, AssetOf<C>>>> {
        &mut self.rules.validation
    }

    pub fn resolution_rules_mut(
        &mut self,
    ) -> &mut Vec<Box<dyn ResolutionRule<Slot<C>, AssetOf<C>>>> {
        &mut self.rules.resolution
    }

    pub fn add_adjustment_rule(
        &mut self,
        rule: impl AdjustmentRule<Slot<C>, AssetOf<C>> + 'static,
    ) {
        self.rules.adjustment.push(Box::new(rule));
    }

    pub fn add_validation_rule(
        &mut self,
        rule: impl ValidationRule<Slot<C>, AssetOf<C>> + 'static,
    ) {
        self.rules.validation.push(Box::new(rule));
    }

    pub fn add_resolution_rule(
        &mut self,
        rule: impl ResolutionRule<Slot<C>, AssetOf<C>> + 'static,
    ) {
        self.rules.resolution.push(Box::new(rule));
    }

    pub fn arrangement(&self) -> &Arrangement<Slot<C>, AssetOf<C>> {
        &self.current
    }

    pub fn get(&self, slot: &Slot<C>) -> Option<&AssetOf<C>> {
        self.current.get(slot)
    }

    pub fn is_equipped(&self, id: &AssetId) -> bool {
        self.current.contains_id(id)
    }

    pub fn cache_mut(&mut self) -> &mut HandleCache<LoadRequest<Slot<C>>, AssetOf<C>> {
        &mut self.cache
    }

    pub fn capability(&self) -> &C {
        &self.capability
    }

    pub fn capability_mut(&mut self) -> &mut C {
        &mut self.capability
    }

    pub fn mode(&self) -> EquipMode {
        self.mode
    }

    pub fn flags(&self) -> EquipFlags {
        self.flags
    }

    /// References waiting for the next rebuild.
    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Releases every reference and clears rule state. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        self.retained.clear();
        self.deferred.clear();
        self.cache.release_all();
        self.current.clear();
        self.rules.dispose();
        self.rebuild = None;
        self.events.close();
        debug!(mode = ?self.mode, "Equip controller disposed");
    }
}

impl<C: EquipCapability<Slot = AssetId>> EquipController<C> {
    /// Controller over an equipped set keyed by asset id.
    pub fn unslotted(capability: C, cfg: &EquipConfig) -> Self {
        Self::with_mode(capability, cfg, EquipMode::Unslotted)
    }

    pub async fn equip_item(&mut self, id: impl Into<AssetId>) -> EquipOutcome {
        let id = id.into();
        self.equip(id.clone(), id).await
    }

    pub async fn unequip_item(&mut self, id: impl Into<AssetId>) -> EquipOutcome {
        self.unequip(id.into()).await
    }
}

impl<C: EquipCapability> Drop for EquipController<C> {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn slot_name<S: Display>(slot: &S) -> String {
    slot.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::HashMap,
        marker::PhantomData,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
    };

    use crate::{
        context::ExecutionContext,
        event::RebuildSignal,
        rules::{DefaultTable, DefaultsBySlot, OnePerCategory},
    };

    #[derive(Debug, Clone, PartialEq)]
    struct Piece {
        id: AssetId,
        category: Option<String>,
    }

    impl Asset for Piece {
        fn id(&self) -> &AssetId {
            &self.id
        }
    }

    fn category(piece: &Piece) -> Option<String> {
        piece.category.clone()
    }

    struct Mock<S> {
        ctx: Arc<ExecutionContext>,
        catalog: HashMap<AssetId, Option<String>>,
        valid: Option<Vec<S>>,
        loads: Arc<AtomicUsize>,
        released: Arc<Mutex<Vec<String>>>,
        log: Vec<String>,
        _slot: PhantomData<fn() -> S>,
    }

    impl<S> Mock<S> {
        fn new(items: &[(&str, Option<&str>)]) -> Self {
            Self {
                ctx: Arc::new(ExecutionContext::new()),
                catalog: items
                    .iter()
                    .map(|(id, c)| (AssetId::new(*id), c.map(str::to_string)))
                    .collect(),
                valid: None,
                loads: Arc::new(AtomicUsize::new(0)),
                released: Arc::new(Mutex::new(Vec::new())),
                log: Vec::new(),
                _slot: PhantomData,
            }
        }

        fn with_slots(mut self, slots: Vec<S>) -> Self {
            self.valid = Some(slots);
            self
        }
    }

    #[async_trait]
    impl<S> EquipCapability for Mock<S>
    where
        S: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static,
    {
        type Slot = S;
        type Asset = Piece;

        async fn load(&self, request: &LoadRequest<S>) -> anyhow::Result<Reference<Piece>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if request.id.as_str() == "broken" {
                anyhow::bail!("corrupt bundle");
            }
            let Some(category) = self.catalog.get(&request.id) else {
                return Ok(Reference::empty());
            };

            let released = self.released.clone();
            Ok(Reference::from_callback(
                &self.ctx,
                Piece {
                    id: request.id.clone(),
                    category: category.clone(),
                },
                move |piece| released.lock().unwrap().push(piece.id.to_string()),
            ))
        }

        fn on_equipped(&mut self, slot: &S, asset: &Piece) {
            self.log.push(format!("+{}@{}", asset.id, slot));
        }

        fn on_unequipped(&mut self, slot: &S, asset: &Piece) {
            self.log.push(format!("-{}@{}", asset.id, slot));
        }

        fn is_slot_valid(&self, slot: &S) -> bool {
            self.valid.as_ref().map_or(true, |valid| valid.contains(slot))
        }
    }

    type Slotted = EquipController<Mock<&'static str>>;

    fn outfit() -> Slotted {
        let mock = Mock::new(&[
            ("shirt-1", Some("top")),
            ("shirt-2", Some("top")),
            ("tee", Some("top")),
            ("jeans", Some("bottom")),
        ])
        .with_slots(vec!["top", "bottom"]);
        EquipController::slotted(mock, &EquipConfig::default())
    }

    fn released(c: &Slotted) -> Vec<String> {
        c.capability().released.lock().unwrap().clone()
    }

    // =============================================================================
    // Slotted equip
    // =============================================================================

    #[tokio::test]
    async fn equip_replaces_slot_occupant() {
        let mut c = outfit();
        assert!(c.equip("shirt-1", "top").await.is_applied());
        assert!(c.equip("shirt-2", "top").await.is_applied());

        assert_eq!(c.arrangement().snapshot(), vec![("top", AssetId::new("shirt-2"))]);
        assert_eq!(c.capability().log, vec!["+shirt-1@top", "-shirt-1@top", "+shirt-2@top"]);
        assert_eq!(released(&c), vec!["shirt-1"]);
    }

    #[tokio::test]
    async fn invalid_slot_is_rejected_before_load() {
        let mut c = outfit();
        let mut events = c.subscribe();
        c.equip("shirt-1", "top").await;

        let outcome = c.equip("x", "side").await;
        assert_eq!(
            outcome,
            EquipOutcome::Rejected(EquipError::InvalidSlot("side".into()))
        );
        assert_eq!(c.arrangement().snapshot(), vec![("top", AssetId::new("shirt-1"))]);
        assert_eq!(c.capability().loads.load(Ordering::SeqCst), 1);

        assert!(matches!(events.try_recv(), Ok(EquipEvent::Equipped { .. })));
        assert!(matches!(
            events.try_recv(),
            Ok(EquipEvent::Rejected {
                reason: EquipError::InvalidSlot(_),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn failed_load_keeps_prior_item() {
        let mut c = outfit();
        c.equip("shirt-1", "top").await;

        assert_eq!(
            c.equip("ghost", "top").await,
            EquipOutcome::Rejected(EquipError::NotFound("ghost".into()))
        );
        assert!(matches!(
            c.equip("broken", "top").await,
            EquipOutcome::Rejected(EquipError::LoadFailed { .. })
        ));
        assert_eq!(c.get(&"top").map(|p| p.id.as_str()), Some("shirt-1"));
        assert!(released(&c).is_empty());
    }

    #[tokio::test]
    async fn same_item_twice_is_unchanged() {
        let mut c = outfit();
        c.equip("shirt-1", "top").await;
        assert_eq!(c.equip("shirt-1", "top").await, EquipOutcome::Unchanged);
        assert_eq!(c.capability().loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn equipped_event_follows_unequipped() {
        let mut c = outfit();
        c.equip("shirt-1", "top").await;
        let mut events = c.subscribe();
        c.equip("shirt-2", "top").await;

        assert_eq!(
            events.try_recv().ok(),
            Some(EquipEvent::Unequipped {
                slot: "top",
                id: "shirt-1".into()
            })
        );
        assert_eq!(
            events.try_recv().ok(),
            Some(EquipEvent::Equipped {
                slot: "top",
                id: "shirt-2".into()
            })
        );
    }

    // =============================================================================
    // Resolution
    // =============================================================================

    fn with_defaults(c: &mut Slotted) -> DefaultTable<&'static str> {
        let table = DefaultTable::new();
        table.set("top", AssetId::new("tee"));
        table.set("bottom", AssetId::new("jeans"));
        c.add_resolution_rule(DefaultsBySlot::new(table.clone()));
        table
    }

    #[tokio::test]
    async fn resolution_never_clobbers() {
        let mut c = outfit();
        with_defaults(&mut c);

        c.equip("shirt-1", "top").await;
        assert_eq!(c.get(&"top").map(|p| p.id.as_str()), Some("shirt-1"));
        assert_eq!(c.get(&"bottom").map(|p| p.id.as_str()), Some("jeans"));

        assert_eq!(c.validate_and_resolve().await, EquipOutcome::Unchanged);
        assert_eq!(c.get(&"top").map(|p| p.id.as_str()), Some("shirt-1"));
    }

    #[tokio::test]
    async fn resolve_after_default_table_change() {
        let mut c = outfit();
        let table = DefaultTable::new();
        c.add_resolution_rule(DefaultsBySlot::new(table.clone()));

        assert_eq!(c.validate_and_resolve().await, EquipOutcome::Unchanged);
        table.set("bottom", AssetId::new("jeans"));
        assert_eq!(c.validate_and_resolve().await, EquipOutcome::Applied);
        assert_eq!(c.validate_and_resolve().await, EquipOutcome::Unchanged);
        assert!(c.is_equipped(&AssetId::new("jeans")));
    }

    #[tokio::test]
    async fn closure_resolution_rule_requests_default() {
        let mut c = outfit();
        c.add_resolution_rule(|current: &mut Arrangement<&'static str, Piece>| {
            current.request_default("bottom", AssetId::new("jeans"));
        });

        assert_eq!(c.validate_and_resolve().await, EquipOutcome::Applied);
        assert_eq!(c.get(&"bottom").map(|p| p.id.as_str()), Some("jeans"));
        assert_eq!(c.validate_and_resolve().await, EquipOutcome::Unchanged);
    }

    #[tokio::test]
    async fn unequip_refills_default() {
        let mut c = outfit();
        with_defaults(&mut c);
        c.equip("shirt-1", "top").await;

        assert!(c.unequip("top").await.is_applied());
        assert_eq!(c.get(&"top").map(|p| p.id.as_str()), Some("tee"));
        assert_eq!(released(&c), vec!["shirt-1"]);
    }

    #[tokio::test]
    async fn unequip_without_resolution_leaves_slot_empty() {
        let mock = Mock::new(&[("shirt-1", Some("top")), ("tee", Some("top"))]);
        let cfg = EquipConfig {
            resolve_on_unequip: false,
            ..EquipConfig::default()
        };
        let mut c = EquipController::slotted(mock, &cfg);
        let table = DefaultTable::new();
        table.set("top", AssetId::new("tee"));
        c.add_resolution_rule(DefaultsBySlot::new(table));

        c.equip("shirt-1", "top").await;
        assert_eq!(c.unequip("top").await, EquipOutcome::Applied);
        assert!(c.get(&"top").is_none());
        assert_eq!(c.unequip("top").await, EquipOutcome::Unchanged);
    }

    #[tokio::test]
    async fn default_for_invalid_slot_is_ignored() {
        let mut c = outfit();
        let table = DefaultTable::new();
        table.set("hat", AssetId::new("tee"));
        c.add_resolution_rule(DefaultsBySlot::new(table));

        assert_eq!(c.validate_and_resolve().await, EquipOutcome::Unchanged);
        assert!(c.arrangement().is_empty());
    }

    // =============================================================================
    // Unslotted sets
    // =============================================================================

    #[tokio::test]
    async fn one_per_category_keeps_latest() {
        let mock: Mock<AssetId> = Mock::new(&[("a", Some("hair")), ("b", Some("hair"))]);
        let mut c = EquipController::unslotted(mock, &EquipConfig::default());
        c.add_validation_rule(OnePerCategory::new(category));

        c.equip_item("a").await;
        c.equip_item("b").await;

        let ids: Vec<AssetId> = c.arrangement().snapshot().into_iter().map(|(_, id)| id).collect();
        assert_eq!(ids, vec![AssetId::new("b")]);
        assert_eq!(c.capability().released.lock().unwrap().clone(), vec!["a"]);

        assert!(c.unequip_item("b").await.is_applied());
        assert!(c.arrangement().is_empty());
    }

    #[tokio::test]
    async fn unslotted_loads_carry_no_slot() {
        let mock: Mock<AssetId> = Mock::new(&[("a", Some("hair"))]);
        let mut c = EquipController::unslotted(mock, &EquipConfig::default());
        c.equip_item("a").await;

        let request = LoadRequest::new("a");
        assert!(c.cache_mut().is_cached(&request));
        assert_eq!(c.mode(), EquipMode::Unslotted);
    }

    #[tokio::test]
    async fn incoming_removed_by_validation_gets_no_callbacks() {
        let mock: Mock<AssetId> = Mock::new(&[("a", Some("hair"))]);
        let mut c = EquipController::unslotted(mock, &EquipConfig::default());
        c.add_validation_rule(|current: &mut Arrangement<AssetId, Piece>| {
            current.retain(|e| e.asset.id.as_str() != "a");
        });

        assert!(c.equip_item("a").await.is_applied());
        assert!(c.arrangement().is_empty());
        assert!(c.capability().log.is_empty());
        assert_eq!(c.capability().released.lock().unwrap().clone(), vec!["a"]);
    }

    // =============================================================================
    // Deferred release
    // =============================================================================

    #[tokio::test]
    async fn deferred_release_waits_for_rebuild() {
        let mock = Mock::new(&[("shirt-1", Some("top")), ("shirt-2", Some("top"))]);
        let cfg = EquipConfig {
            auto_release_unequipped: false,
            ..EquipConfig::default()
        };
        let mut c = EquipController::slotted(mock, &cfg);
        let signal = RebuildSignal::new();
        c.attach_rebuild(signal.subscribe());

        c.equip("shirt-1", "top").await;
        c.equip("shirt-2", "top").await;
        assert_eq!(c.deferred_count(), 1);
        assert_eq!(c.poll_rebuild(), 0);
        assert!(released(&c).is_empty());

        signal.notify();
        assert_eq!(c.poll_rebuild(), 1);
        assert_eq!(released(&c), vec!["shirt-1"]);
        assert_eq!(c.poll_rebuild(), 0);
    }

    #[tokio::test]
    async fn reequip_before_rebuild_hits_cache() {
        let mock = Mock::new(&[("shirt-1", Some("top")), ("shirt-2", Some("top"))]);
        let cfg = EquipConfig {
            auto_release_unequipped: false,
            ..EquipConfig::default()
        };
        let mut c = EquipController::slotted(mock, &cfg);

        c.equip("shirt-1", "top").await;
        c.equip("shirt-2", "top").await;
        c.equip("shirt-1", "top").await;
        assert_eq!(c.capability().loads.load(Ordering::SeqCst), 2);

        // The earlier tokens go, the re-equipped one keeps the resource alive.
        c.release_deferred();
        assert_eq!(released(&c), vec!["shirt-2"]);
        assert_eq!(c.get(&"top").map(|p| p.id.as_str()), Some("shirt-1"));

        let shirt = LoadRequest::new("shirt-1").in_slot("top");
        assert!(c.cache_mut().is_cached(&shirt));
        assert!(!c.cache_mut().is_cached(&LoadRequest::new("shirt-2").in_slot("top")));
        c.equip("shirt-2", "top").await;
        c.equip("shirt-1", "top").await;
        assert_eq!(c.capability().loads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn revoked_default_reloads_and_stays_cached() {
        let mut c = outfit();
        with_defaults(&mut c);
        assert_eq!(c.validate_and_resolve().await, EquipOutcome::Applied);
        assert_eq!(c.capability().loads.load(Ordering::SeqCst), 2);

        let tee = LoadRequest::new("tee").in_slot("top");
        let mut handle = c.cache_mut().try_get_new_reference(&tee).unwrap();
        handle.revoke();

        // Same slot and id after the reload, so the snapshot does not change.
        assert_eq!(c.validate_and_resolve().await, EquipOutcome::Unchanged);
        assert_eq!(c.get(&"top").map(|p| p.id.as_str()), Some("tee"));
        assert_eq!(c.capability().loads.load(Ordering::SeqCst), 3);
        let log = &c.capability().log;
        assert_eq!(log[log.len() - 2..], ["-tee@top", "+tee@top"]);
        assert_eq!(released(&c), vec!["tee"]);
        assert!(c.cache_mut().is_cached(&tee));
        assert_eq!(c.cache_mut().try_get_value(&tee).map(|p| p.id.as_str()), Some("tee"));
    }

    #[tokio::test]
    async fn revoked_asset_leaves_on_next_resolve() {
        let mut c = outfit();
        c.equip("shirt-1", "top").await;
        let request = LoadRequest::new("shirt-1").in_slot("top");
        let mut handle = c.cache_mut().try_get_new_reference(&request).unwrap();

        handle.revoke();
        assert_eq!(c.validate_and_resolve().await, EquipOutcome::Applied);
        assert!(c.get(&"top").is_none());
        assert_eq!(c.capability().log, vec!["+shirt-1@top", "-shirt-1@top"]);
        assert_eq!(released(&c), vec!["shirt-1"]);
    }

    // =============================================================================
    // Disposal
    // =============================================================================

    #[tokio::test]
    async fn dispose_releases_everything_once() {
        let mut c = outfit();
        let table = with_defaults(&mut c);
        let mut events = c.subscribe();
        c.equip("shirt-1", "top").await;

        c.dispose();
        c.dispose();

        let mut all = released(&c);
        all.sort();
        assert_eq!(all, vec!["jeans", "shirt-1"]);
        assert!(table.is_empty());
        assert!(c.arrangement().is_empty());
        assert!(c.cache_mut().is_empty());

        while events.try_recv().is_ok() {}
        assert!(matches!(
            events.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert_eq!(
            c.equip("shirt-2", "top").await,
            EquipOutcome::Rejected(EquipError::Disposed)
        );
    }

    #[tokio::test]
    async fn drop_disposes() {
        let mut c = outfit();
        let released = c.capability().released.clone();
        c.equip("shirt-1", "top").await;
        drop(c);
        assert_eq!(*released.lock().unwrap(), vec!["shirt-1"]);
    }
}
