//! Rule engine.
//!
//! Rules act on an [`Arrangement`]: the equipped set or slot mapping of one
//! controller. Phases run in this order on every equip:
//! 1. adjustment rules, given the incoming item, before it is installed
//! 2. installation
//! 3. validation rules over the whole arrangement
//! 4. resolution rules, which may only request defaults for empty slots
//!
//! Within a phase, rules run in registration order and see earlier rules'
//! effects. Iteration order of the arrangement itself is unspecified; rules
//! that need recency use [`Equipped::sequence`].

use std::{
    fmt::Debug,
    marker::PhantomData,
    sync::{Arc, PoisonError, RwLock},
};

use crate::asset::{Asset, AssetId};

/// One equipped member.
#[derive(Debug, Clone, PartialEq)]
pub struct Equipped<S, A> {
    pub slot: S,
    pub asset: A,
    /// Monotonic install stamp; higher is more recent.
    pub sequence: u64,
}

/// Equipped members keyed by slot, at most one per slot.
///
/// Unslotted features key by the asset's own id.
#[derive(Debug, Clone)]
pub struct Arrangement<S, A> {
    entries: Vec<Equipped<S, A>>,
    requests: Vec<(S, AssetId)>,
    next_sequence: u64,
}

impl<S, A> Default for Arrangement<S, A> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            requests: Vec::new(),
            next_sequence: 0,
        }
    }
}

impl<S: Clone + Eq + Debug, A: Asset> Arrangement<S, A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: &S) -> Option<&A> {
        self.entry(slot).map(|e| &e.asset)
    }

    pub fn entry(&self, slot: &S) -> Option<&Equipped<S, A>> {
        self.entries.iter().find(|e| e.slot == *slot)
    }

    pub fn contains_slot(&self, slot: &S) -> bool {
        self.entry(slot).is_some()
    }

    pub fn contains_id(&self, id: &AssetId) -> bool {
        self.entries.iter().any(|e| e.asset.id() == id)
    }

    /// Slot currently holding `id`.
    pub fn slot_of(&self, id: &AssetId) -> Option<&S> {
        self.entries
            .iter()
            .find(|e| e.asset.id() == id)
            .map(|e| &e.slot)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Equipped<S, A>> {
        self.entries.iter()
    }

    pub fn slots(&self) -> impl Iterator<Item = &S> {
        self.entries.iter().map(|e| &e.slot)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Installs `asset` into `slot`, replacing and returning any occupant.
    pub fn insert(&mut self, slot: S, asset: A) -> Option<A> {
        let previous = self.remove(&slot);
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push(Equipped {
            slot,
            asset,
            sequence,
        });
        previous
    }

    pub fn remove(&mut self, slot: &S) -> Option<A> {
        let index = self.entries.iter().position(|e| e.slot == *slot)?;
        Some(self.entries.remove(index).asset)
    }

    /// Keeps members matching `keep`. Returns how many were removed.
    pub fn retain(&mut self, mut keep: impl FnMut(&Equipped<S, A>) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| keep(e));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.requests.clear();
    }

    /// Asks the controller to load `id` into `slot`.
    ///
    /// Refused when the slot is occupied or already has a pending request;
    /// defaults never overwrite.
    pub fn request_default(&mut self, slot: S, id: AssetId) -> bool {
        if self.contains_slot(&slot) || self.requests.iter().any(|(s, _)| *s == slot) {
            return false;
        }
        self.requests.push((slot, id));
        true
    }

    pub fn pending_requests(&self) -> &[(S, AssetId)] {
        &self.requests
    }

    pub(crate) fn take_requests(&mut self) -> Vec<(S, AssetId)> {
        std::mem::take(&mut self.requests)
    }

    /// `(slot, id)` pairs, oldest first.
    pub fn snapshot(&self) -> Vec<(S, AssetId)> {
        let mut entries: Vec<&Equipped<S, A>> = self.entries.iter().collect();
        entries.sort_by_key(|e| e.sequence);
        entries
            .into_iter()
            .map(|e| (e.slot.clone(), e.asset.id().clone()))
            .collect()
    }
}

/// Reacts to one incoming item before it is installed.
pub trait AdjustmentRule<S, A>: Send {
    fn apply(&mut self, current: &mut Arrangement<S, A>, slot: &S, incoming: &A);

    /// Clears per-instance state when the controller is disposed.
    fn dispose(&mut self) {}
}

/// Inspects the whole arrangement; may remove members.
pub trait ValidationRule<S, A>: Send {
    fn apply(&mut self, current: &mut Arrangement<S, A>);

    fn dispose(&mut self) {}
}

/// Inspects the whole arrangement; may request defaults for empty slots.
pub trait ResolutionRule<S, A>: Send {
    fn apply(&mut self, current: &mut Arrangement<S, A>);

    fn dispose(&mut self) {}
}

impl<S, A, F> AdjustmentRule<S, A> for F
where
    F: FnMut(&mut Arrangement<S, A>, &S, &A) + Send,
{
    fn apply(&mut self, current: &mut Arrangement<S, A>, slot: &S, incoming: &A) {
        self(current, slot, incoming)
    }
}

impl<S, A, F> ValidationRule<S, A> for F
where
    F: FnMut(&mut Arrangement<S, A>) + Send,
{
    fn apply(&mut self, current: &mut Arrangement<S, A>) {
        self(current)
    }
}

impl<S, A, F> ResolutionRule<S, A> for F
where
    F: FnMut(&mut Arrangement<S, A>) + Send,
{
    fn apply(&mut self, current: &mut Arrangement<S, A>) {
        self(current)
    }
}

/// Ordered rule lists for one controller.
pub struct RuleSet<S, A> {
    pub(crate) adjustment: Vec<Box<dyn AdjustmentRule<S, A>>>,
    pub(crate) validation: Vec<Box<dyn ValidationRule<S, A>>>,
    pub(crate) resolution: Vec<Box<dyn ResolutionRule<S, A>>>,
}

impl<S, A> Default for RuleSet<S, A> {
    fn default() -> Self {
        Self {
            adjustment: Vec::new(),
            validation: Vec::new(),
            resolution: Vec::new(),
        }
    }
}

impl<S, A> RuleSet<S, A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn adjust(&mut self, current: &mut Arrangement<S, A>, slot: &S, incoming: &A) {
        for rule in self.adjustment.iter_mut() {
            rule.apply(current, slot, incoming);
        }
    }

    pub fn validate(&mut self, current: &mut Arrangement<S, A>) {
        for rule in self.validation.iter_mut() {
            rule.apply(current);
        }
    }

    pub fn dispose(&mut self) {
        for rule in self.adjustment.iter_mut() {
            rule.dispose();
        }
        for rule in self.validation.iter_mut() {
            rule.dispose();
        }
        for rule in self.resolution.iter_mut() {
            rule.dispose();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.adjustment.is_empty() && self.validation.is_empty() && self.resolution.is_empty()
    }
}

/// Evicts members whose category matches the incoming item's.
///
/// Items without a category never conflict.
pub struct EvictSameCategory<C, F> {
    category: F,
    _category: PhantomData<fn() -> C>,
}

impl<C, F> EvictSameCategory<C, F> {
    pub fn new(category: F) -> Self {
        Self {
            category,
            _category: PhantomData,
        }
    }
}

impl<S, A, C, F> AdjustmentRule<S, A> for EvictSameCategory<C, F>
where
    S: Clone + Eq + Debug,
    A: Asset,
    C: PartialEq,
    F: Fn(&A) -> Option<C> + Send,
{
    fn apply(&mut self, current: &mut Arrangement<S, A>, _slot: &S, incoming: &A) {
        let category_of = &self.category;
        let Some(category) = category_of(incoming) else {
            return;
        };
        current.retain(|e| {
            e.asset.id() == incoming.id() || category_of(&e.asset).as_ref() != Some(&category)
        });
    }
}

/// Keeps only the most recent member of each category.
pub struct OnePerCategory<C, F> {
    category: F,
    _category: PhantomData<fn() -> C>,
}

impl<C, F> OnePerCategory<C, F> {
    pub fn new(category: F) -> Self {
        Self {
            category,
            _category: PhantomData,
        }
    }
}

impl<S, A, C, F> ValidationRule<S, A> for OnePerCategory<C, F>
where
    S: Clone + Eq + Debug,
    A: Asset,
    C: PartialEq,
    F: Fn(&A) -> Option<C> + Send,
{
    fn apply(&mut self, current: &mut Arrangement<S, A>) {
        let category_of = &self.category;
        let mut newest: Vec<(C, u64)> = Vec::new();
        for e in current.iter() {
            let Some(category) = category_of(&e.asset) else {
                continue;
            };
            match newest.iter_mut().find(|(c, _)| *c == category) {
                Some(entry) => entry.1 = entry.1.max(e.sequence),
                None => newest.push((category, e.sequence)),
            }
        }

        current.retain(|e| match category_of(&e.asset) {
            Some(category) => newest
                .iter()
                .any(|(c, sequence)| *c == category && *sequence == e.sequence),
            None => true,
        });
    }
}

/// Category pairs that cannot be worn together; the older side is removed.
pub struct ExclusiveCategories<C, F> {
    pairs: Vec<(C, C)>,
    category: F,
}

impl<C, F> ExclusiveCategories<C, F> {
    pub fn new(category: F) -> Self {
        Self {
            pairs: Vec::new(),
            category,
        }
    }

    pub fn with_pair(mut self, a: C, b: C) -> Self {
        self.pairs.push((a, b));
        self
    }
}

impl<S, A, C, F> ValidationRule<S, A> for ExclusiveCategories<C, F>
where
    S: Clone + Eq + Debug,
    A: Asset,
    C: PartialEq + Send,
    F: Fn(&A) -> Option<C> + Send,
{
    fn apply(&mut self, current: &mut Arrangement<S, A>) {
        let category_of = &self.category;
        let newest = |current: &Arrangement<S, A>, wanted: &C| {
            current
                .iter()
                .filter(|e| category_of(&e.asset).as_ref() == Some(wanted))
                .map(|e| e.sequence)
                .max()
        };

        for (a, b) in &self.pairs {
            let (Some(newest_a), Some(newest_b)) = (newest(current, a), newest(current, b)) else {
                continue;
            };
            let loser = if newest_a > newest_b { b } else { a };
            current.retain(|e| category_of(&e.asset).as_ref() != Some(loser));
        }
    }
}

/// Runtime-swappable default table, shared between a feature and its rule.
pub struct DefaultTable<K> {
    entries: Arc<RwLock<Vec<(K, AssetId)>>>,
}

impl<K> Clone for DefaultTable<K> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<K> Default for DefaultTable<K> {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl<K: Clone + PartialEq> DefaultTable<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default for `key`, replacing any previous one.
    pub fn set(&self, key: K, id: AssetId) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = id,
            None => entries.push((key, id)),
        }
    }

    pub fn get(&self, key: &K) -> Option<AssetId> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, id)| id.clone())
    }

    pub fn remove(&self, key: &K) -> Option<AssetId> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let index = entries.iter().position(|(k, _)| k == key)?;
        Some(entries.remove(index).1)
    }

    /// Swaps the whole table.
    pub fn replace_all(&self, entries: impl IntoIterator<Item = (K, AssetId)>) {
        let fresh: Vec<(K, AssetId)> = entries.into_iter().collect();
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = fresh;
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn entries(&self) -> Vec<(K, AssetId)> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Requests a default for every empty slot in the table.
pub struct DefaultsBySlot<S> {
    table: DefaultTable<S>,
}

impl<S> DefaultsBySlot<S> {
    pub fn new(table: DefaultTable<S>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &DefaultTable<S> {
        &self.table
    }
}

impl<S, A> ResolutionRule<S, A> for DefaultsBySlot<S>
where
    S: Clone + Eq + Debug + Send + Sync,
    A: Asset,
{
    fn apply(&mut self, current: &mut Arrangement<S, A>) {
        for (slot, id) in self.table.entries() {
            if !current.contains_slot(&slot) {
                current.request_default(slot, id);
            }
        }
    }

    fn dispose(&mut self) {
        self.table.clear();
    }
}

/// Unslotted counterpart of [`DefaultsBySlot`]: requests a default for every
/// category no member covers.
pub struct DefaultsByCategory<C, F> {
    table: DefaultTable<C>,
    category: F,
}

impl<C, F> DefaultsByCategory<C, F> {
    pub fn new(table: DefaultTable<C>, category: F) -> Self {
        Self { table, category }
    }
}

impl<A, C, F> ResolutionRule<AssetId, A> for DefaultsByCategory<C, F>
where
    A: Asset,
    C: Clone + PartialEq + Send + Sync,
    F: Fn(&A) -> Option<C> + Send,
{
    fn apply(&mut self, current: &mut Arrangement<AssetId, A>) {
        for (category, id) in self.table.entries() {
            let covered = current
                .iter()
                .any(|e| (self.category)(&e.asset).as_ref() == Some(&category));
            if !covered {
                current.request_default(id.clone(), id);
            }
        }
    }

    fn dispose(&mut self) {
        self.table.clear();
    }
}
