//! Outfit and tattoo features.
//!
//! Garments own a material that owns a texture. The texture is a host object,
//! so its destruction goes through the context's dispatcher. Tattoos own a
//! disposable decal.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use wardrobe_core::prelude::*;

pub const TOP: &str = "top";
pub const BOTTOM: &str = "bottom";
pub const SHOES: &str = "shoes";
pub const FULL_BODY: &str = "full_body";

/// Slots accepted by the outfit controller, in display order.
pub const OUTFIT_SLOTS: [&str; 4] = [TOP, BOTTOM, SHOES, FULL_BODY];

// Slots a full-body garment covers.
const COVERED_BY_FULL_BODY: [&str; 2] = [TOP, BOTTOM];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GarmentRecord {
    pub id: AssetId,
    /// Slot the garment fits.
    pub category: String,
    pub material: String,
    pub texture: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TattooRecord {
    pub id: AssetId,
    pub placement: String,
}

/// Everything the sandbox can load.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub garments: Vec<GarmentRecord>,
    #[serde(default)]
    pub tattoos: Vec<TattooRecord>,
}

impl Catalog {
    pub fn builtin() -> Self {
        let garment = |id: &str, category: &str, material: &str, texture: &str| GarmentRecord {
            id: id.into(),
            category: category.to_string(),
            material: material.to_string(),
            texture: texture.to_string(),
        };
        let tattoo = |id: &str, placement: &str| TattooRecord {
            id: id.into(),
            placement: placement.to_string(),
        };

        Self {
            garments: vec![
                garment("shirt-1", TOP, "cotton", "cotton_white"),
                garment("shirt-2", TOP, "linen", "linen_blue"),
                garment("tee", TOP, "jersey", "jersey_grey"),
                garment("jeans", BOTTOM, "denim", "denim_wash"),
                garment("shorts", BOTTOM, "twill", "twill_khaki"),
                garment("sneakers", SHOES, "canvas", "canvas_white"),
                garment("boots", SHOES, "leather", "leather_brown"),
                garment("dress", FULL_BODY, "silk", "silk_red"),
                garment("overalls", FULL_BODY, "denim", "denim_dark"),
            ],
            tattoos: vec![
                tattoo("rose", "arm"),
                tattoo("anchor", "arm"),
                tattoo("star", "neck"),
            ],
        }
    }

    pub fn garment(&self, id: &AssetId) -> Option<&GarmentRecord> {
        self.garments.iter().find(|g| g.id == *id)
    }

    pub fn tattoo(&self, id: &AssetId) -> Option<&TattooRecord> {
        self.tattoos.iter().find(|t| t.id == *id)
    }
}

/// Engine texture handle.
#[derive(Debug, Clone, PartialEq)]
pub struct Texture {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub texture: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Garment {
    pub id: AssetId,
    pub category: String,
    pub material: Material,
}

impl Asset for Garment {
    fn id(&self) -> &AssetId {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tattoo {
    pub id: AssetId,
    pub placement: String,
}

impl Asset for Tattoo {
    fn id(&self) -> &AssetId {
        &self.id
    }
}

/// Projected skin decal backing a tattoo.
#[derive(Clone)]
struct Decal {
    live: Arc<AtomicUsize>,
}

impl Dispose for Decal {
    fn dispose(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct LoaderStats {
    loads: AtomicUsize,
    live_textures: Arc<AtomicUsize>,
    live_decals: Arc<AtomicUsize>,
}

impl LoaderStats {
    /// Loads that reached the catalog.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn live_textures(&self) -> usize {
        self.live_textures.load(Ordering::SeqCst)
    }

    pub fn live_decals(&self) -> usize {
        self.live_decals.load(Ordering::SeqCst)
    }
}

/// Builds garments and tattoos from a [`Catalog`].
pub struct CatalogLoader {
    ctx: Arc<ExecutionContext>,
    catalog: Arc<Catalog>,
    stats: Arc<LoaderStats>,
}

impl CatalogLoader {
    pub fn new(ctx: Arc<ExecutionContext>, catalog: Arc<Catalog>) -> Self {
        Self {
            ctx,
            catalog,
            stats: Arc::new(LoaderStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<LoaderStats> {
        self.stats.clone()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn texture(&self, name: String) -> Reference<Texture> {
        let live = self.stats.live_textures.clone();
        live.fetch_add(1, Ordering::SeqCst);
        Reference::from_host_object(&self.ctx, Texture { name }, move |texture| {
            live.fetch_sub(1, Ordering::SeqCst);
            debug!(texture = %texture.name, "Destroyed texture");
        })
    }
}

#[async_trait]
impl Loader<String, Garment> for CatalogLoader {
    async fn load(&self, request: &LoadRequest<String>) -> anyhow::Result<Reference<Garment>> {
        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let Some(record) = self.catalog.garment(&request.id) else {
            return Ok(Reference::empty());
        };
        if let Some(slot) = &request.slot {
            if *slot != record.category {
                debug!(
                    id = %record.id,
                    %slot,
                    category = %record.category,
                    "Garment does not fit slot"
                );
                return Ok(Reference::empty());
            }
        }

        let texture_name = match request.level_of_detail {
            Some(lod) => format!("{}@lod{}", record.texture, lod),
            None => record.texture.clone(),
        };
        let texture = self.texture(texture_name.clone());

        let material = Material {
            name: record.material.clone(),
            texture: texture_name,
        };
        let material = Reference::from_dependent(
            &self.ctx,
            Reference::from_callback(&self.ctx, material, |m| {
                debug!(material = %m.name, "Released material");
            }),
            vec![texture.into_dependency()],
        );
        let Some(material_value) = material.value().cloned() else {
            return Ok(Reference::empty());
        };

        let garment = Garment {
            id: record.id.clone(),
            category: record.category.clone(),
            material: material_value,
        };
        Ok(Reference::from_dependent(
            &self.ctx,
            Reference::from_callback(&self.ctx, garment, |_| {}),
            vec![material.into_dependency()],
        ))
    }
}

#[async_trait]
impl Loader<AssetId, Tattoo> for CatalogLoader {
    async fn load(&self, request: &LoadRequest<AssetId>) -> anyhow::Result<Reference<Tattoo>> {
        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let Some(record) = self.catalog.tattoo(&request.id) else {
            return Ok(Reference::empty());
        };

        let live = self.stats.live_decals.clone();
        live.fetch_add(1, Ordering::SeqCst);
        let decal = Reference::from_disposable(&self.ctx, Decal { live });

        let tattoo = Tattoo {
            id: record.id.clone(),
            placement: record.placement.clone(),
        };
        Ok(Reference::from_dependent(
            &self.ctx,
            Reference::from_callback(&self.ctx, tattoo, |_| {}),
            vec![decal.into_dependency()],
        ))
    }
}

pub type GarmentLoader = CoalescingLoader<String, Garment, Arc<CatalogLoader>>;
pub type TattooLoader = CoalescingLoader<AssetId, Tattoo, Arc<CatalogLoader>>;

/// Slotted outfit feature. Tracks the material applied to each slot.
pub struct OutfitCapability {
    loader: Arc<GarmentLoader>,
    applied: BTreeMap<String, String>,
}

impl OutfitCapability {
    pub fn new(loader: Arc<GarmentLoader>) -> Self {
        Self {
            loader,
            applied: BTreeMap::new(),
        }
    }

    /// Material currently applied to each slot.
    pub fn applied(&self) -> &BTreeMap<String, String> {
        &self.applied
    }
}

#[async_trait]
impl EquipCapability for OutfitCapability {
    type Slot = String;
    type Asset = Garment;

    async fn load(&self, request: &LoadRequest<String>) -> anyhow::Result<Reference<Garment>> {
        self.loader.load(request).await
    }

    fn on_equipped(&mut self, slot: &String, garment: &Garment) {
        info!(%slot, id = %garment.id, material = %garment.material.name, "Applied garment");
        self.applied
            .insert(slot.clone(), garment.material.name.clone());
    }

    fn on_unequipped(&mut self, slot: &String, garment: &Garment) {
        info!(%slot, id = %garment.id, "Removed garment");
        self.applied.remove(slot);
    }

    fn is_slot_valid(&self, slot: &String) -> bool {
        OUTFIT_SLOTS.contains(&slot.as_str())
    }
}

/// Unslotted tattoo feature. Tracks the placements currently inked.
pub struct TattooCapability {
    loader: Arc<TattooLoader>,
    inked: BTreeMap<AssetId, String>,
}

impl TattooCapability {
    pub fn new(loader: Arc<TattooLoader>) -> Self {
        Self {
            loader,
            inked: BTreeMap::new(),
        }
    }

    pub fn inked(&self) -> &BTreeMap<AssetId, String> {
        &self.inked
    }
}

#[async_trait]
impl EquipCapability for TattooCapability {
    type Slot = AssetId;
    type Asset = Tattoo;

    async fn load(&self, request: &LoadRequest<AssetId>) -> anyhow::Result<Reference<Tattoo>> {
        self.loader.load(request).await
    }

    fn on_equipped(&mut self, _slot: &AssetId, tattoo: &Tattoo) {
        info!(id = %tattoo.id, placement = %tattoo.placement, "Inked tattoo");
        self.inked.insert(tattoo.id.clone(), tattoo.placement.clone());
    }

    fn on_unequipped(&mut self, _slot: &AssetId, tattoo: &Tattoo) {
        info!(id = %tattoo.id, "Removed tattoo");
        self.inked.remove(&tattoo.id);
    }
}

fn garment_category(garment: &Garment) -> Option<String> {
    Some(garment.category.clone())
}

fn tattoo_placement(tattoo: &Tattoo) -> Option<String> {
    Some(tattoo.placement.clone())
}

/// Slot defaults that respect full-body coverage.
///
/// Covered slots stay empty under a full-body garment, and a full-body
/// default is skipped while anything it would cover is worn.
pub struct OutfitDefaults {
    table: DefaultTable<String>,
}

impl OutfitDefaults {
    pub fn new(table: DefaultTable<String>) -> Self {
        Self { table }
    }
}

impl ResolutionRule<String, Garment> for OutfitDefaults {
    fn apply(&mut self, current: &mut Arrangement<String, Garment>) {
        let mut full_body_worn = current.slots().any(|s| s == FULL_BODY);
        let mut covered_worn = current
            .slots()
            .any(|s| COVERED_BY_FULL_BODY.contains(&s.as_str()));

        // Accepted requests count as worn for the rest of the pass.
        for (slot, id) in self.table.entries() {
            let covered = COVERED_BY_FULL_BODY.contains(&slot.as_str());
            let blocked = if slot == FULL_BODY {
                covered_worn
            } else {
                full_body_worn && covered
            };
            if blocked || !current.request_default(slot.clone(), id) {
                continue;
            }
            if slot == FULL_BODY {
                full_body_worn = true;
            } else if covered {
                covered_worn = true;
            }
        }
    }

    fn dispose(&mut self) {
        self.table.clear();
    }
}

/// Installs the outfit rules: full-body garments exclude tops and bottoms,
/// and empty slots take their defaults.
pub fn install_outfit_rules(
    controller: &mut EquipController<OutfitCapability>,
    defaults: DefaultTable<String>,
) {
    controller.add_validation_rule(
        ExclusiveCategories::new(garment_category)
            .with_pair(FULL_BODY.to_string(), TOP.to_string())
            .with_pair(FULL_BODY.to_string(), BOTTOM.to_string()),
    );
    controller.add_resolution_rule(OutfitDefaults::new(defaults));
}

/// Installs the tattoo rules: one tattoo per placement, newest wins.
pub fn install_tattoo_rules(controller: &mut EquipController<TattooCapability>) {
    controller.add_validation_rule(OnePerCategory::new(tattoo_placement));
}
