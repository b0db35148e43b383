//! Interactive wardrobe session.
//!
//! Owns the execution context, one outfit controller and one tattoo
//! controller, and plays the host engine: `rebuild` announces an avatar
//! rebuild, and releases queued from other threads run on [`WardrobeSession::pump`].

use std::{collections::BTreeMap, path::Path, sync::Arc};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use wardrobe_core::{pool::PoolStats, prelude::*};

use crate::outfit::{
    install_outfit_rules, install_tattoo_rules, Catalog, CatalogLoader, Garment, LoaderStats,
    Material, OutfitCapability, Tattoo, TattooCapability, Texture, OUTFIT_SLOTS,
};

/// Sandbox configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub equip: EquipConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default = "Catalog::builtin")]
    pub catalog: Catalog,
    /// Outfit defaults per slot.
    #[serde(default)]
    pub defaults: BTreeMap<String, AssetId>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            equip: EquipConfig::default(),
            pool: PoolConfig::default(),
            catalog: Catalog::builtin(),
            defaults: BTreeMap::new(),
        }
    }
}

impl SandboxConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }
}

const HELP: &[&str] = &[
    "Commands:",
    "  equip <slot> <id>    - Equip a garment (slots: top, bottom, shoes, full_body)",
    "  unequip <slot>       - Remove the garment in a slot",
    "  tattoo <id>          - Ink a tattoo",
    "  untattoo <id>        - Remove a tattoo",
    "  default <slot> <id>  - Set a slot default and resolve",
    "  resolve              - Re-run validation and defaults",
    "  rebuild              - Announce an avatar rebuild",
    "  status               - Show what is worn",
    "  pools                - Show resource pool counters",
    "  quit                 - Exit",
];

pub struct WardrobeSession {
    ctx: Arc<ExecutionContext>,
    stats: Arc<LoaderStats>,
    outfit: EquipController<OutfitCapability>,
    tattoos: EquipController<TattooCapability>,
    defaults: DefaultTable<String>,
    rebuild: RebuildSignal,
    outfit_events: mpsc::UnboundedReceiver<EquipEvent<String>>,
    tattoo_events: mpsc::UnboundedReceiver<EquipEvent<AssetId>>,
}

impl WardrobeSession {
    /// Creates a session owned by the calling thread.
    pub fn new(cfg: SandboxConfig) -> Self {
        let ctx = Arc::new(ExecutionContext::with_config(&cfg.pool));
        let catalog_loader = Arc::new(CatalogLoader::new(ctx.clone(), Arc::new(cfg.catalog)));
        let stats = catalog_loader.stats();

        let defaults = DefaultTable::new();
        defaults.replace_all(cfg.defaults);

        let rebuild = RebuildSignal::new();

        let garments = Arc::new(CoalescingLoader::new(catalog_loader.clone()));
        let mut outfit = EquipController::slotted(OutfitCapability::new(garments), &cfg.equip);
        install_outfit_rules(&mut outfit, defaults.clone());
        outfit.attach_rebuild(rebuild.subscribe());
        let outfit_events = outfit.subscribe();

        let inks = Arc::new(CoalescingLoader::new(catalog_loader));
        let mut tattoos = EquipController::unslotted(TattooCapability::new(inks), &cfg.equip);
        install_tattoo_rules(&mut tattoos);
        tattoos.attach_rebuild(rebuild.subscribe());
        let tattoo_events = tattoos.subscribe();

        Self {
            ctx,
            stats,
            outfit,
            tattoos,
            defaults,
            rebuild,
            outfit_events,
            tattoo_events,
        }
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.ctx
    }

    pub fn stats(&self) -> &LoaderStats {
        &self.stats
    }

    pub fn outfit(&self) -> &EquipController<OutfitCapability> {
        &self.outfit
    }

    pub fn tattoos(&self) -> &EquipController<TattooCapability> {
        &self.tattoos
    }

    pub fn defaults(&self) -> &DefaultTable<String> {
        &self.defaults
    }

    pub fn rebuild_signal(&self) -> &RebuildSignal {
        &self.rebuild
    }

    /// Runs releases queued from other threads.
    pub fn pump(&self) -> usize {
        self.ctx.pump()
    }

    /// Executes one command line.
    pub async fn exec(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let line = line.trim();
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() || line.starts_with("//") {
            return Ok(Vec::new());
        }

        let mut out = match (tokens[0], &tokens[1..]) {
            ("equip", [slot, id]) => {
                let outcome = self.outfit.equip(*id, slot.to_string()).await;
                vec![describe(&outcome, &format!("Equipped {} in {}", id, slot))]
            }
            ("equip", _) => vec!["Usage: equip <slot> <id>".to_string()],
            ("unequip", [slot]) => {
                let outcome = self.outfit.unequip(slot.to_string()).await;
                vec![describe(&outcome, &format!("Cleared {}", slot))]
            }
            ("unequip", _) => vec!["Usage: unequip <slot>".to_string()],
            ("tattoo", [id]) => {
                let outcome = self.tattoos.equip_item(*id).await;
                vec![describe(&outcome, &format!("Inked {}", id))]
            }
            ("tattoo", _) => vec!["Usage: tattoo <id>".to_string()],
            ("untattoo", [id]) => {
                let outcome = self.tattoos.unequip_item(*id).await;
                vec![describe(&outcome, &format!("Removed {}", id))]
            }
            ("untattoo", _) => vec!["Usage: untattoo <id>".to_string()],
            ("default", [slot, id]) => {
                if !OUTFIT_SLOTS.contains(slot) {
                    return Ok(vec![format!("Unknown slot: {}", slot)]);
                }
                self.defaults.set(slot.to_string(), AssetId::new(*id));
                let outcome = self.outfit.validate_and_resolve().await;
                vec![
                    format!("Default for {} set to {}", slot, id),
                    describe(&outcome, "Resolved"),
                ]
            }
            ("default", _) => vec!["Usage: default <slot> <id>".to_string()],
            ("resolve", []) => {
                let outfit = self.outfit.validate_and_resolve().await;
                let tattoos = self.tattoos.validate_and_resolve().await;
                vec![
                    describe(&outfit, "Outfit resolved"),
                    describe(&tattoos, "Tattoos resolved"),
                ]
            }
            ("rebuild", []) => {
                self.rebuild.notify();
                let released = self.outfit.poll_rebuild() + self.tattoos.poll_rebuild();
                let pumped = self.pump();
                info!(generation = self.rebuild.generation(), released, pumped, "Avatar rebuilt");
                vec![format!(
                    "Rebuild {}: released {} deferred",
                    self.rebuild.generation(),
                    released
                )]
            }
            ("status", []) => self.status(),
            ("pools", []) => self.pools(),
            ("help", _) => HELP.iter().map(|s| s.to_string()).collect(),
            (cmd, _) => vec![format!("Unknown command: {}. Type 'help' for commands.", cmd)],
        };

        self.drain_events(&mut out);
        Ok(out)
    }

    fn drain_events(&mut self, out: &mut Vec<String>) {
        while let Ok(event) = self.outfit_events.try_recv() {
            match event {
                EquipEvent::Equipped { slot, id } => out.push(format!("  + {} ({})", id, slot)),
                EquipEvent::Unequipped { slot, id } => out.push(format!("  - {} ({})", id, slot)),
                EquipEvent::Rejected { .. } => {}
            }
        }
        while let Ok(event) = self.tattoo_events.try_recv() {
            match event {
                EquipEvent::Equipped { id, .. } => out.push(format!("  + {} (tattoo)", id)),
                EquipEvent::Unequipped { id, .. } => out.push(format!("  - {} (tattoo)", id)),
                EquipEvent::Rejected { .. } => {}
            }
        }
    }

    fn status(&self) -> Vec<String> {
        let mut out = vec!["Outfit:".to_string()];
        for slot in OUTFIT_SLOTS {
            let worn = match self.outfit.get(&slot.to_string()) {
                Some(garment) => format!("{} ({})", garment.id, garment.material.name),
                None => "-".to_string(),
            };
            out.push(format!("  {:<10} {}", slot, worn));
        }

        let inked = self.tattoos.capability().inked();
        if inked.is_empty() {
            out.push("Tattoos: none".to_string());
        } else {
            let list: Vec<String> = inked
                .iter()
                .map(|(id, placement)| format!("{} ({})", id, placement))
                .collect();
            out.push(format!("Tattoos: {}", list.join(", ")));
        }

        out.push(format!(
            "Deferred releases: {}",
            self.outfit.deferred_count() + self.tattoos.deferred_count()
        ));
        out
    }

    fn pools(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut pool = |name: &str, stats: Option<PoolStats>| {
            if let Some(s) = stats {
                out.push(format!(
                    "{:<9} live={} allocated={} recycled={} released={}",
                    name, s.live, s.allocated, s.recycled, s.released
                ));
            }
        };
        pool("garment", self.ctx.pool_stats::<Garment>());
        pool("material", self.ctx.pool_stats::<Material>());
        pool("texture", self.ctx.pool_stats::<Texture>());
        pool("tattoo", self.ctx.pool_stats::<Tattoo>());

        out.push(format!(
            "Loads: {}, live textures: {}, live decals: {}, queued releases: {}",
            self.stats.loads(),
            self.stats.live_textures(),
            self.stats.live_decals(),
            self.ctx.dispatcher().pending()
        ));
        out
    }

    /// Releases everything the session holds.
    pub fn dispose(&mut self) {
        self.outfit.dispose();
        self.tattoos.dispose();
        self.pump();
    }
}

fn describe(outcome: &EquipOutcome, applied: &str) -> String {
    match outcome {
        EquipOutcome::Applied => applied.to_string(),
        EquipOutcome::Unchanged => "No change".to_string(),
        EquipOutcome::Rejected(reason) => format!("Rejected: {}", reason),
    }
}
