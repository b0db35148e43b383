//! Equip controller scenarios over a counting loader.

use wardrobe_core::prelude::*;
use wardrobe_tests::{category, init_tracing, shelf, Feature, Item};

const WARDROBE: &[(&str, Option<&str>)] = &[
    ("shirt-1", Some("top")),
    ("shirt-2", Some("top")),
    ("tee", Some("top")),
    ("jeans", Some("bottom")),
    ("x", Some("top")),
    ("hair-a", Some("hair")),
    ("hair-b", Some("hair")),
    ("freckles", None),
];

fn snapshot_ids<S>(arrangement: &Arrangement<S, Item>) -> Vec<String>
where
    S: Clone + Eq + std::fmt::Debug,
{
    arrangement
        .snapshot()
        .into_iter()
        .map(|(_, id)| id.to_string())
        .collect()
}

#[tokio::test]
async fn unslotted_one_per_category_keeps_latest() -> anyhow::Result<()> {
    init_tracing();
    let (shelf, loader) = shelf::<AssetId>(WARDROBE);
    let mut hair = EquipController::unslotted(Feature::new(loader), &EquipConfig::default());
    hair.add_validation_rule(OnePerCategory::new(category));

    assert!(hair.equip_item("hair-a").await.is_applied());
    assert!(hair.equip_item("hair-b").await.is_applied());
    assert_eq!(snapshot_ids(hair.arrangement()), vec!["hair-b"]);
    assert_eq!(shelf.released(), vec!["hair-a"]);

    // Uncategorized items never conflict.
    hair.equip_item("freckles").await;
    assert_eq!(snapshot_ids(hair.arrangement()), vec!["hair-b", "freckles"]);
    Ok(())
}

#[tokio::test]
async fn adjustment_then_validation_never_leaves_two_per_slot() -> anyhow::Result<()> {
    init_tracing();
    let (_shelf, loader) = shelf::<AssetId>(WARDROBE);
    let mut c = EquipController::unslotted(Feature::new(loader), &EquipConfig::default());
    c.add_adjustment_rule(EvictSameCategory::new(category));
    c.add_validation_rule(OnePerCategory::new(category));

    c.equip_item("shirt-1").await;
    c.equip_item("shirt-2").await;
    assert_eq!(snapshot_ids(c.arrangement()), vec!["shirt-2"]);
    assert_eq!(
        c.capability().log,
        vec!["+shirt-1@shirt-1", "-shirt-1@shirt-1", "+shirt-2@shirt-2"]
    );
    Ok(())
}

#[tokio::test]
async fn slotted_invalid_slot_is_ignored() -> anyhow::Result<()> {
    init_tracing();
    let (shelf, loader) = shelf::<&'static str>(WARDROBE);
    let feature = Feature::new(loader).with_slots(vec!["top", "bottom"]);
    let mut outfit = EquipController::slotted(feature, &EquipConfig::default());

    assert!(outfit.equip("shirt-1", "top").await.is_applied());
    assert!(outfit.equip("x", "side").await.is_rejected());

    assert_eq!(outfit.arrangement().snapshot(), vec![("top", AssetId::new("shirt-1"))]);
    assert_eq!(shelf.loads(), 1);
    Ok(())
}

#[tokio::test]
async fn resolution_leaves_equipped_item_in_place() -> anyhow::Result<()> {
    init_tracing();
    let (_shelf, loader) = shelf::<&'static str>(WARDROBE);
    let mut outfit = EquipController::slotted(Feature::new(loader), &EquipConfig::default());
    let defaults = DefaultTable::new();
    defaults.set("top", AssetId::new("tee"));
    outfit.add_resolution_rule(DefaultsBySlot::new(defaults.clone()));

    outfit.equip("shirt-1", "top").await;
    assert_eq!(outfit.validate_and_resolve().await, EquipOutcome::Unchanged);
    assert_eq!(outfit.get(&"top").map(|i| i.id.as_str()), Some("shirt-1"));

    // Swapping the table at runtime only matters for empty slots.
    defaults.replace_all([("top", AssetId::new("tee")), ("bottom", AssetId::new("jeans"))]);
    assert_eq!(outfit.validate_and_resolve().await, EquipOutcome::Applied);
    assert_eq!(
        outfit.arrangement().snapshot(),
        vec![("top", AssetId::new("shirt-1")), ("bottom", AssetId::new("jeans"))]
    );
    Ok(())
}

#[tokio::test]
async fn concurrent_equips_share_one_load() -> anyhow::Result<()> {
    init_tracing();
    let (shelf, loader) = shelf::<&'static str>(WARDROBE);
    let mut left = EquipController::slotted(Feature::new(loader.clone()), &EquipConfig::default());
    let mut right = EquipController::slotted(Feature::new(loader.clone()), &EquipConfig::default());

    let (a, b) = tokio::join!(left.equip("shirt-1", "top"), right.equip("shirt-1", "top"));
    assert!(a.is_applied());
    assert!(b.is_applied());
    assert_eq!(shelf.loads(), 1);
    assert_eq!(loader.in_flight(), 0);

    // Both controllers own the one resource; it goes with the last of them.
    left.dispose();
    assert!(shelf.released().is_empty());
    right.dispose();
    assert_eq!(shelf.released(), vec!["shirt-1"]);
    Ok(())
}

#[tokio::test]
async fn load_failures_preserve_state() -> anyhow::Result<()> {
    init_tracing();
    let (_shelf, loader) = shelf::<&'static str>(WARDROBE);
    let mut outfit = EquipController::slotted(Feature::new(loader), &EquipConfig::default());
    let mut events = outfit.subscribe();

    outfit.equip("shirt-1", "top").await;
    let missing = outfit.equip("cape", "top").await;
    let broken = outfit.equip("broken", "top").await;

    assert_eq!(missing, EquipOutcome::Rejected(EquipError::NotFound("cape".into())));
    match broken {
        EquipOutcome::Rejected(EquipError::LoadFailed { message, .. }) => {
            assert!(message.contains("checksum mismatch"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(outfit.get(&"top").map(|i| i.id.as_str()), Some("shirt-1"));

    let mut rejected = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, EquipEvent::Rejected { .. }) {
            rejected += 1;
        }
    }
    assert_eq!(rejected, 2);
    Ok(())
}

#[tokio::test]
async fn deferred_releases_follow_rebuilds() -> anyhow::Result<()> {
    init_tracing();
    let (shelf, loader) = shelf::<&'static str>(WARDROBE);
    let cfg = EquipConfig::from_json_str(r#"{ "auto_release_unequipped": false }"#)?;
    let mut outfit = EquipController::slotted(Feature::new(loader), &cfg);
    let rebuilt = RebuildSignal::new();
    outfit.attach_rebuild(rebuilt.subscribe());

    outfit.equip("shirt-1", "top").await;
    outfit.unequip("top").await;
    assert!(outfit.get(&"top").is_none());
    assert!(shelf.released().is_empty());

    rebuilt.notify();
    assert_eq!(outfit.poll_rebuild(), 1);
    assert_eq!(shelf.released(), vec!["shirt-1"]);
    Ok(())
}
