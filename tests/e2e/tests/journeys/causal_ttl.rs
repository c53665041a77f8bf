//! Causal TTL journey
//!
//! An edge with a zero TTL must be swept by cleanup and never traversed.

use mnemon_core::{RelationType, StoreInput, TraversalDirection, TraversalQuery};
use mnemon_e2e_tests::harness::TestEngine;

#[test]
fn zero_ttl_edge_is_cleaned_and_untraversable() {
    let t = TestEngine::new();

    let r = t
        .engine
        .store(StoreInput::from_content("the rain"))
        .unwrap();
    let c = t
        .engine
        .store(StoreInput::from_content("the wet street"))
        .unwrap();

    t.engine
        .add_causal(
            vec![r.id.clone()],
            vec![c.id.clone()],
            RelationType::Causes,
            0.9,
            Some(0),
        )
        .unwrap();

    // Expired immediately: traversal refuses it even before cleanup
    let paths = t
        .engine
        .traverse_causal(&TraversalQuery::from_entry(r.id.as_str()))
        .unwrap();
    assert!(paths.is_empty());
    assert_eq!(t.engine.get_expired_causal().unwrap().len(), 1);

    let cleaned = t.engine.cleanup_expired().unwrap();
    assert_eq!(cleaned.len(), 1);
    assert!(t.engine.get_expired_causal().unwrap().is_empty());

    let paths = t
        .engine
        .traverse_causal(&TraversalQuery::from_entry(r.id.as_str()))
        .unwrap();
    assert!(paths.is_empty());

    // A second sweep finds nothing
    assert!(t.engine.cleanup_expired().unwrap().is_empty());
}

#[test]
fn live_edges_traverse_with_strength_products() {
    let t = TestEngine::new();

    let a = t.engine.store(StoreInput::from_content("a")).unwrap();
    let b = t.engine.store(StoreInput::from_content("b")).unwrap();
    let c = t.engine.store(StoreInput::from_content("c")).unwrap();

    t.engine
        .add_causal(
            vec![a.id.clone()],
            vec![b.id.clone()],
            RelationType::Causes,
            0.9,
            None,
        )
        .unwrap();
    t.engine
        .add_causal(
            vec![b.id.clone()],
            vec![c.id.clone()],
            RelationType::Enables,
            0.8,
            None,
        )
        .unwrap();

    let paths = t.engine.find_paths(&a.id, &c.id, 5).unwrap();
    assert_eq!(paths.len(), 1);
    assert!((paths[0].total_strength - 0.72).abs() < 1e-9);
    assert_eq!(
        paths[0].edge_types,
        vec![RelationType::Causes, RelationType::Enables]
    );

    // Backward view from the effect
    let back = t
        .engine
        .traverse_causal(&TraversalQuery {
            direction: TraversalDirection::Backward,
            ..TraversalQuery::from_entry(c.id.as_str())
        })
        .unwrap();
    assert!(back
        .iter()
        .any(|p| p.nodes == vec![c.id.clone(), b.id.clone(), a.id.clone()]));
}

#[test]
fn active_edges_counted_from_persistence() {
    let t = TestEngine::new();

    let a = t.engine.store(StoreInput::from_content("cause")).unwrap();
    let b = t.engine.store(StoreInput::from_content("effect")).unwrap();
    t.engine
        .add_causal(
            vec![a.id.clone()],
            vec![b.id.clone()],
            RelationType::Triggers,
            0.7,
            None,
        )
        .unwrap();

    // Stats count the active edge straight from persistence
    let stats = t.engine.stats().unwrap();
    assert_eq!(stats.active_causal_edges, 1);
    assert_eq!(stats.expired_causal_edges, 0);
}
