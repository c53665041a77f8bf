//! Pure retrieval journey
//!
//! Three entries with orthogonal synthetic embeddings; querying along one
//! axis must rank its entry first and open a trajectory. Also covers the
//! store -> delete -> query law.

use mnemon_core::{QueryOptions, RetrievalStrategy};
use mnemon_e2e_tests::harness::TestEngine;

#[test]
fn pure_retrieval_orders_by_similarity() {
    let t = TestEngine::with_config(|config| {
        // Keep orthogonal (zero-similarity) candidates rankable
        config.memrl.delta = 0.0;
    });

    let a = t.store_pinned("A", vec![1.0, 0.0, 0.0, 0.0]);
    let b = t.store_pinned("B", vec![0.0, 1.0, 0.0, 0.0]);
    let c = t.store_pinned("C", vec![0.0, 0.0, 1.0, 0.0]);

    let outcome = t
        .engine
        .query(
            "A",
            QueryOptions {
                top_k: 2,
                ..Default::default()
            },
        )
        .unwrap();

    assert!(!outcome.degraded);
    assert_eq!(outcome.matches.len(), 2);
    assert_eq!(outcome.matches[0].entry.id, a);
    assert!(outcome.matches[0].score > 0.95);
    assert!([b.clone(), c.clone()].contains(&outcome.matches[1].entry.id));

    let trajectory_id = outcome.trajectory_id.expect("trajectory opened");
    assert!(!trajectory_id.is_empty());
}

#[test]
fn exact_text_returns_top_one() {
    let t = TestEngine::new();
    let id = t
        .engine
        .store(mnemon_core::StoreInput::from_content(
            "the exact text of this memory",
        ))
        .unwrap()
        .id;
    t.engine
        .store(mnemon_core::StoreInput::from_content(
            "a completely unrelated note",
        ))
        .unwrap();

    let outcome = t
        .engine
        .query("the exact text of this memory", QueryOptions::default())
        .unwrap();
    assert_eq!(outcome.matches[0].entry.id, id);
    assert!(outcome.matches[0].score > 0.95);
}

#[test]
fn deleted_entries_vanish_from_results() {
    let t = TestEngine::with_config(|config| {
        config.memrl.delta = 0.0;
    });

    let a = t.store_pinned("A", vec![1.0, 0.0, 0.0, 0.0]);
    t.store_pinned("B", vec![0.0, 1.0, 0.0, 0.0]);

    assert!(t.engine.delete(&a).unwrap());

    let outcome = t.engine.query("A", QueryOptions::default()).unwrap();
    assert!(outcome.matches.iter().all(|m| m.entry.id != a));
    // No dangling vector label
    assert_eq!(t.engine.stats().unwrap().indexed_vectors, 1);
}

#[test]
fn routes_fall_out_of_cue_phrases() {
    let t = TestEngine::new();
    t.engine
        .store(mnemon_core::StoreInput::from_content("deploys fail on fridays"))
        .unwrap();

    let outcome = t
        .engine
        .query("why do deploys fail", QueryOptions::default())
        .unwrap();
    assert_eq!(outcome.route, RetrievalStrategy::CausalBackward);

    let outcome = t
        .engine
        .query("deploys and fridays", QueryOptions::default())
        .unwrap();
    assert_eq!(outcome.route, RetrievalStrategy::Hybrid);
}
