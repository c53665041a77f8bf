//! Provenance and L-Score journey
//!
//! Root -> child -> grandchild chain with pinned confidences; depths and
//! reliability scores must follow the lineage math.

use mnemon_core::{QueryOptions, StoreInput};
use mnemon_e2e_tests::harness::TestEngine;

#[test]
fn lineage_depths_and_l_scores() {
    let t = TestEngine::new();

    let root = t
        .engine
        .store(StoreInput {
            content: "root observation".to_string(),
            confidence: 1.0,
            relevance: 1.0,
            ..Default::default()
        })
        .unwrap();

    let child = t
        .engine
        .store(StoreInput {
            content: "derived summary".to_string(),
            confidence: 0.8,
            relevance: 0.9,
            parents: vec![root.id.clone()],
            ..Default::default()
        })
        .unwrap();

    let grandchild = t
        .engine
        .store(StoreInput {
            content: "second-order conclusion".to_string(),
            confidence: 0.7,
            relevance: 0.8,
            parents: vec![child.id.clone()],
            ..Default::default()
        })
        .unwrap();

    let root_report = t.engine.trace_lineage(&root.id, None).unwrap();
    assert!((root_report.l_score - 1.0).abs() < 1e-9);
    assert!(root_report.ancestors.is_empty());

    let child_report = t.engine.trace_lineage(&child.id, None).unwrap();
    // 0.8 * 0.9 * 0.9^1
    assert!((child_report.l_score - 0.648).abs() < 1e-6);
    assert_eq!(child_report.ancestors.len(), 1);
    assert_eq!(child_report.ancestors[0].entry_id, root.id);
    assert_eq!(child_report.ancestors[0].lineage_depth, 0);

    let gc_report = t.engine.trace_lineage(&grandchild.id, None).unwrap();
    assert!(gc_report.l_score <= child_report.l_score * 0.9 + 1e-9);
    assert!(gc_report.l_score > 0.0);
    let depths: Vec<i64> = gc_report
        .ancestors
        .iter()
        .map(|a| a.lineage_depth)
        .collect();
    assert_eq!(depths, vec![1, 0]);
}

#[test]
fn confidence_edit_propagates_to_descendants() {
    let t = TestEngine::new();

    let root = t
        .engine
        .store(StoreInput::from_content("root for propagation"))
        .unwrap();
    let child = t
        .engine
        .store(StoreInput {
            content: "leaning on the root".to_string(),
            confidence: 0.9,
            relevance: 1.0,
            parents: vec![root.id.clone()],
            ..Default::default()
        })
        .unwrap();
    let grandchild = t
        .engine
        .store(StoreInput {
            content: "leaning further".to_string(),
            confidence: 0.9,
            relevance: 1.0,
            parents: vec![child.id.clone()],
            ..Default::default()
        })
        .unwrap();

    let before = t.engine.trace_lineage(&grandchild.id, None).unwrap().l_score;

    t.engine
        .edit(
            &child.id,
            mnemon_core::EntryPatch {
                confidence: Some(0.2),
                ..Default::default()
            },
        )
        .unwrap();

    let after = t.engine.trace_lineage(&grandchild.id, None).unwrap().l_score;
    assert!(after < before, "descendant reliability must drop");
}

#[test]
fn unreliable_entries_fall_out_of_queries() {
    let t = TestEngine::new();

    let root = t
        .engine
        .store(StoreInput::from_content("shaky root"))
        .unwrap();
    let child = t
        .engine
        .store(StoreInput {
            content: "conclusion built on sand".to_string(),
            confidence: 0.2,
            relevance: 0.5,
            parents: vec![root.id.clone()],
            ..Default::default()
        })
        .unwrap();

    // l = 0.2 * 0.5 * 0.9 = 0.09, far below the 0.3 reliability floor
    let outcome = t
        .engine
        .query("conclusion built on sand", QueryOptions::default())
        .unwrap();
    assert!(outcome.matches.iter().all(|m| m.entry.id != child.id));
}
