//! Shadow contradiction journey
//!
//! Opposite embeddings must land on opposite sides of the report: the
//! aligned entry supports, the negated entry contradicts as a direct
//! negation, and credibility sinks below the midpoint.

use mnemon_core::shadow::ContradictionClass;
use mnemon_e2e_tests::harness::TestEngine;

#[test]
fn opposed_entries_split_into_support_and_contradiction() {
    let t = TestEngine::new();

    let a = t.store_pinned("the sky is blue", vec![1.0, 0.0, 0.0, 0.0]);
    let b = t.store_pinned("the sky is never blue", vec![-1.0, 0.0, 0.0, 0.0]);

    let report = t.engine.shadow_search("the sky is blue", 5).unwrap();

    assert_eq!(report.supports[0].entry_id, a);
    assert!(report.supports[0].score > 0.95);

    let contradiction = &report.contradictions[0];
    assert_eq!(contradiction.entry_id, b);
    assert!(contradiction.strength > 0.95);
    assert_eq!(
        contradiction.classification,
        ContradictionClass::DirectNegation
    );

    assert!(report.credibility < 0.5);
}

#[test]
fn uncontradicted_claims_stay_credible() {
    let t = TestEngine::new();
    let a = t.store_pinned("water is wet", vec![0.0, 1.0, 0.0, 0.0]);

    let report = t.engine.shadow_search("water is wet", 5).unwrap();
    assert_eq!(report.supports[0].entry_id, a);
    assert!(report.credibility > 0.9);
}

#[test]
fn weaker_opposition_classifies_below_negation() {
    let t = TestEngine::new();

    t.store_pinned("deploys are safe", vec![1.0, 0.0, 0.0, 0.0]);
    // Normalized vector at ~0.7 opposition
    let norm = (0.49f32 + 0.51f32).sqrt();
    t.store_pinned(
        "deploys sometimes break",
        vec![-0.7 / norm, (0.51f32).sqrt() / norm, 0.0, 0.0],
    );

    let report = t.engine.shadow_search("deploys are safe", 5).unwrap();
    let contradiction = report
        .contradictions
        .iter()
        .find(|c| c.strength > 0.4)
        .expect("partial opposition found");
    assert!(matches!(
        contradiction.classification,
        ContradictionClass::Counterargument | ContradictionClass::Alternative
    ));
    assert!(report.credibility < 1.0);
}
