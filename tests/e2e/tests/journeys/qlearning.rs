//! Q-learning convergence journey
//!
//! One reward advances every retrieved entry's Q-value by the EMA step;
//! a duplicate reward is a benign no-op.

use mnemon_core::QueryOptions;
use mnemon_e2e_tests::harness::TestEngine;

fn normalized(v: [f32; 4]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.iter().map(|x| x / norm).collect()
}

#[test]
fn reward_advances_q_values_once() {
    let t = TestEngine::new();

    // Three entries clustered around the query axis so all survive phase A
    let x = t.store_pinned("x", vec![1.0, 0.0, 0.0, 0.0]);
    let y = t.store_pinned("y", normalized([0.8, 0.6, 0.0, 0.0]));
    let z = t.store_pinned("z", normalized([0.6, 0.8, 0.0, 0.0]));

    t.embedder.pin("the x axis", vec![1.0, 0.0, 0.0, 0.0]);
    let outcome = t.engine.query("the x axis", QueryOptions::default()).unwrap();

    let ids: Vec<&str> = outcome.matches.iter().map(|m| m.entry.id.as_str()).collect();
    for id in [&x, &y, &z] {
        assert!(ids.contains(&id.as_str()), "all three clustered entries retrieved");
    }
    for m in &outcome.matches {
        assert!((m.entry.q_value - 0.5).abs() < 1e-9);
    }

    let query_id = outcome.memrl_query_id.expect("memrl snapshot persisted");

    let first = t.engine.provide_memrl_feedback(&query_id, 1.0, None).unwrap();
    assert!(first.applied);
    assert_eq!(first.entries_updated, 3);

    // q = 0.5 + 0.1 (1.0 - 0.5) = 0.55 for each retrieved entry
    let refreshed = t.engine.query("the x axis", QueryOptions::default()).unwrap();
    for m in &refreshed.matches {
        assert!(
            (m.entry.q_value - 0.55).abs() < 1e-9,
            "entry {} expected q 0.55, got {}",
            m.entry.id,
            m.entry.q_value
        );
    }

    let second = t.engine.provide_memrl_feedback(&query_id, 1.0, None).unwrap();
    assert!(!second.applied);
    assert_eq!(second.message, "already-applied");

    let unchanged = t.engine.query("the x axis", QueryOptions::default()).unwrap();
    for m in &unchanged.matches {
        assert!((m.entry.q_value - 0.55).abs() < 1e-9);
    }
}

#[test]
fn repeated_rewards_converge_upward() {
    let t = TestEngine::new();
    let id = t.store_pinned("fact", vec![0.0, 0.0, 0.0, 1.0]);
    t.embedder.pin("find the fact", vec![0.0, 0.0, 0.0, 1.0]);

    let mut last_q = 0.5;
    for _ in 0..5 {
        let outcome = t
            .engine
            .query("find the fact", QueryOptions::default())
            .unwrap();
        let query_id = outcome.memrl_query_id.expect("memrl snapshot");
        t.engine.provide_memrl_feedback(&query_id, 1.0, None).unwrap();

        let m = t
            .engine
            .query("find the fact", QueryOptions::default())
            .unwrap();
        let q = m
            .matches
            .iter()
            .find(|m| m.entry.id == id)
            .expect("entry retrieved")
            .entry
            .q_value;
        assert!(q > last_q, "q must climb toward the reward");
        assert!(q <= 1.0);
        last_q = q;
    }
}
