//! Drift and rollback journey
//!
//! Sustained one-sided feedback bends the weight vector away from its
//! baseline: the alert band writes a checkpoint, the critical threshold
//! rolls back to it, and the engine never stays critical.

use mnemon_core::{DriftStatus, EngineEvent, QueryOptions};
use mnemon_e2e_tests::harness::TestEngine;

#[test]
fn sustained_feedback_alerts_then_rolls_back() {
    let t = TestEngine::with_config(|config| {
        // Fast enough to cross both thresholds in a short journey
        config.sona.learning_rate = 0.1;
    });
    let mut events = t.engine.subscribe();

    // One pattern pushed up, four pushed down; the asymmetry is what bends
    // the weight vector away from the neutral baseline
    t.store_pinned("the sun came out", vec![1.0, 0.0, 0.0, 0.0]);
    for i in 0..4 {
        t.store_pinned(&format!("rain report {i}"), vec![0.0, 1.0, 0.0, 0.0]);
    }
    t.embedder.pin("sunshine", vec![1.0, 0.0, 0.0, 0.0]);
    t.embedder.pin("rainfall", vec![0.0, 1.0, 0.0, 0.0]);

    let mut saw_alert = false;
    let mut rollback_report = None;

    for _ in 0..20 {
        let up = t.engine.query("sunshine", QueryOptions::default()).unwrap();
        let up_report = t
            .engine
            .learn(&up.trajectory_id.expect("trajectory"), 1.0)
            .unwrap();

        let down = t.engine.query("rainfall", QueryOptions::default()).unwrap();
        let down_report = t
            .engine
            .learn(&down.trajectory_id.expect("trajectory"), 0.0)
            .unwrap();

        for report in [&up_report, &down_report] {
            if report.checkpoint_written {
                saw_alert = true;
            }
        }
        if up_report.rollback_performed {
            rollback_report = Some(up_report);
        } else if down_report.rollback_performed {
            rollback_report = Some(down_report);
        }
        if rollback_report.is_some() {
            break;
        }
    }

    assert!(saw_alert, "alert checkpoint was never written");
    let report = rollback_report.expect("critical rollback never performed");

    // Never left critical: the restore landed back inside the safe band
    assert!(report.drift < t.engine.config().sona.drift_critical);
    assert_ne!(report.drift_status, DriftStatus::Critical);

    // Both transitions surfaced as structured events
    let mut alert_seen = false;
    let mut rollback_seen = false;
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::DriftAlert { .. } => alert_seen = true,
            EngineEvent::DriftRollback { restored_drift, .. } => {
                rollback_seen = true;
                assert!(restored_drift < t.engine.config().sona.drift_critical);
            }
            _ => {}
        }
    }
    assert!(alert_seen);
    assert!(rollback_seen);
}

#[test]
fn duplicate_trajectory_feedback_is_benign() {
    let t = TestEngine::new();
    t.store_pinned("a steady fact", vec![0.0, 0.0, 1.0, 0.0]);
    t.embedder.pin("steady", vec![0.0, 0.0, 1.0, 0.0]);

    let outcome = t.engine.query("steady", QueryOptions::default()).unwrap();
    let trajectory_id = outcome.trajectory_id.unwrap();

    let first = t.engine.learn(&trajectory_id, 0.8).unwrap();
    assert!(!first.already_applied);

    let second = t.engine.learn(&trajectory_id, 0.2).unwrap();
    assert!(second.already_applied);
    assert_eq!(second.message, "already-applied");
}
