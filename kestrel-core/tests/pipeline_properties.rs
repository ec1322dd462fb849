//! Cross-module invariant tests
//!
//! These exercise the pure halves of the pipeline against the properties
//! the components guarantee each other: chunk plans tile the source, the
//! search stays inside its hard bounds and terminates, and predictor state
//! is independent of completion order.

use kestrel_core::planning::segmenter::plan_from_cuts;
use kestrel_core::tq::{CrfPredictor, Probe, SearchStep, TQState};

fn probe(crf: u32, score: f64) -> Probe {
    Probe {
        crf,
        score,
        per_frame_scores: vec![score],
        encoded_size: 500_000,
    }
}

#[test]
fn chunk_plans_tile_for_many_cut_patterns() {
    let durations = [12.0, 33.3, 480.0, 3600.0, 7201.7];
    let cut_patterns: Vec<Vec<f64>> = vec![
        vec![],
        vec![0.5, 1.0, 1.5],
        (1..500).map(|i| i as f64 * 3.7).collect(),
        (1..100).map(|i| i as f64 * 47.3).collect(),
        vec![100.0, 100.2, 100.4, 3000.0],
    ];

    for &duration in &durations {
        for cuts in &cut_patterns {
            let plan = plan_from_cuts(duration, cuts, 5.0, 15.0, 0.5);
            plan.validate(23.976)
                .unwrap_or_else(|e| panic!("duration {} cuts {:?}: {}", duration, cuts.len(), e));

            // Segments stay within the window except the merged tail.
            for segment in &plan.segments[..plan.len().saturating_sub(1)] {
                assert!(
                    segment.duration <= 15.0 + 1e-6,
                    "oversized mid segment in duration {}",
                    duration
                );
            }
        }
    }
}

#[test]
fn search_terminates_within_bounds_for_hostile_scorers() {
    // Scorer models from cooperative to adversarial.
    let models: Vec<Box<dyn Fn(u32) -> f64>> = vec![
        Box::new(|crf| 95.0 - 0.6 * f64::from(crf)), // well-behaved
        Box::new(|_| 10.0),                          // always terrible
        Box::new(|_| 99.0),                          // always pristine
        Box::new(|crf| if crf % 2 == 0 { 90.0 } else { 60.0 }), // non-monotone
    ];

    for (model_index, model) in models.iter().enumerate() {
        let mut state = TQState::new(77.0, 2.0, 8, 48, 10, None);
        let mut iterations = 0;
        loop {
            iterations += 1;
            assert!(
                iterations <= 12,
                "model {} did not terminate",
                model_index
            );
            let crf = state.next_crf();
            assert!(
                (8..=48).contains(&crf),
                "model {} probed crf {} outside hard bounds",
                model_index,
                crf
            );
            if state.advance(probe(crf, model(crf))) != SearchStep::Continue {
                break;
            }
        }
        let chosen = state.choose_final().expect("probes were recorded");
        assert!((8..=48).contains(&chosen.crf));
    }
}

#[test]
fn converged_search_satisfies_the_quality_invariant() {
    let model = |crf: u32| 95.0 - 0.6 * f64::from(crf);
    let mut state = TQState::new(77.0, 2.0, 8, 48, 10, None);
    let mut rounds = 0;
    let outcome = loop {
        let crf = state.next_crf();
        rounds += 1;
        let step = state.advance(probe(crf, model(crf)));
        if step != SearchStep::Continue {
            break step;
        }
    };

    let chosen = state.choose_final().unwrap();
    // Either converged within tolerance, or the loop hit a hard stop.
    assert!(
        (chosen.score - 77.0).abs() <= 2.0
            || outcome == SearchStep::RoundLimit
            || outcome == SearchStep::Exhausted
    );
    assert!(rounds <= 10);
}

#[test]
fn predictor_state_is_order_independent_at_scale() {
    let completions: Vec<(usize, u32)> = (0..40)
        .map(|i| (i, 20 + ((i * 7) % 15) as u32))
        .collect();

    let mut forward = CrfPredictor::new(false);
    for &(index, crf) in &completions {
        forward.record(index, crf);
    }

    let mut shuffled = completions.clone();
    shuffled.reverse();
    shuffled.swap(3, 27);
    shuffled.swap(10, 31);
    let mut scrambled = CrfPredictor::new(false);
    for &(index, crf) in &shuffled {
        scrambled.record(index, crf);
    }

    for segment in 0..45 {
        assert_eq!(
            forward.predict(segment),
            scrambled.predict(segment),
            "order dependence at segment {}",
            segment
        );
    }
}

#[test]
fn disabled_prediction_widens_bounds_to_the_full_qp_range() {
    let predictor = CrfPredictor::new(true);
    assert_eq!(predictor.predict(5), None);

    // With no prediction the state opens at the full range.
    let state = TQState::new(77.0, 2.0, 8, 48, 10, predictor.predict(5));
    assert_eq!(state.search_min, 8);
    assert_eq!(state.search_max, 48);

    // With prediction enabled, bounds narrow around the neighbor's CRF.
    let mut enabled = CrfPredictor::new(false);
    enabled.record(4, 30);
    let narrowed = TQState::new(77.0, 2.0, 8, 48, 10, enabled.predict(5));
    assert_eq!(narrowed.search_min, 25);
    assert_eq!(narrowed.search_max, 35);
}
