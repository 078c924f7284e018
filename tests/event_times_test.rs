use approx::assert_abs_diff_eq;
use epidemic_mcmc::core::{sample_chain, TransitionKernel};
use epidemic_mcmc::event_times::{EventTimesConfig, UncalibratedEventTimesUpdate};
use epidemic_mcmc::events::EventTensor;
use epidemic_mcmc::metropolis_hastings::MetropolisHastings;
use ndarray::{Array1, Array3, Axis};
use rand::rngs::SmallRng;
use rand::SeedableRng;

/// Ten events at `t = 2` on a five-step axis, one subpopulation, one transition.
fn concentrated() -> EventTensor {
    let mut events = Array3::<u64>::zeros((5, 1, 1));
    events[[2, 0, 0]] = 10;
    events
}

fn flat(_: &EventTensor) -> f64 {
    0.0
}

#[test]
fn flat_target_spreads_mass_uniformly() {
    const N_STEPS: usize = 50_000;
    const BURNIN: usize = 5_000;

    let kernel = MetropolisHastings::new(UncalibratedEventTimesUpdate::new(
        flat,
        EventTimesConfig::new(0),
    ));
    let mut rng = SmallRng::seed_from_u64(42);
    let trace = sample_chain(&kernel, concentrated(), N_STEPS, &mut rng).unwrap();

    for state in &trace.states {
        assert_eq!(state.dim(), (5, 1, 1));
        assert_eq!(state.sum(), 10);
    }

    // Under a flat target every composition of 10 into 5 cells is equally
    // likely, so each cell has mean 2.
    let kept = &trace.states[BURNIN..];
    let mut mean = Array1::<f64>::zeros(5);
    for state in kept {
        mean += &state.index_axis(Axis(2), 0).index_axis(Axis(1), 0).mapv(|c| c as f64);
    }
    mean /= kept.len() as f64;
    assert_abs_diff_eq!(mean, Array1::from_elem(5, 2.0), epsilon = 0.5);

    // the boundary cells were reached
    assert!(kept.iter().any(|s| s[[0, 0, 0]] > 0));
    assert!(kept.iter().any(|s| s[[4, 0, 0]] > 0));
}

#[test]
fn same_seed_reproduces_proposals() {
    let kernel = UncalibratedEventTimesUpdate::new(flat, EventTimesConfig::new(0));
    let run = |seed: u64| {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut state = concentrated();
        let mut draws = Vec::new();
        for _ in 0..500 {
            let event_move = kernel.propose(&state, &mut rng).unwrap().unwrap();
            let (next, results) = kernel.apply(&state, &event_move).unwrap();
            if results.target_log_prob.is_finite() {
                state = next;
            }
            draws.push((event_move.from_t, event_move.direction, event_move.n_move[0]));
        }
        draws
    };
    assert_eq!(run(7), run(7));
    assert_ne!(run(7), run(8));
}

#[test]
fn same_seed_reproduces_chains() {
    let kernel = MetropolisHastings::new(UncalibratedEventTimesUpdate::new(
        flat,
        EventTimesConfig::new(0),
    ));
    let run = |seed: u64| {
        let mut rng = SmallRng::seed_from_u64(seed);
        sample_chain(&kernel, concentrated(), 1_000, &mut rng).unwrap()
    };
    assert_eq!(run(123), run(123));
}

#[test]
fn boundary_proposals_are_rejected() {
    let kernel = MetropolisHastings::new(UncalibratedEventTimesUpdate::new(
        |events: &EventTensor| events[[0, 0, 0]] as f64,
        EventTimesConfig::new(0),
    ));
    let mut events = Array3::<u64>::zeros((3, 1, 1));
    events[[0, 0, 0]] = 4;
    let mut rng = SmallRng::seed_from_u64(1);
    let mut results = kernel.bootstrap_results(&events).unwrap();
    let mut state = events;
    for _ in 0..2_000 {
        (state, results) = kernel.one_step(&state, &results, &mut rng).unwrap();
        assert_eq!(state.sum(), 4);
        assert!(results.target_log_prob().unwrap().is_finite());
    }
}
