//! Infers removal times and transition rates for a synthetic SIR-type epidemic with
//! Metropolis-within-Gibbs, then prints posterior summaries.
//!
//! Infections are observed; removal times are latent and updated by the event-time
//! move kernel, the two rates by a log random walk.

use std::error::Error;
use std::sync::Arc;

use epidemic_mcmc::core::sample_chain_with_progress;
use epidemic_mcmc::event_times::{EventTimesConfig, UncalibratedEventTimesUpdate};
use epidemic_mcmc::events::{totals, EventTensor};
use epidemic_mcmc::gibbs::{
    block_kernel, BlockKernel, BlockTarget, KernelFactory, MetropolisWithinGibbs, StatePart,
    StateView,
};
use epidemic_mcmc::metropolis_hastings::MetropolisHastings;
use epidemic_mcmc::random_walk::{RandomWalkConfig, UncalibratedLogRandomWalk};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{arr1, Array1, Array2, Array3, Axis};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Geometric, Poisson};
use tracing::info;
use tracing_subscriber::EnvFilter;

const NUM_TIMES: usize = 30;
const NUM_SUBPOPULATIONS: usize = 4;
const INFECTION: usize = 0;
const REMOVAL: usize = 1;

const TRUE_INFECTION_RATE: f64 = 3.0;
const TRUE_REMOVAL_HAZARD: f64 = 0.25;

const N_STEPS: usize = 20_000;
const BURNIN: usize = 5_000;
const SEED: u64 = 42;

/// Poisson infections in every cell; each infective is removed after a geometric
/// delay of at least one step, or not at all within the window.
fn simulate(rng: &mut SmallRng) -> Result<EventTensor, Box<dyn Error>> {
    let infections = Poisson::new(TRUE_INFECTION_RATE)?;
    let delay = Geometric::new(1.0 - (-TRUE_REMOVAL_HAZARD).exp())?;

    let mut events = Array3::<u64>::zeros((NUM_TIMES, NUM_SUBPOPULATIONS, 2));
    for t in 0..NUM_TIMES {
        for m in 0..NUM_SUBPOPULATIONS {
            let n = infections.sample(rng) as u64;
            events[[t, m, INFECTION]] = n;
            for _ in 0..n {
                let removal_t = t + 1 + delay.sample(rng) as usize;
                if removal_t < NUM_TIMES {
                    events[[removal_t, m, REMOVAL]] += 1;
                }
            }
        }
    }
    Ok(events)
}

fn ln_choose(n: u64, k: u64) -> f64 {
    (1..=k)
        .map(|j| ((n - k + j) as f64 / j as f64).ln())
        .sum()
}

fn log_gamma_prior(x: f64, shape: f64, rate: f64) -> f64 {
    (shape - 1.0) * x.ln() - rate * x
}

fn infection_log_lik(events: &EventTensor, rate: f64) -> f64 {
    let n = events.index_axis(Axis(2), INFECTION).sum() as f64;
    let cells = (NUM_TIMES * NUM_SUBPOPULATIONS) as f64;
    n * rate.ln() - cells * rate
}

/// Binomial removals out of the pool infected before each timepoint.
fn removal_log_lik(events: &EventTensor, hazard: f64) -> f64 {
    let p = 1.0 - (-hazard).exp();
    let mut pool = Array1::<u64>::zeros(events.len_of(Axis(1)));
    let mut ll = 0.0;
    for counts in events.axis_iter(Axis(0)) {
        for (m, pool_m) in pool.iter_mut().enumerate() {
            let removed = counts[[m, REMOVAL]];
            if removed > *pool_m {
                return f64::NEG_INFINITY;
            }
            ll += ln_choose(*pool_m, removed)
                + removed as f64 * p.ln()
                - (*pool_m - removed) as f64 * hazard;
            *pool_m = *pool_m - removed + counts[[m, INFECTION]];
        }
    }
    ll
}

fn log_joint(parts: &[StateView<'_>]) -> f64 {
    let [StateView::Parameters(rates), StateView::Events(events)] = parts else {
        return f64::NEG_INFINITY;
    };
    let (rate, hazard) = (rates[0], rates[1]);
    log_gamma_prior(rate, 2.0, 0.5)
        + log_gamma_prior(hazard, 2.0, 4.0)
        + infection_log_lik(events, rate)
        + removal_log_lik(events, hazard)
}

fn mean_removal_time(events: &EventTensor) -> f64 {
    let removals = events.index_axis(Axis(2), REMOVAL);
    let weighted: u64 = removals
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(t, counts)| t as u64 * counts.sum())
        .sum();
    weighted as f64 / removals.sum() as f64
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut rng = SmallRng::seed_from_u64(SEED);
    let observed = simulate(&mut rng)?;
    info!(
        infections = totals(&observed, INFECTION).sum(),
        removals = totals(&observed, REMOVAL).sum(),
        "simulated epidemic"
    );

    let rate_config = RandomWalkConfig::new(Array2::eye(2) * 0.01);
    let removal_config = EventTimesConfig::new(REMOVAL).with_prev_index(INFECTION);
    let factories: Vec<KernelFactory> = vec![
        Box::new(move |target: BlockTarget| -> epidemic_mcmc::Result<BlockKernel> {
            let inner = UncalibratedLogRandomWalk::new(target, rate_config.clone())?;
            Ok(block_kernel(MetropolisHastings::new(inner)))
        }),
        Box::new(move |target: BlockTarget| -> epidemic_mcmc::Result<BlockKernel> {
            let inner = UncalibratedEventTimesUpdate::new(target, removal_config);
            Ok(block_kernel(MetropolisHastings::new(inner)))
        }),
    ];
    let kernel = MetropolisWithinGibbs::new(Arc::new(log_joint), factories);

    let initial_state = vec![
        StatePart::Parameters(arr1(&[1.0, 1.0])),
        StatePart::Events(observed.clone()),
    ];

    let pb = ProgressBar::new(N_STEPS as u64);
    pb.set_prefix("Gibbs");
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("##-"),
    );
    let trace = sample_chain_with_progress(&kernel, initial_state, N_STEPS, &mut rng, &pb)?;

    let kept = &trace.states[BURNIN..];
    let rate_mean = kept
        .iter()
        .filter_map(|state| state[0].as_parameters())
        .fold(Array1::<f64>::zeros(2), |acc, x| acc + x)
        / kept.len() as f64;
    let removal_time_mean = kept
        .iter()
        .filter_map(|state| state[1].as_events())
        .map(mean_removal_time)
        .sum::<f64>()
        / kept.len() as f64;

    println!("Kept {} of {} sweeps", kept.len(), trace.len());
    println!(
        "Infection rate: posterior mean {:.3} (true {:.3})",
        rate_mean[0], TRUE_INFECTION_RATE
    );
    println!(
        "Removal hazard: posterior mean {:.3} (true {:.3})",
        rate_mean[1], TRUE_REMOVAL_HAZARD
    );
    println!(
        "Mean removal time: posterior {:.2}, simulated {:.2}",
        removal_time_mean,
        mean_removal_time(&observed)
    );

    for (block, name) in ["rates", "removal times"].iter().enumerate() {
        let accepted = trace.results[BURNIN..]
            .iter()
            .filter(|results| results[block].is_accepted() == Some(true))
            .count();
        println!(
            "Acceptance rate ({name}): {:.3}",
            accepted as f64 / kept.len() as f64
        );
    }
    Ok(())
}
