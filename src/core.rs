//! Traits shared by every kernel, plus small helpers for running a kernel for a
//! fixed number of steps.

use indicatif::ProgressBar;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::event_times::EventTimesConfig;
use crate::random_walk::RandomWalkConfig;

/// A log joint density over states of type `S`, up to an additive constant.
pub trait Target<S: ?Sized> {
    /// Returns the unnormalized log density at `state`.
    fn unnorm_log_prob(&self, state: &S) -> f64;
}

impl<S: ?Sized, F> Target<S> for F
where
    F: Fn(&S) -> f64,
{
    fn unnorm_log_prob(&self, state: &S) -> f64 {
        self(state)
    }
}

/// A Markov transition kernel.
///
/// `one_step` never mutates its inputs: it returns the next state together with
/// the results record describing it. All randomness comes from `rng`, so two runs
/// fed identically seeded generators produce identical chains.
pub trait TransitionKernel {
    type State;
    type Results;

    /// Advances the chain by one step.
    fn one_step(
        &self,
        current_state: &Self::State,
        previous_results: &Self::Results,
        rng: &mut dyn RngCore,
    ) -> Result<(Self::State, Self::Results)>;

    /// Builds the results record for the initial state.
    fn bootstrap_results(&self, init_state: &Self::State) -> Result<Self::Results>;

    /// `false` for raw proposals that still need an acceptance step.
    fn is_calibrated(&self) -> bool;

    /// The construction arguments, for logging by the caller.
    fn parameters(&self) -> KernelParameters;
}

/// Construction arguments of a kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kernel", rename_all = "snake_case")]
pub enum KernelParameters {
    EventTimes(EventTimesConfig),
    RandomWalk(RandomWalkConfig),
    LogRandomWalk(RandomWalkConfig),
    MetropolisHastings { inner: Box<KernelParameters> },
    MetropolisWithinGibbs { num_blocks: usize },
}

/// States and results visited by [`sample_chain`].
///
/// Entry `i` holds the state and results after step `i + 1`; the initial state is
/// not repeated.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTrace<S, R> {
    pub states: Vec<S>,
    pub results: Vec<R>,
}

impl<S, R> ChainTrace<S, R> {
    fn with_capacity(n_steps: usize) -> Self {
        Self {
            states: Vec::with_capacity(n_steps),
            results: Vec::with_capacity(n_steps),
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// The last state of the chain, if any step was taken.
    pub fn last_state(&self) -> Option<&S> {
        self.states.last()
    }
}

/// Bootstraps `kernel` at `initial_state` and applies `n_steps` transitions.
pub fn sample_chain<K>(
    kernel: &K,
    initial_state: K::State,
    n_steps: usize,
    rng: &mut dyn RngCore,
) -> Result<ChainTrace<K::State, K::Results>>
where
    K: TransitionKernel,
    K::State: Clone,
    K::Results: Clone,
{
    run(kernel, initial_state, n_steps, rng, |_| {})
}

/// Like [`sample_chain`], but advances `pb` after every step.
pub fn sample_chain_with_progress<K>(
    kernel: &K,
    initial_state: K::State,
    n_steps: usize,
    rng: &mut dyn RngCore,
    pb: &ProgressBar,
) -> Result<ChainTrace<K::State, K::Results>>
where
    K: TransitionKernel,
    K::State: Clone,
    K::Results: Clone,
{
    pb.set_length(n_steps as u64);
    let trace = run(kernel, initial_state, n_steps, rng, |_| pb.inc(1))?;
    pb.finish_with_message("Done!");
    Ok(trace)
}

fn run<K, F>(
    kernel: &K,
    initial_state: K::State,
    n_steps: usize,
    rng: &mut dyn RngCore,
    mut on_step: F,
) -> Result<ChainTrace<K::State, K::Results>>
where
    K: TransitionKernel,
    K::State: Clone,
    K::Results: Clone,
    F: FnMut(usize),
{
    let mut results = kernel.bootstrap_results(&initial_state)?;
    let mut state = initial_state;
    let mut trace = ChainTrace::with_capacity(n_steps);

    for i in 0..n_steps {
        let (next_state, next_results) = kernel.one_step(&state, &results, rng)?;
        trace.states.push(next_state.clone());
        trace.results.push(next_results.clone());
        state = next_state;
        results = next_results;
        on_step(i);
    }

    Ok(trace)
}
