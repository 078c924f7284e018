/*!
# Event-time move kernel

[`UncalibratedEventTimesUpdate`] proposes shifting a random number of events of one
transition between adjacent timepoints, in every subpopulation at once:

1. pick a timepoint uniformly among those holding any events of the target
   transition;
2. pick a direction, one step back or forward in time, with equal probability;
3. bound the number of movable events per subpopulation with
   [`max_free_events`], using the previous transition as the constraint for a
   backward move and the next transition for a forward one;
4. draw the number to move uniformly from `0..=n_max` in each subpopulation.

The proposal is asymmetric, so the kernel reports the log Hastings correction

```text
ln(K / K') + sum_m [ ln(n_max[m] + 1) - ln(n_max'[m] + 1) ]
```

where `K`, `K'` count the non-empty timepoints before and after the move and
`n_max'` is the bound recomputed at the destination with the same constraint.

A move whose destination falls outside the time axis gets a target log
probability of `-inf`, so the acceptance step always rejects it. When the target
transition has no events at all the step is a self-transition with zero
correction.

The kernel is uncalibrated: wrap it in
[`MetropolisHastings`](crate::metropolis_hastings::MetropolisHastings).

# Examples

```rust
use epidemic_mcmc::core::TransitionKernel;
use epidemic_mcmc::event_times::{EventTimesConfig, UncalibratedEventTimesUpdate};
use epidemic_mcmc::events::EventTensor;
use ndarray::Array3;
use rand::rngs::SmallRng;
use rand::SeedableRng;

let mut events = Array3::<u64>::zeros((5, 1, 1));
events[[2, 0, 0]] = 10;

let flat = |_: &EventTensor| 0.0;
let kernel = UncalibratedEventTimesUpdate::new(flat, EventTimesConfig::new(0));
let results = kernel.bootstrap_results(&events).unwrap();

let mut rng = SmallRng::seed_from_u64(42);
let (next, _) = kernel.one_step(&events, &results, &mut rng).unwrap();
assert_eq!(next.sum(), 10);
```
*/

use ndarray::{Array1, Axis};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::core::{KernelParameters, Target, TransitionKernel};
use crate::error::Result;
use crate::events::{
    check_transition, max_free_events, move_events, nonempty_timepoints, EventTensor,
};
use crate::results::UncalibratedResults;

/// Which transition to move, and which transitions bound it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTimesConfig {
    /// Position of the moved transition on the last tensor axis.
    pub target_index: usize,
    /// Transition that must stay ahead of the target; bounds backward moves.
    #[serde(default)]
    pub prev_index: Option<usize>,
    /// Transition that must stay behind the target; bounds forward moves.
    #[serde(default)]
    pub next_index: Option<usize>,
}

impl EventTimesConfig {
    /// An unconstrained configuration for `target_index`.
    pub fn new(target_index: usize) -> Self {
        Self {
            target_index,
            prev_index: None,
            next_index: None,
        }
    }

    pub fn with_prev_index(mut self, prev_index: usize) -> Self {
        self.prev_index = Some(prev_index);
        self
    }

    pub fn with_next_index(mut self, next_index: usize) -> Self {
        self.next_index = Some(next_index);
        self
    }

    /// Constraint time and transition for a move from `from_t` to `to_t`.
    pub fn constraint(
        &self,
        from_t: usize,
        to_t: usize,
        direction: Direction,
    ) -> (usize, Option<usize>) {
        match direction {
            Direction::Backward => (to_t, self.prev_index),
            Direction::Forward => (from_t, self.next_index),
        }
    }
}

/// Direction of an event-time move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Backward,
    Forward,
}

impl Direction {
    /// The timepoint one step from `t`, or `None` outside `[0, num_times)`.
    pub fn destination(self, t: usize, num_times: usize) -> Option<usize> {
        match self {
            Direction::Backward => t.checked_sub(1),
            Direction::Forward => Some(t + 1).filter(|&to| to < num_times),
        }
    }
}

/// A drawn move: where from, which way, and how many events per subpopulation.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMove {
    pub from_t: usize,
    pub direction: Direction,
    /// `None` when the destination lies outside the time axis.
    pub to_t: Option<usize>,
    /// Bound on the number of movable events, per subpopulation.
    pub n_max: Array1<u64>,
    /// Number of events moved, per subpopulation.
    pub n_move: Array1<u64>,
}

/// Uncalibrated random walk over the event times of one transition.
#[derive(Debug, Clone)]
pub struct UncalibratedEventTimesUpdate<D> {
    target: D,
    config: EventTimesConfig,
}

impl<D> UncalibratedEventTimesUpdate<D>
where
    D: Target<EventTensor>,
{
    pub fn new(target: D, config: EventTimesConfig) -> Self {
        Self { target, config }
    }

    pub fn config(&self) -> &EventTimesConfig {
        &self.config
    }

    /// Draws a move from `current`, or `None` if the target transition has no
    /// events anywhere.
    ///
    /// Draw order is timepoint, direction, then one count per subpopulation.
    /// Nothing is drawn when there are no events, and no counts are drawn when
    /// the destination is off the time axis.
    pub fn propose(
        &self,
        current: &EventTensor,
        rng: &mut dyn RngCore,
    ) -> Result<Option<EventMove>> {
        self.check_shape(current)?;
        let target_index = self.config.target_index;
        let num_times = current.len_of(Axis(0));
        let num_meta = current.len_of(Axis(1));

        let occupied: Vec<usize> = nonempty_timepoints(current, target_index)
            .indexed_iter()
            .filter(|&(_, &p)| p > 0)
            .map(|(t, _)| t)
            .collect();
        let Some(&from_t) = occupied.choose(rng) else {
            return Ok(None);
        };

        let direction = if rng.gen_bool(0.5) {
            Direction::Forward
        } else {
            Direction::Backward
        };

        let Some(to_t) = direction.destination(from_t, num_times) else {
            return Ok(Some(EventMove {
                from_t,
                direction,
                to_t: None,
                n_max: Array1::zeros(num_meta),
                n_move: Array1::zeros(num_meta),
            }));
        };

        let (constraint_t, constraint_index) = self.config.constraint(from_t, to_t, direction);
        let n_max = max_free_events(current, from_t, target_index, constraint_t, constraint_index)?;
        let n_move = n_max.mapv(|n| rng.gen_range(0..=n));

        Ok(Some(EventMove {
            from_t,
            direction,
            to_t: Some(to_t),
            n_max,
            n_move,
        }))
    }

    /// Applies `event_move` to `current` and scores the candidate.
    pub fn apply(
        &self,
        current: &EventTensor,
        event_move: &EventMove,
    ) -> Result<(EventTensor, UncalibratedResults)> {
        let Some(to_t) = event_move.to_t else {
            debug!(
                from_t = event_move.from_t,
                direction = ?event_move.direction,
                "event move leaves the time axis, rejecting"
            );
            return Ok((
                current.clone(),
                UncalibratedResults::new(f64::NEG_INFINITY, 0.0),
            ));
        };

        let next = move_events(
            current,
            self.config.target_index,
            event_move.from_t,
            to_t,
            &event_move.n_move,
        )?;
        let target_log_prob = self.target.unnorm_log_prob(&next);
        let log_acceptance_correction =
            self.log_acceptance_correction(current, &next, event_move, to_t)?;

        Ok((
            next,
            UncalibratedResults::new(target_log_prob, log_acceptance_correction),
        ))
    }

    fn log_acceptance_correction(
        &self,
        current: &EventTensor,
        next: &EventTensor,
        event_move: &EventMove,
        to_t: usize,
    ) -> Result<f64> {
        let target_index = self.config.target_index;

        // Probability of picking the timepoint, forward over reverse. Both counts
        // are positive: events were present before and are conserved by the move.
        let current_p = nonempty_timepoints(current, target_index).sum() as f64;
        let next_p = nonempty_timepoints(next, target_index).sum() as f64;
        let timepoint_correction = (current_p / next_p).ln();

        let (constraint_t, constraint_index) =
            self.config
                .constraint(event_move.from_t, to_t, event_move.direction);
        let next_n_max = max_free_events(next, to_t, target_index, constraint_t, constraint_index)?;
        let count_correction: f64 = event_move
            .n_max
            .iter()
            .zip(next_n_max.iter())
            .map(|(&n, &n_next)| (n as f64 + 1.0).ln() - (n_next as f64 + 1.0).ln())
            .sum();

        Ok(timepoint_correction + count_correction)
    }

    fn check_shape(&self, events: &EventTensor) -> Result<()> {
        check_transition(events, self.config.target_index)?;
        if let Some(prev_index) = self.config.prev_index {
            check_transition(events, prev_index)?;
        }
        if let Some(next_index) = self.config.next_index {
            check_transition(events, next_index)?;
        }
        Ok(())
    }
}

impl<D> TransitionKernel for UncalibratedEventTimesUpdate<D>
where
    D: Target<EventTensor>,
{
    type State = EventTensor;
    type Results = UncalibratedResults;

    fn one_step(
        &self,
        current_state: &EventTensor,
        previous_results: &UncalibratedResults,
        rng: &mut dyn RngCore,
    ) -> Result<(EventTensor, UncalibratedResults)> {
        let Some(event_move) = self.propose(current_state, rng)? else {
            debug!(
                target_index = self.config.target_index,
                "no events to move, proposing the current state"
            );
            return Ok((
                current_state.clone(),
                UncalibratedResults::new(previous_results.target_log_prob, 0.0),
            ));
        };
        trace!(
            target_index = self.config.target_index,
            from_t = event_move.from_t,
            to_t = ?event_move.to_t,
            n_move = ?event_move.n_move,
            "proposed event move"
        );
        self.apply(current_state, &event_move)
    }

    fn bootstrap_results(&self, init_state: &EventTensor) -> Result<UncalibratedResults> {
        self.check_shape(init_state)?;
        Ok(UncalibratedResults::new(
            self.target.unnorm_log_prob(init_state),
            0.0,
        ))
    }

    fn is_calibrated(&self) -> bool {
        false
    }

    fn parameters(&self) -> KernelParameters {
        KernelParameters::EventTimes(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::events::totals;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, s, Array3};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn line(counts: &[u64]) -> EventTensor {
        let mut events = Array3::<u64>::zeros((counts.len(), 1, 1));
        for (t, &c) in counts.iter().enumerate() {
            events[[t, 0, 0]] = c;
        }
        events
    }

    fn flat(_: &EventTensor) -> f64 {
        0.0
    }

    /// 6 timepoints, 2 subpopulations, transitions [infection, removal] with
    /// removals never ahead of infections.
    fn sir_events() -> EventTensor {
        let infections = array![[4u64, 1], [3, 2], [0, 2], [1, 0], [0, 1], [0, 0]];
        let removals = array![[0u64, 0], [2, 1], [3, 1], [1, 2], [1, 1], [1, 0]];
        let mut events = Array3::<u64>::zeros((6, 2, 2));
        events.index_axis_mut(Axis(2), 0).assign(&infections);
        events.index_axis_mut(Axis(2), 1).assign(&removals);
        events
    }

    fn removals_never_lead(events: &EventTensor) -> bool {
        let mut infections = Array1::<u64>::zeros(events.len_of(Axis(1)));
        let mut removals = infections.clone();
        for t in 0..events.len_of(Axis(0)) {
            infections += &events.slice(s![t, .., 0]);
            removals += &events.slice(s![t, .., 1]);
            if removals.iter().zip(&infections).any(|(r, i)| r > i) {
                return false;
            }
        }
        true
    }

    #[test]
    fn bootstrap_scores_initial_state() {
        let kernel = UncalibratedEventTimesUpdate::new(
            |e: &EventTensor| -(e[[0, 0, 0]] as f64),
            EventTimesConfig::new(0),
        );
        let results = kernel.bootstrap_results(&line(&[3, 1])).unwrap();
        assert_eq!(results, UncalibratedResults::new(-3.0, 0.0));
        assert!(!kernel.is_calibrated());
    }

    #[test]
    fn bootstrap_rejects_unknown_transition() {
        let kernel =
            UncalibratedEventTimesUpdate::new(flat, EventTimesConfig::new(0).with_next_index(1));
        assert!(matches!(
            kernel.bootstrap_results(&line(&[3, 1])),
            Err(Error::TransitionIndexOutOfRange {
                index: 1,
                num_transitions: 1
            })
        ));
    }

    #[test]
    fn zero_move_is_exact_self_transition() {
        let kernel = UncalibratedEventTimesUpdate::new(flat, EventTimesConfig::new(0));
        let current = line(&[0, 5, 5, 0]);
        let event_move = EventMove {
            from_t: 1,
            direction: Direction::Forward,
            to_t: Some(2),
            n_max: array![5],
            n_move: array![0],
        };
        let (next, results) = kernel.apply(&current, &event_move).unwrap();
        assert_eq!(next, current);
        assert_eq!(results.log_acceptance_correction, 0.0);
    }

    #[test]
    fn zero_move_with_changed_support_is_finite() {
        let kernel = UncalibratedEventTimesUpdate::new(flat, EventTimesConfig::new(0));
        let current = line(&[0, 5, 3, 0]);
        let event_move = EventMove {
            from_t: 1,
            direction: Direction::Forward,
            to_t: Some(2),
            n_max: array![5],
            n_move: array![0],
        };
        let (_, results) = kernel.apply(&current, &event_move).unwrap();
        assert_abs_diff_eq!(
            results.log_acceptance_correction,
            6f64.ln() - 4f64.ln(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn correction_matches_hand_calculation() {
        let kernel = UncalibratedEventTimesUpdate::new(flat, EventTimesConfig::new(0));
        let current = line(&[2, 1, 0]);
        let event_move = EventMove {
            from_t: 0,
            direction: Direction::Forward,
            to_t: Some(1),
            n_max: array![2],
            n_move: array![2],
        };
        let (next, results) = kernel.apply(&current, &event_move).unwrap();
        assert_eq!(next, line(&[0, 3, 0]));
        // two occupied timepoints become one; support 3 before, 4 after
        assert_abs_diff_eq!(
            results.log_acceptance_correction,
            2f64.ln() + 3f64.ln() - 4f64.ln(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn off_axis_destination_is_rejected() {
        let kernel = UncalibratedEventTimesUpdate::new(flat, EventTimesConfig::new(0));
        let current = line(&[4, 0, 0]);
        let event_move = EventMove {
            from_t: 0,
            direction: Direction::Backward,
            to_t: None,
            n_max: array![0],
            n_move: array![0],
        };
        let (next, results) = kernel.apply(&current, &event_move).unwrap();
        assert_eq!(next, current);
        assert_eq!(results.target_log_prob, f64::NEG_INFINITY);
        assert!(results.log_acceptance_correction.is_finite());
    }

    #[test]
    fn single_timepoint_always_rejects() {
        let kernel = UncalibratedEventTimesUpdate::new(flat, EventTimesConfig::new(0));
        let current = line(&[7]);
        let mut results = kernel.bootstrap_results(&current).unwrap();
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..20 {
            let (next, next_results) = kernel.one_step(&current, &results, &mut rng).unwrap();
            assert_eq!(next, current);
            assert_eq!(next_results.target_log_prob, f64::NEG_INFINITY);
            results = next_results;
        }
    }

    #[test]
    fn empty_stream_is_a_no_op() {
        let kernel = UncalibratedEventTimesUpdate::new(flat, EventTimesConfig::new(0));
        let current = line(&[0, 0, 0]);
        let previous = UncalibratedResults::new(-1.5, 2.0);
        let mut rng = SmallRng::seed_from_u64(11);
        let (next, results) = kernel.one_step(&current, &previous, &mut rng).unwrap();
        assert_eq!(next, current);
        assert_eq!(results, UncalibratedResults::new(-1.5, 0.0));
        // no randomness was consumed
        assert_eq!(rng.next_u64(), SmallRng::seed_from_u64(11).next_u64());
    }

    #[test]
    fn destinations() {
        assert_eq!(Direction::Backward.destination(0, 5), None);
        assert_eq!(Direction::Backward.destination(3, 5), Some(2));
        assert_eq!(Direction::Forward.destination(3, 5), Some(4));
        assert_eq!(Direction::Forward.destination(4, 5), None);
    }

    #[test]
    fn proposals_stay_within_bounds() {
        let kernel = UncalibratedEventTimesUpdate::new(
            flat,
            EventTimesConfig::new(1).with_prev_index(0),
        );
        let current = sir_events();
        let mut rng = SmallRng::seed_from_u64(5);
        for _ in 0..200 {
            let event_move = kernel.propose(&current, &mut rng).unwrap().unwrap();
            assert!(current
                .slice(s![event_move.from_t, .., 1])
                .iter()
                .any(|&c| c > 0));
            assert!(event_move
                .n_move
                .iter()
                .zip(&event_move.n_max)
                .all(|(m, n)| m <= n));
        }
    }

    #[test]
    fn accepted_moves_keep_ordering_and_totals() {
        let removal = UncalibratedEventTimesUpdate::new(
            flat,
            EventTimesConfig::new(1).with_prev_index(0),
        );
        let infection = UncalibratedEventTimesUpdate::new(
            flat,
            EventTimesConfig::new(0).with_next_index(1),
        );
        let mut state = sir_events();
        let infection_totals = totals(&state, 0);
        let removal_totals = totals(&state, 1);
        let mut rng = SmallRng::seed_from_u64(2024);
        let mut moved = 0;

        for i in 0..2_000 {
            let kernel = if i % 2 == 0 { &removal } else { &infection };
            let results = kernel.bootstrap_results(&state).unwrap();
            let (next, next_results) = kernel.one_step(&state, &results, &mut rng).unwrap();
            if next_results.target_log_prob.is_finite() {
                if next != state {
                    moved += 1;
                }
                state = next;
            }
            assert!(removals_never_lead(&state), "ordering broken at step {i}");
            assert_eq!(totals(&state, 0), infection_totals);
            assert_eq!(totals(&state, 1), removal_totals);
        }
        assert!(moved > 100, "only {moved} moves changed the state");
    }

    #[test]
    fn same_seed_same_moves() {
        let kernel = UncalibratedEventTimesUpdate::new(
            flat,
            EventTimesConfig::new(1).with_prev_index(0),
        );
        let run = |seed: u64| {
            let mut rng = SmallRng::seed_from_u64(seed);
            let mut state = sir_events();
            let mut moves = Vec::new();
            for _ in 0..100 {
                let event_move = kernel.propose(&state, &mut rng).unwrap().unwrap();
                state = kernel.apply(&state, &event_move).unwrap().0;
                moves.push(event_move);
            }
            moves
        };
        assert_eq!(run(99), run(99));
    }

    #[test]
    fn parameters_echo_config() {
        let config = EventTimesConfig::new(2).with_prev_index(1);
        let kernel = UncalibratedEventTimesUpdate::new(flat, config);
        assert_eq!(kernel.parameters(), KernelParameters::EventTimes(config));
        assert_eq!(kernel.config().next_index, None);
    }

    #[test]
    fn config_from_json() {
        let config: EventTimesConfig =
            serde_json::from_str(r#"{"target_index": 1, "prev_index": 0}"#).unwrap();
        assert_eq!(config, EventTimesConfig::new(1).with_prev_index(0));
    }
}
