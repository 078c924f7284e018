/*!
# Metropolis–Hastings calibration

[`MetropolisHastings`] turns any uncalibrated proposal kernel into a calibrated
one. Each step runs the inner kernel from the last accepted state, then accepts the
candidate with probability

```text
min(1, exp(log p(proposed) - log p(current) + log_acceptance_correction))
```

where the correction is the inner kernel's log Hastings term. The results keep the
accepted leaf in `accepted_results`, which is what the Gibbs combinator reads and
rewrites when it carries the joint log density from block to block.

## Example Usage

```rust
use epidemic_mcmc::core::{sample_chain, TransitionKernel};
use epidemic_mcmc::metropolis_hastings::MetropolisHastings;
use epidemic_mcmc::random_walk::{RandomWalkConfig, UncalibratedRandomWalk};
use ndarray::{arr1, Array1, Array2};
use rand::rngs::SmallRng;
use rand::SeedableRng;

let target = |x: &Array1<f64>| -0.5 * x.dot(x);
let inner = UncalibratedRandomWalk::new(target, RandomWalkConfig::new(Array2::eye(2))).unwrap();
let kernel = MetropolisHastings::new(inner);
assert!(kernel.is_calibrated());

let mut rng = SmallRng::seed_from_u64(42);
let trace = sample_chain(&kernel, arr1(&[0.0, 0.0]), 100, &mut rng).unwrap();
assert_eq!(trace.len(), 100);
```
*/

use rand::{Rng, RngCore};
use tracing::trace;

use crate::core::{KernelParameters, TransitionKernel};
use crate::error::Result;
use crate::results::{KernelResults, MetropolisHastingsResults, UncalibratedResults};

/// Accept/reject layer around an uncalibrated kernel `K`.
#[derive(Debug, Clone)]
pub struct MetropolisHastings<K> {
    inner: K,
}

impl<K> MetropolisHastings<K>
where
    K: TransitionKernel<Results = UncalibratedResults>,
{
    pub fn new(inner: K) -> Self {
        Self { inner }
    }

    /// The wrapped proposal kernel.
    pub fn inner(&self) -> &K {
        &self.inner
    }
}

impl<K> TransitionKernel for MetropolisHastings<K>
where
    K: TransitionKernel<Results = UncalibratedResults>,
    K::State: Clone,
{
    type State = K::State;
    type Results = KernelResults;

    /// Proposes from the inner kernel and accepts if `ln u < log_accept_ratio`.
    ///
    /// A NaN ratio never compares true and is therefore rejected, as is any
    /// candidate with `-inf` log density.
    fn one_step(
        &self,
        current_state: &K::State,
        previous_results: &KernelResults,
        rng: &mut dyn RngCore,
    ) -> Result<(K::State, KernelResults)> {
        let accepted = *previous_results.accepted_results()?;
        let (proposed_state, proposed) = self.inner.one_step(current_state, &accepted, rng)?;

        let log_accept_ratio = proposed.target_log_prob - accepted.target_log_prob
            + proposed.log_acceptance_correction;
        let u: f64 = rng.gen();
        let is_accepted = u.ln() < log_accept_ratio;
        trace!(log_accept_ratio, is_accepted, "metropolis-hastings step");

        let (next_state, accepted_results) = if is_accepted {
            (proposed_state, proposed)
        } else {
            (current_state.clone(), accepted)
        };
        let results = MetropolisHastingsResults {
            accepted_results,
            proposed_results: proposed,
            is_accepted,
            log_accept_ratio,
        };
        Ok((next_state, results.into()))
    }

    fn bootstrap_results(&self, init_state: &K::State) -> Result<KernelResults> {
        let initial = self.inner.bootstrap_results(init_state)?;
        Ok(MetropolisHastingsResults::bootstrap(initial).into())
    }

    fn is_calibrated(&self) -> bool {
        true
    }

    fn parameters(&self) -> KernelParameters {
        KernelParameters::MetropolisHastings {
            inner: Box::new(self.inner.parameters()),
        }
    }
}
