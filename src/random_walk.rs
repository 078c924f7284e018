/*!
Random-walk proposals for continuous parameter blocks.

- [`MixtureRandomWalk`] draws Gaussian increments: with probability `p_u` from
  `N(0, Σ)` using the supplied (usually adapted) covariance, otherwise from a small
  fixed isotropic Gaussian. The fixed component keeps the chain geometrically
  ergodic even if the adapted covariance collapses.
- [`UncalibratedRandomWalk`] adds such an increment to an unconstrained state.
  The proposal is symmetric, so its Hastings correction is zero.
- [`UncalibratedLogRandomWalk`] multiplies a strictly positive state by
  `exp(increment)`; its correction is the sum of the increments, the log
  Jacobian of the change of variables.

# Examples

```rust
use epidemic_mcmc::core::TransitionKernel;
use epidemic_mcmc::random_walk::{RandomWalkConfig, UncalibratedLogRandomWalk};
use ndarray::{arr1, Array1, Array2};
use rand::rngs::SmallRng;
use rand::SeedableRng;

let config = RandomWalkConfig::new(Array2::eye(2) * 0.01);
let target = |x: &Array1<f64>| x.mapv(|v| v.ln() - v).sum();
let kernel = UncalibratedLogRandomWalk::new(target, config).unwrap();

let current = arr1(&[0.5, 2.0]);
let results = kernel.bootstrap_results(&current).unwrap();
let mut rng = SmallRng::seed_from_u64(42);
let (next, _) = kernel.one_step(&current, &results, &mut rng).unwrap();
assert!(next.iter().all(|&v| v > 0.0));
```
*/

use nalgebra::{Cholesky, DMatrix};
use ndarray::{Array1, Array2};
use rand::{Rng, RngCore};
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::core::{KernelParameters, Target, TransitionKernel};
use crate::error::{Error, Result};
use crate::results::UncalibratedResults;

/// Jitter added to the covariance diagonal before factorisation.
const COVARIANCE_JITTER: f64 = 1e-9;

fn default_p_u() -> f64 {
    0.95
}

/// Construction arguments shared by both random-walk kernels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomWalkConfig {
    /// Covariance of the adapted Gaussian component.
    pub covariance: Array2<f64>,
    /// Probability of drawing from the adapted component.
    #[serde(default = "default_p_u")]
    pub p_u: f64,
    /// Standard deviation of the fixed component; `0.01 / d` when unset.
    #[serde(default)]
    pub fixed_scale: Option<f64>,
}

impl RandomWalkConfig {
    pub fn new(covariance: Array2<f64>) -> Self {
        Self {
            covariance,
            p_u: default_p_u(),
            fixed_scale: None,
        }
    }

    pub fn with_p_u(mut self, p_u: f64) -> Self {
        self.p_u = p_u;
        self
    }

    pub fn with_fixed_scale(mut self, fixed_scale: f64) -> Self {
        self.fixed_scale = Some(fixed_scale);
        self
    }
}

/// Bounded-convergence mixture of two zero-mean Gaussian increments.
#[derive(Debug, Clone)]
pub struct MixtureRandomWalk {
    scale_tril: Array2<f64>,
    fixed_scale: f64,
    p_u: f64,
}

impl MixtureRandomWalk {
    /// Factorises the covariance once.
    ///
    /// # Errors
    ///
    /// Fails on a non-square or non-positive-definite covariance and on a
    /// mixture probability outside `[0, 1]`.
    pub fn new(config: &RandomWalkConfig) -> Result<Self> {
        let (rows, cols) = config.covariance.dim();
        if rows != cols {
            return Err(Error::NonSquareCovariance { rows, cols });
        }
        if !(0.0..=1.0).contains(&config.p_u) {
            return Err(Error::InvalidMixtureProbability(config.p_u));
        }

        let jittered = DMatrix::from_fn(rows, cols, |i, j| {
            config.covariance[[i, j]] + if i == j { COVARIANCE_JITTER } else { 0.0 }
        });
        let cholesky = Cholesky::new(jittered).ok_or(Error::NotPositiveDefinite)?;
        let l = cholesky.l();
        let scale_tril = Array2::from_shape_fn((rows, cols), |(i, j)| l[(i, j)]);

        Ok(Self {
            scale_tril,
            fixed_scale: config.fixed_scale.unwrap_or(0.01 / rows as f64),
            p_u: config.p_u,
        })
    }

    /// Dimension of the increments.
    pub fn dim(&self) -> usize {
        self.scale_tril.nrows()
    }

    /// Lower-triangular Cholesky factor of the jittered covariance.
    pub fn scale_tril(&self) -> &Array2<f64> {
        &self.scale_tril
    }

    /// Draws one increment.
    pub fn sample_increment(&self, rng: &mut dyn RngCore) -> Array1<f64> {
        let use_adapted = rng.gen_bool(self.p_u);
        let z: Array1<f64> = (0..self.dim())
            .map(|_| -> f64 { StandardNormal.sample(rng) })
            .collect();
        if use_adapted {
            self.scale_tril.dot(&z)
        } else {
            z * self.fixed_scale
        }
    }

    /// Returns `state` plus one increment.
    pub fn propose(&self, state: &Array1<f64>, rng: &mut dyn RngCore) -> Result<Array1<f64>> {
        self.check_dim(state)?;
        Ok(state + &self.sample_increment(rng))
    }

    fn check_dim(&self, state: &Array1<f64>) -> Result<()> {
        if state.len() != self.dim() {
            return Err(Error::DimensionMismatch {
                expected: self.dim(),
                actual: state.len(),
            });
        }
        Ok(())
    }
}

/// Additive random walk for unconstrained parameters.
#[derive(Debug, Clone)]
pub struct UncalibratedRandomWalk<D> {
    target: D,
    proposal: MixtureRandomWalk,
    config: RandomWalkConfig,
}

impl<D> UncalibratedRandomWalk<D>
where
    D: Target<Array1<f64>>,
{
    pub fn new(target: D, config: RandomWalkConfig) -> Result<Self> {
        let proposal = MixtureRandomWalk::new(&config)?;
        Ok(Self {
            target,
            proposal,
            config,
        })
    }

    pub fn proposal(&self) -> &MixtureRandomWalk {
        &self.proposal
    }
}

impl<D> TransitionKernel for UncalibratedRandomWalk<D>
where
    D: Target<Array1<f64>>,
{
    type State = Array1<f64>;
    type Results = UncalibratedResults;

    fn one_step(
        &self,
        current_state: &Array1<f64>,
        _previous_results: &UncalibratedResults,
        rng: &mut dyn RngCore,
    ) -> Result<(Array1<f64>, UncalibratedResults)> {
        let next = self.proposal.propose(current_state, rng)?;
        let target_log_prob = self.target.unnorm_log_prob(&next);
        trace!(target_log_prob, "proposed random walk step");
        // symmetric proposal, no Hastings term
        Ok((next, UncalibratedResults::new(target_log_prob, 0.0)))
    }

    fn bootstrap_results(&self, init_state: &Array1<f64>) -> Result<UncalibratedResults> {
        self.proposal.check_dim(init_state)?;
        Ok(UncalibratedResults::new(
            self.target.unnorm_log_prob(init_state),
            0.0,
        ))
    }

    fn is_calibrated(&self) -> bool {
        false
    }

    fn parameters(&self) -> KernelParameters {
        KernelParameters::RandomWalk(self.config.clone())
    }
}

/// Multiplicative random walk for strictly positive parameters.
#[derive(Debug, Clone)]
pub struct UncalibratedLogRandomWalk<D> {
    target: D,
    proposal: MixtureRandomWalk,
    config: RandomWalkConfig,
}

impl<D> UncalibratedLogRandomWalk<D>
where
    D: Target<Array1<f64>>,
{
    pub fn new(target: D, config: RandomWalkConfig) -> Result<Self> {
        let proposal = MixtureRandomWalk::new(&config)?;
        Ok(Self {
            target,
            proposal,
            config,
        })
    }

    pub fn proposal(&self) -> &MixtureRandomWalk {
        &self.proposal
    }

    fn check_positive(state: &Array1<f64>) -> Result<()> {
        match state.iter().position(|&v| v.is_nan() || v <= 0.0) {
            Some(position) => Err(Error::NonPositiveState {
                position,
                value: state[position],
            }),
            None => Ok(()),
        }
    }
}

impl<D> TransitionKernel for UncalibratedLogRandomWalk<D>
where
    D: Target<Array1<f64>>,
{
    type State = Array1<f64>;
    type Results = UncalibratedResults;

    fn one_step(
        &self,
        current_state: &Array1<f64>,
        _previous_results: &UncalibratedResults,
        rng: &mut dyn RngCore,
    ) -> Result<(Array1<f64>, UncalibratedResults)> {
        Self::check_positive(current_state)?;
        let log_step = self
            .proposal
            .propose(&Array1::zeros(current_state.len()), rng)?;
        let next = current_state * &log_step.mapv(f64::exp);
        let target_log_prob = self.target.unnorm_log_prob(&next);
        let log_acceptance_correction = log_step.sum();
        trace!(
            target_log_prob,
            log_acceptance_correction,
            "proposed log random walk step"
        );
        Ok((
            next,
            UncalibratedResults::new(target_log_prob, log_acceptance_correction),
        ))
    }

    fn bootstrap_results(&self, init_state: &Array1<f64>) -> Result<UncalibratedResults> {
        self.proposal.check_dim(init_state)?;
        Self::check_positive(init_state)?;
        Ok(UncalibratedResults::new(
            self.target.unnorm_log_prob(init_state),
            0.0,
        ))
    }

    fn is_calibrated(&self) -> bool {
        false
    }

    fn parameters(&self) -> KernelParameters {
        KernelParameters::LogRandomWalk(self.config.clone())
    }
}
