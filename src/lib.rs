//! Metropolis-within-Gibbs kernels for inferring latent event times in
//! stochastic compartmental epidemic models.
//!
//! The latent state is an [`EventTensor`](events::EventTensor) of transition
//! counts indexed `[time, subpopulation, transition]`, plus vectors of
//! continuous parameters. The crate provides:
//!
//! - [`event_times::UncalibratedEventTimesUpdate`]: moves events of one
//!   transition between adjacent timepoints without letting it overtake the
//!   transitions before or after it.
//! - [`random_walk::UncalibratedRandomWalk`] and
//!   [`random_walk::UncalibratedLogRandomWalk`]: mixture random walks for
//!   unconstrained and strictly positive parameters.
//! - [`metropolis_hastings::MetropolisHastings`]: the acceptance step that
//!   calibrates any of the above.
//! - [`gibbs::MetropolisWithinGibbs`]: cycles calibrated kernels over the
//!   blocks of the state.
//!
//! Every kernel implements [`core::TransitionKernel`]. Randomness is passed in
//! explicitly, so a seeded generator reproduces a chain exactly.

pub mod core;
pub mod error;
pub mod event_times;
pub mod events;
pub mod gibbs;
pub mod metropolis_hastings;
pub mod random_walk;
pub mod results;

pub use error::{Error, Result};
