/*!
Kernel results records and the recursive navigation used by the Gibbs combinator.

A raw proposal kernel reports an [`UncalibratedResults`] leaf. A calibration layer
such as [`MetropolisHastings`](crate::metropolis_hastings::MetropolisHastings)
keeps the last accepted leaf in `accepted_results`; further wrappers (adaptation,
step counting, ...) delegate to an `inner_results` record. [`KernelResults`] is the
sum type over these shapes, and [`KernelResults::accepted_results`] /
[`KernelResults::with_accepted_results`] walk it to whatever depth the wiring
produced.

# Examples

```rust
use epidemic_mcmc::results::{KernelResults, MetropolisHastingsResults, UncalibratedResults, WrappedResults};

let leaf = UncalibratedResults::new(-3.0, 0.0);
let mh = KernelResults::MetropolisHastings(Box::new(MetropolisHastingsResults::bootstrap(leaf)));
let wrapped = KernelResults::Wrapped(Box::new(WrappedResults::new(mh, 10)));

assert_eq!(wrapped.accepted_results().unwrap().target_log_prob, -3.0);

let moved = wrapped.with_accepted_results(UncalibratedResults::new(-1.0, 0.0)).unwrap();
assert_eq!(moved.target_log_prob().unwrap(), -1.0);
```
*/

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Results of one raw (uncalibrated) proposal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UncalibratedResults {
    /// Log joint density at the state these results describe.
    pub target_log_prob: f64,
    /// Log of the reverse-over-forward proposal density ratio.
    pub log_acceptance_correction: f64,
}

impl UncalibratedResults {
    pub fn new(target_log_prob: f64, log_acceptance_correction: f64) -> Self {
        Self {
            target_log_prob,
            log_acceptance_correction,
        }
    }
}

/// Results of a Metropolis-Hastings acceptance step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetropolisHastingsResults {
    /// Leaf describing the state the chain is currently at.
    pub accepted_results: UncalibratedResults,
    /// Leaf describing the last proposal, accepted or not.
    pub proposed_results: UncalibratedResults,
    pub is_accepted: bool,
    pub log_accept_ratio: f64,
}

impl MetropolisHastingsResults {
    /// Results right after bootstrap: the initial state counts as accepted.
    pub fn bootstrap(initial: UncalibratedResults) -> Self {
        Self {
            accepted_results: initial,
            proposed_results: initial,
            is_accepted: true,
            log_accept_ratio: 0.0,
        }
    }
}

/// Results of an outer layer that wraps another kernel without keeping its own
/// accepted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrappedResults {
    pub inner_results: KernelResults,
    /// Number of steps the wrapping layer has taken.
    pub num_steps: u64,
}

impl WrappedResults {
    pub fn new(inner_results: KernelResults, num_steps: u64) -> Self {
        Self {
            inner_results,
            num_steps,
        }
    }
}

/// Any results record a kernel can produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KernelResults {
    Uncalibrated(UncalibratedResults),
    MetropolisHastings(Box<MetropolisHastingsResults>),
    Wrapped(Box<WrappedResults>),
}

impl KernelResults {
    /// Returns the nearest `accepted_results`, descending through `inner_results`.
    ///
    /// # Errors
    ///
    /// [`Error::MissingAcceptedResults`] if the chain of wrappers ends in a bare leaf.
    pub fn accepted_results(&self) -> Result<&UncalibratedResults> {
        match self {
            KernelResults::MetropolisHastings(mh) => Ok(&mh.accepted_results),
            KernelResults::Wrapped(wrapped) => wrapped.inner_results.accepted_results(),
            KernelResults::Uncalibrated(_) => Err(Error::MissingAcceptedResults),
        }
    }

    /// Returns a copy of `self` with the nearest `accepted_results` replaced.
    ///
    /// Every wrapper on the path is rebuilt; nothing else changes.
    pub fn with_accepted_results(&self, accepted: UncalibratedResults) -> Result<KernelResults> {
        match self {
            KernelResults::MetropolisHastings(mh) => {
                Ok(KernelResults::MetropolisHastings(Box::new(MetropolisHastingsResults {
                    accepted_results: accepted,
                    ..(**mh).clone()
                })))
            }
            KernelResults::Wrapped(wrapped) => Ok(KernelResults::Wrapped(Box::new(WrappedResults {
                inner_results: wrapped.inner_results.with_accepted_results(accepted)?,
                num_steps: wrapped.num_steps,
            }))),
            KernelResults::Uncalibrated(_) => Err(Error::MissingAcceptedResults),
        }
    }

    /// Log density of the state the results describe.
    ///
    /// A leaf reports its own value, anything else its accepted record's.
    pub fn target_log_prob(&self) -> Result<f64> {
        match self {
            KernelResults::Uncalibrated(leaf) => Ok(leaf.target_log_prob),
            _ => Ok(self.accepted_results()?.target_log_prob),
        }
    }

    /// Whether the last step was accepted, when some layer tracks it.
    pub fn is_accepted(&self) -> Option<bool> {
        match self {
            KernelResults::MetropolisHastings(mh) => Some(mh.is_accepted),
            KernelResults::Wrapped(wrapped) => wrapped.inner_results.is_accepted(),
            KernelResults::Uncalibrated(_) => None,
        }
    }

    /// Copies the accepted `target_log_prob` of `latest` into `self`.
    ///
    /// The Gibbs combinator calls this with the results of the block updated just
    /// before, whose accepted log density already reflects the current values of
    /// every block. The correction and all other fields of `self` are kept.
    pub fn carry_target_log_prob(&self, latest: &KernelResults) -> Result<KernelResults> {
        let target_log_prob = latest.accepted_results()?.target_log_prob;
        let accepted = UncalibratedResults {
            target_log_prob,
            ..*self.accepted_results()?
        };
        self.with_accepted_results(accepted)
    }
}

impl From<UncalibratedResults> for KernelResults {
    fn from(results: UncalibratedResults) -> Self {
        KernelResults::Uncalibrated(results)
    }
}

impl From<MetropolisHastingsResults> for KernelResults {
    fn from(results: MetropolisHastingsResults) -> Self {
        KernelResults::MetropolisHastings(Box::new(results))
    }
}
