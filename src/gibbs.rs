/*!
# Metropolis-within-Gibbs

[`MetropolisWithinGibbs`] partitions the chain state into an ordered list of
blocks ([`StatePart`]s) and updates them in turn with one calibrated kernel per
block. Each kernel is rebuilt every sweep by a [`KernelFactory`] from a
[`BlockTarget`]: the joint log density with every other block held at its latest
value.

Blocks are updated strictly in sequence, so block `i` sees the values block
`i - 1` just produced. The joint density the predecessor block last accepted
already reflects those values, so it is copied into block `i`'s accepted results
instead of being evaluated again. A full sweep therefore costs one joint
evaluation per block proposal.

# Examples

```rust
use std::sync::Arc;

use epidemic_mcmc::core::sample_chain;
use epidemic_mcmc::event_times::{EventTimesConfig, UncalibratedEventTimesUpdate};
use epidemic_mcmc::gibbs::{
    block_kernel, BlockKernel, BlockTarget, KernelFactory, MetropolisWithinGibbs, StatePart, StateView,
};
use epidemic_mcmc::metropolis_hastings::MetropolisHastings;
use epidemic_mcmc::random_walk::{RandomWalkConfig, UncalibratedRandomWalk};
use epidemic_mcmc::Result;
use ndarray::{arr1, Array2, Array3};
use rand::rngs::SmallRng;
use rand::SeedableRng;

let joint = Arc::new(|parts: &[StateView<'_>]| match parts {
    [StateView::Parameters(x), StateView::Events(_)] => -0.5 * x.dot(*x),
    _ => f64::NEG_INFINITY,
});
let factories: Vec<KernelFactory> = vec![
    Box::new(|target: BlockTarget| -> Result<BlockKernel> {
        let inner = UncalibratedRandomWalk::new(target, RandomWalkConfig::new(Array2::eye(1)))?;
        Ok(block_kernel(MetropolisHastings::new(inner)))
    }),
    Box::new(|target: BlockTarget| -> Result<BlockKernel> {
        let inner = UncalibratedEventTimesUpdate::new(target, EventTimesConfig::new(0));
        Ok(block_kernel(MetropolisHastings::new(inner)))
    }),
];
let kernel = MetropolisWithinGibbs::new(joint, factories);

let mut events = Array3::<u64>::zeros((4, 1, 1));
events[[1, 0, 0]] = 6;
let initial = vec![StatePart::Parameters(arr1(&[0.0])), StatePart::Events(events)];

let mut rng = SmallRng::seed_from_u64(42);
let trace = sample_chain(&kernel, initial, 10, &mut rng).unwrap();
assert_eq!(trace.last_state().unwrap().len(), 2);
```
*/

use std::sync::Arc;

use ndarray::Array1;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::core::{KernelParameters, Target, TransitionKernel};
use crate::error::{Error, Result};
use crate::events::EventTensor;
use crate::results::KernelResults;

/// One block of the chain state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatePart {
    /// A vector of continuous parameters.
    Parameters(Array1<f64>),
    /// An event tensor.
    Events(EventTensor),
}

impl StatePart {
    pub fn view(&self) -> StateView<'_> {
        match self {
            StatePart::Parameters(x) => StateView::Parameters(x),
            StatePart::Events(e) => StateView::Events(e),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.view().kind()
    }

    pub fn as_parameters(&self) -> Option<&Array1<f64>> {
        self.view().parameters()
    }

    pub fn as_events(&self) -> Option<&EventTensor> {
        self.view().events()
    }
}

/// Borrowed [`StatePart`], as seen by the joint log density.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StateView<'a> {
    Parameters(&'a Array1<f64>),
    Events(&'a EventTensor),
}

impl<'a> StateView<'a> {
    pub fn kind(self) -> &'static str {
        match self {
            StateView::Parameters(_) => "parameters",
            StateView::Events(_) => "events",
        }
    }

    pub fn parameters(self) -> Option<&'a Array1<f64>> {
        match self {
            StateView::Parameters(x) => Some(x),
            StateView::Events(_) => None,
        }
    }

    pub fn events(self) -> Option<&'a EventTensor> {
        match self {
            StateView::Events(e) => Some(e),
            StateView::Parameters(_) => None,
        }
    }
}

/// Joint log density over all blocks, in block order.
pub type JointLogProb = Arc<dyn Fn(&[StateView<'_>]) -> f64 + Send + Sync>;

/// The joint log density as a function of one block, all others fixed.
///
/// Holds an immutable snapshot of the state taken when the block's kernel was
/// built; the candidate value is substituted for the block at evaluation time.
#[derive(Clone)]
pub struct BlockTarget {
    joint: JointLogProb,
    snapshot: Arc<Vec<StatePart>>,
    index: usize,
}

impl BlockTarget {
    pub fn new(joint: JointLogProb, snapshot: Arc<Vec<StatePart>>, index: usize) -> Self {
        Self {
            joint,
            snapshot,
            index,
        }
    }

    /// Position of the block this target varies.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Evaluates the joint density with `candidate` in place of the block.
    pub fn log_prob(&self, candidate: StateView<'_>) -> f64 {
        let views: Vec<StateView<'_>> = self
            .snapshot
            .iter()
            .enumerate()
            .map(|(j, part)| if j == self.index { candidate } else { part.view() })
            .collect();
        (self.joint)(&views)
    }
}

impl Target<Array1<f64>> for BlockTarget {
    fn unnorm_log_prob(&self, state: &Array1<f64>) -> f64 {
        self.log_prob(StateView::Parameters(state))
    }
}

impl Target<EventTensor> for BlockTarget {
    fn unnorm_log_prob(&self, state: &EventTensor) -> f64 {
        self.log_prob(StateView::Events(state))
    }
}

/// Typed kernel states that can live in a [`StatePart`].
pub trait StateBlock: Sized {
    fn from_part(part: &StatePart) -> Result<&Self>;
    fn into_part(self) -> StatePart;
}

impl StateBlock for Array1<f64> {
    fn from_part(part: &StatePart) -> Result<&Self> {
        part.as_parameters().ok_or(Error::StateKindMismatch {
            expected: "parameters",
            found: part.kind(),
        })
    }

    fn into_part(self) -> StatePart {
        StatePart::Parameters(self)
    }
}

impl StateBlock for EventTensor {
    fn from_part(part: &StatePart) -> Result<&Self> {
        part.as_events().ok_or(Error::StateKindMismatch {
            expected: "events",
            found: part.kind(),
        })
    }

    fn into_part(self) -> StatePart {
        StatePart::Events(self)
    }
}

/// A calibrated kernel over a single block.
pub type BlockKernel = Box<dyn TransitionKernel<State = StatePart, Results = KernelResults>>;

/// Builds a block's kernel from its conditional target.
pub type KernelFactory = Box<dyn Fn(BlockTarget) -> Result<BlockKernel> + Send + Sync>;

struct Block<K>(K);

impl<K> TransitionKernel for Block<K>
where
    K: TransitionKernel<Results = KernelResults>,
    K::State: StateBlock,
{
    type State = StatePart;
    type Results = KernelResults;

    fn one_step(
        &self,
        current_state: &StatePart,
        previous_results: &KernelResults,
        rng: &mut dyn RngCore,
    ) -> Result<(StatePart, KernelResults)> {
        let state = <K::State as StateBlock>::from_part(current_state)?;
        let (next, results) = self.0.one_step(state, previous_results, rng)?;
        Ok((next.into_part(), results))
    }

    fn bootstrap_results(&self, init_state: &StatePart) -> Result<KernelResults> {
        self.0.bootstrap_results(<K::State as StateBlock>::from_part(init_state)?)
    }

    fn is_calibrated(&self) -> bool {
        self.0.is_calibrated()
    }

    fn parameters(&self) -> KernelParameters {
        self.0.parameters()
    }
}

/// Erases a typed calibrated kernel into a [`BlockKernel`].
pub fn block_kernel<K>(kernel: K) -> BlockKernel
where
    K: TransitionKernel<Results = KernelResults> + 'static,
    K::State: StateBlock,
{
    Box::new(Block(kernel))
}

/// Cycles one calibrated kernel per block.
pub struct MetropolisWithinGibbs {
    joint: JointLogProb,
    factories: Vec<KernelFactory>,
}

impl MetropolisWithinGibbs {
    pub fn new(joint: JointLogProb, factories: Vec<KernelFactory>) -> Self {
        Self { joint, factories }
    }

    pub fn num_blocks(&self) -> usize {
        self.factories.len()
    }

    fn check_blocks(&self, state: &[StatePart]) -> Result<()> {
        if state.len() != self.num_blocks() {
            return Err(Error::BlockCountMismatch {
                expected: self.num_blocks(),
                actual: state.len(),
            });
        }
        Ok(())
    }

    fn kernel_for(&self, snapshot: &Arc<Vec<StatePart>>, index: usize) -> Result<BlockKernel> {
        let target = BlockTarget::new(self.joint.clone(), Arc::clone(snapshot), index);
        (self.factories[index])(target)
    }
}

impl TransitionKernel for MetropolisWithinGibbs {
    type State = Vec<StatePart>;
    type Results = Vec<KernelResults>;

    /// One sweep over all blocks.
    ///
    /// `previous_results` may be shorter than the block count; a block whose own
    /// results or whose predecessor's results are missing is bootstrapped.
    fn one_step(
        &self,
        current_state: &Vec<StatePart>,
        previous_results: &Vec<KernelResults>,
        rng: &mut dyn RngCore,
    ) -> Result<(Vec<StatePart>, Vec<KernelResults>)> {
        self.check_blocks(current_state)?;
        let n = self.num_blocks();
        if previous_results.len() > n {
            return Err(Error::BlockCountMismatch {
                expected: n,
                actual: previous_results.len(),
            });
        }

        let mut state = current_state.clone();
        let mut results: Vec<KernelResults> = Vec::with_capacity(n);

        for i in 0..n {
            let snapshot = Arc::new(state.clone());
            let kernel = self.kernel_for(&snapshot, i)?;

            let predecessor = if i == 0 {
                previous_results.get(n - 1)
            } else {
                results.get(i - 1)
            };
            let block_results = match (previous_results.get(i), predecessor) {
                (Some(own), Some(latest)) => own.carry_target_log_prob(latest)?,
                _ => kernel.bootstrap_results(&state[i])?,
            };

            let (next_part, next_results) = kernel.one_step(&state[i], &block_results, rng)?;
            trace!(
                block = i,
                is_accepted = ?next_results.is_accepted(),
                "gibbs block update"
            );
            state[i] = next_part;
            results.push(next_results);
        }

        Ok((state, results))
    }

    fn bootstrap_results(&self, init_state: &Vec<StatePart>) -> Result<Vec<KernelResults>> {
        self.check_blocks(init_state)?;
        debug!(num_blocks = self.num_blocks(), "bootstrapping gibbs blocks");
        let snapshot = Arc::new(init_state.clone());
        (0..self.num_blocks())
            .map(|i| self.kernel_for(&snapshot, i)?.bootstrap_results(&init_state[i]))
            .collect()
    }

    fn is_calibrated(&self) -> bool {
        true
    }

    fn parameters(&self) -> KernelParameters {
        KernelParameters::MetropolisWithinGibbs {
            num_blocks: self.num_blocks(),
        }
    }
}
