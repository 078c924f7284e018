/*!
Algebra on event tensors: how many events may move between adjacent timepoints
without breaking transition ordering, and the move itself.

An [`EventTensor`] holds non-negative event counts indexed
`[time, subpopulation, transition]`. Every operation here works on all
subpopulations at once and returns new values; inputs are never mutated.

# Examples

```rust
use epidemic_mcmc::events::{max_free_events, move_events, EventTensor};
use ndarray::{array, Array3};

// 4 timepoints, 1 subpopulation, transitions [infection, removal]
let mut events = Array3::<u64>::zeros((4, 1, 2));
events[[0, 0, 0]] = 5;
events[[1, 0, 0]] = 3;
events[[1, 0, 1]] = 2;
events[[2, 0, 1]] = 4;

// Removals at t=2 may move back to t=1 only while they stay behind infections.
let free = max_free_events(&events, 2, 1, 1, Some(0)).unwrap();
assert_eq!(free, array![4u64]); // |8 - 2| = 6, capped by the 4 available

let moved: EventTensor = move_events(&events, 1, 2, 1, &array![4u64]).unwrap();
assert_eq!(moved[[1, 0, 1]], 6);
assert_eq!(moved[[2, 0, 1]], 0);
```
*/

use ndarray::{s, Array1, Array3, Axis, Zip};

use crate::error::{Error, Result};

/// Event counts indexed `[time, subpopulation, transition]`.
pub type EventTensor = Array3<u64>;

/// Returns true if `low <= x < high`.
pub fn is_within(x: i64, low: i64, high: i64) -> bool {
    low <= x && x < high
}

/// Maximum number of events of `target_index` that may leave `target_t`, per
/// subpopulation.
///
/// Without a constraint this is everything recorded at `target_t`. With a
/// constraining transition it is the gap between the two streams' cumulative
/// counts at `constraint_t`, capped by what is recorded at `target_t`; moving
/// more would make the target stream cross the constraining one.
pub fn max_free_events(
    events: &EventTensor,
    target_t: usize,
    target_index: usize,
    constraint_t: usize,
    constraint_index: Option<usize>,
) -> Result<Array1<u64>> {
    check_time(events, target_t)?;
    check_transition(events, target_index)?;
    let available = events.slice(s![target_t, .., target_index]).to_owned();

    let Some(constraint_index) = constraint_index else {
        return Ok(available);
    };
    check_time(events, constraint_t)?;
    check_transition(events, constraint_index)?;

    let target_cumsum = cumulative_at(events, target_index, constraint_t);
    let constraint_cumsum = cumulative_at(events, constraint_index, constraint_t);

    let mut free = Array1::<u64>::zeros(available.len());
    Zip::from(&mut free)
        .and(&target_cumsum)
        .and(&constraint_cumsum)
        .and(&available)
        .for_each(|f, &a, &b, &avail| *f = a.abs_diff(b).min(avail));
    Ok(free)
}

/// Returns a copy of `events` with `n_move[m]` events of `target_index` moved from
/// `from_t` to `to_t` in every subpopulation `m`.
///
/// # Errors
///
/// Fails instead of producing a negative count, and on out-of-range indices.
pub fn move_events(
    events: &EventTensor,
    target_index: usize,
    from_t: usize,
    to_t: usize,
    n_move: &Array1<u64>,
) -> Result<EventTensor> {
    check_time(events, from_t)?;
    check_time(events, to_t)?;
    check_transition(events, target_index)?;
    let num_meta = events.len_of(Axis(1));
    if n_move.len() != num_meta {
        return Err(Error::MoveShapeMismatch {
            expected: num_meta,
            actual: n_move.len(),
        });
    }

    let source = events.slice(s![from_t, .., target_index]);
    if let Some((subpopulation, (&available, &requested))) = source
        .iter()
        .zip(n_move.iter())
        .enumerate()
        .find(|&(_, (&available, &requested))| requested > available)
    {
        return Err(Error::InsufficientEvents {
            t: from_t,
            subpopulation,
            available,
            requested,
        });
    }

    let mut next = events.clone();
    next.slice_mut(s![from_t, .., target_index])
        .zip_mut_with(n_move, |x, &n| *x -= n);
    next.slice_mut(s![to_t, .., target_index])
        .zip_mut_with(n_move, |x, &n| *x += n);
    Ok(next)
}

/// 1 for every timepoint with at least one `target_index` event across
/// subpopulations, 0 otherwise.
pub fn nonempty_timepoints(events: &EventTensor, target_index: usize) -> Array1<u64> {
    events
        .index_axis(Axis(2), target_index)
        .map_axis(Axis(1), |counts| u64::from(counts.iter().any(|&c| c > 0)))
}

/// Total events of `target_index` per subpopulation, summed over time.
pub fn totals(events: &EventTensor, target_index: usize) -> Array1<u64> {
    events.index_axis(Axis(2), target_index).sum_axis(Axis(0))
}

fn cumulative_at(events: &EventTensor, index: usize, t: usize) -> Array1<u64> {
    events.slice(s![..=t, .., index]).sum_axis(Axis(0))
}

fn check_time(events: &EventTensor, t: usize) -> Result<()> {
    let num_times = events.len_of(Axis(0));
    if t >= num_times {
        return Err(Error::TimeOutOfRange { t, num_times });
    }
    Ok(())
}

pub(crate) fn check_transition(events: &EventTensor, index: usize) -> Result<()> {
    let num_transitions = events.len_of(Axis(2));
    if index >= num_transitions {
        return Err(Error::TransitionIndexOutOfRange {
            index,
            num_transitions,
        });
    }
    Ok(())
}
