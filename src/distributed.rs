/// Process groups and metric averaging across workers
///
/// Each worker owns its own parameter replica; the only collective used by the
/// epoch loops is a sum all-reduce over a few scalars.
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// A group of cooperating training workers
pub trait ProcessGroup: Send + Sync {
    /// Index of this worker in `0..world_size()`
    fn rank(&self) -> usize;

    /// Number of workers in the group
    fn world_size(&self) -> usize;

    /// Element-wise sum of `values` across all workers. Every worker must call
    /// this with the same number of values.
    fn all_reduce_sum(&self, values: &[f64]) -> crate::Result<Vec<f64>>;
}

/// Count-weighted mean of `metric` across all workers.
///
/// Returns `sum(metric * count) / sum(count)`.
pub fn average_metric(group: &dyn ProcessGroup, metric: f64, count: f64) -> crate::Result<f64> {
    let reduced = group.all_reduce_sum(&[metric * count, count])?;
    if reduced[1] == 0.0 {
        return Err(crate::DemixError::Distributed(
            "cannot average a metric over zero samples".to_string(),
        ));
    }
    Ok(reduced[0] / reduced[1])
}

/// The trivial group of one worker
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl ProcessGroup for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, values: &[f64]) -> crate::Result<Vec<f64>> {
        Ok(values.to_vec())
    }
}

struct State {
    slots: Vec<Option<Vec<f64>>>,
    arrived: usize,
    generation: u64,
    aborted: bool,
}

struct Shared {
    state: Mutex<State>,
    cvar: Condvar,
}

/// In-process group: one handle per worker thread.
///
/// Dropping a handle aborts the group: a peer waiting in (or later entering)
/// a collective that can no longer complete gets `DemixError::Distributed`
/// instead of blocking forever. A worker that bails out with an error therefore
/// releases the others as soon as its handle goes out of scope.
pub struct LocalGroup {
    rank: usize,
    world_size: usize,
    shared: Arc<Shared>,
}

impl LocalGroup {
    /// Create the handles of a group of `world_size` workers, indexed by rank
    pub fn new(world_size: usize) -> crate::Result<Vec<LocalGroup>> {
        if world_size == 0 {
            return Err(crate::DemixError::Config(
                "world_size must be > 0".to_string(),
            ));
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                slots: vec![None; world_size],
                arrived: 0,
                generation: 0,
                aborted: false,
            }),
            cvar: Condvar::new(),
        });

        Ok((0..world_size)
            .map(|rank| LocalGroup {
                rank,
                world_size,
                shared: Arc::clone(&shared),
            })
            .collect())
    }

    /// Release every peer blocked in a collective with an error
    pub fn abort(&self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.aborted = true;
        }
        self.shared.cvar.notify_all();
    }

    fn state(&self) -> crate::Result<MutexGuard<'_, State>> {
        self.shared
            .state
            .lock()
            .map_err(|_| crate::DemixError::Distributed("worker panicked during all-reduce".to_string()))
    }

    /// Block until every rank has arrived; fails once the group is aborted
    fn rendezvous<'a>(&'a self, mut state: MutexGuard<'a, State>) -> crate::Result<MutexGuard<'a, State>> {
        if state.aborted {
            return Err(aborted());
        }

        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.world_size {
            state.arrived = 0;
            state.generation += 1;
            self.shared.cvar.notify_all();
            return Ok(state);
        }

        while state.generation == generation {
            if state.aborted {
                return Err(aborted());
            }
            state = self
                .shared
                .cvar
                .wait(state)
                .map_err(|_| crate::DemixError::Distributed("worker panicked during all-reduce".to_string()))?;
        }
        Ok(state)
    }
}

fn aborted() -> crate::DemixError {
    crate::DemixError::Distributed("process group aborted by a peer".to_string())
}

impl Drop for LocalGroup {
    fn drop(&mut self) {
        self.abort();
    }
}

impl ProcessGroup for LocalGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce_sum(&self, values: &[f64]) -> crate::Result<Vec<f64>> {
        let mut state = self.state()?;
        state.slots[self.rank] = Some(values.to_vec());
        let state = self.rendezvous(state)?;

        let mut sum = vec![0.0; values.len()];
        let mut mismatch = false;
        for contribution in state.slots.iter() {
            match contribution {
                Some(v) if v.len() == sum.len() => {
                    sum.iter_mut().zip(v).for_each(|(acc, x)| *acc += x);
                }
                _ => mismatch = true,
            }
        }

        // nobody may overwrite a slot before every worker has read them all
        self.rendezvous(state)?;
        if mismatch {
            return Err(crate::DemixError::Distributed(
                "workers contributed mismatched values".to_string(),
            ));
        }
        Ok(sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn run_group<F>(world_size: usize, f: F) -> Vec<crate::Result<f64>>
    where
        F: Fn(&LocalGroup) -> crate::Result<f64> + Send + Sync + Copy + 'static,
    {
        let handles: Vec<_> = LocalGroup::new(world_size)
            .unwrap()
            .into_iter()
            .map(|group| thread::spawn(move || f(&group)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn test_single_process_is_identity() -> crate::Result<()> {
        assert_eq!(average_metric(&SingleProcess, 0.75, 1.0)?, 0.75);
        assert_eq!(SingleProcess.world_size(), 1);
        Ok(())
    }

    #[test]
    fn test_average_metric_across_threads() {
        let results = run_group(2, |group| {
            let metric = if group.rank() == 0 { 1.0 } else { 3.0 };
            average_metric(group, metric, 1.0)
        });
        for result in results {
            assert!((result.unwrap() - 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_average_metric_weighted_by_count() {
        let results = run_group(2, |group| {
            let (metric, count) = if group.rank() == 0 { (1.0, 1.0) } else { (3.0, 3.0) };
            average_metric(group, metric, count)
        });
        for result in results {
            assert!((result.unwrap() - 2.5).abs() < 1e-12);
        }
    }

    #[test]
    fn test_repeated_all_reduce() {
        let results = run_group(3, |group| {
            let mut last = 0.0;
            for round in 0..5 {
                last = group.all_reduce_sum(&[(group.rank() + round) as f64])?[0];
            }
            Ok(last)
        });
        // round 4: 4 + 5 + 6
        for result in results {
            assert_eq!(result.unwrap(), 15.0);
        }
    }

    #[test]
    fn test_dropped_rank_releases_peers() {
        let mut groups = LocalGroup::new(2).unwrap();
        let survivor = groups.remove(0);
        let failed = groups.remove(0);

        let waiting = thread::spawn(move || survivor.all_reduce_sum(&[1.0]));
        // the other rank bails out before its collective
        drop(failed);

        let result = waiting.join().unwrap();
        assert!(matches!(result, Err(crate::DemixError::Distributed(_))));
    }

    #[test]
    fn test_zero_count() {
        assert!(average_metric(&SingleProcess, 1.0, 0.0).is_err());
        assert!(LocalGroup::new(0).is_err());
    }
}
