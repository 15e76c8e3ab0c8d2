//! Dependency-aware test scheduling with failure pruning.
//!
//! Tests within one (homework, kind) form a directed graph: an edge p -> t
//! means t declared p as a predecessor. In-degree-0 tests are ready
//! immediately; a passing test releases its dependents, a failing test
//! prunes everything transitively reachable from it. Results are fed back
//! incrementally as they arrive, since sibling tests run concurrently and
//! the full outcome is never known upfront.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

/// Malformed graphs are rejected at construction; both kinds would stall
/// scheduling forever if let through.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("test {test} declares unknown predecessor {predecessor}")]
    DanglingPredecessor { test: i32, predecessor: i32 },

    #[error("dependency cycle among tests {0:?}")]
    Cycle(Vec<i32>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NodeState {
    Waiting,
    Ready,
    Scheduled,
    Pruned,
}

/// Outcome of feeding one result back into the scheduler.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SchedulerStep {
    /// Tests released for execution, ascending, already marked scheduled.
    pub newly_ready: Vec<i32>,
    /// Tests pruned because a prerequisite failed, ascending.
    pub pruned: Vec<i32>,
}

#[derive(Debug)]
pub struct DependencyScheduler {
    /// Forward edges: predecessor -> dependents.
    edges: BTreeMap<i32, Vec<i32>>,
    in_degree: BTreeMap<i32, usize>,
    state: BTreeMap<i32, NodeState>,
}

impl DependencyScheduler {
    /// Build from (test number, declared predecessors) pairs.
    pub fn new(tests: &[(i32, Vec<i32>)]) -> Result<Self, GraphError> {
        let nodes: BTreeSet<i32> = tests.iter().map(|(t, _)| *t).collect();
        let mut edges: BTreeMap<i32, Vec<i32>> =
            nodes.iter().map(|&n| (n, Vec::new())).collect();
        let mut in_degree: BTreeMap<i32, usize> = nodes.iter().map(|&n| (n, 0)).collect();

        for (test, predecessors) in tests {
            for &predecessor in predecessors {
                if !nodes.contains(&predecessor) {
                    return Err(GraphError::DanglingPredecessor {
                        test: *test,
                        predecessor,
                    });
                }
                if let Some(dependents) = edges.get_mut(&predecessor) {
                    dependents.push(*test);
                }
                if let Some(degree) = in_degree.get_mut(test) {
                    *degree += 1;
                }
            }
        }

        Self::reject_cycles(&edges, &in_degree)?;

        let state = in_degree
            .iter()
            .map(|(&n, &degree)| {
                let s = if degree == 0 {
                    NodeState::Ready
                } else {
                    NodeState::Waiting
                };
                (n, s)
            })
            .collect();

        Ok(Self {
            edges,
            in_degree,
            state,
        })
    }

    /// Kahn's pass over a scratch copy of the in-degrees; nodes left
    /// unprocessed are exactly the cycle members.
    fn reject_cycles(
        edges: &BTreeMap<i32, Vec<i32>>,
        in_degree: &BTreeMap<i32, usize>,
    ) -> Result<(), GraphError> {
        let mut degrees = in_degree.clone();
        let mut queue: Vec<i32> = degrees
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(&n, _)| n)
            .collect();
        let mut processed = 0usize;

        while let Some(node) = queue.pop() {
            processed += 1;
            for &dependent in edges.get(&node).map(Vec::as_slice).unwrap_or_default() {
                if let Some(degree) = degrees.get_mut(&dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push(dependent);
                    }
                }
            }
        }

        if processed < degrees.len() {
            let stuck: Vec<i32> = degrees
                .iter()
                .filter(|&(_, &d)| d > 0)
                .map(|(&n, _)| n)
                .collect();
            return Err(GraphError::Cycle(stuck));
        }
        Ok(())
    }

    /// Tests ready to run now, ascending. Each is handed out exactly once.
    pub fn take_ready(&mut self) -> Vec<i32> {
        let ready: Vec<i32> = self
            .state
            .iter()
            .filter(|&(_, &s)| s == NodeState::Ready)
            .map(|(&n, _)| n)
            .collect();
        for test in &ready {
            self.state.insert(*test, NodeState::Scheduled);
        }
        ready
    }

    /// Feed one finished test back. A pass decrements dependents and
    /// releases any that reach in-degree 0; a failure prunes everything
    /// transitively reachable via a depth-first walk.
    pub fn record_result(&mut self, test: i32, passed: bool) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        if passed {
            for dependent in self.edges.get(&test).cloned().unwrap_or_default() {
                if let Some(degree) = self.in_degree.get_mut(&dependent) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 && self.state.get(&dependent) == Some(&NodeState::Waiting) {
                        self.state.insert(dependent, NodeState::Ready);
                    }
                }
            }
            step.newly_ready = self.take_ready();
        } else {
            let mut stack = self.edges.get(&test).cloned().unwrap_or_default();
            let mut seen = BTreeSet::new();
            while let Some(node) = stack.pop() {
                if !seen.insert(node) {
                    continue;
                }
                if matches!(
                    self.state.get(&node),
                    Some(NodeState::Waiting) | Some(NodeState::Ready)
                ) {
                    self.state.insert(node, NodeState::Pruned);
                    step.pruned.push(node);
                }
                stack.extend(self.edges.get(&node).cloned().unwrap_or_default());
            }
            step.pruned.sort_unstable();
        }

        step
    }

    /// Total number of tests, scheduled and pruned alike. The completion
    /// barrier expects this many results.
    pub fn total(&self) -> usize {
        self.state.len()
    }
}

/// Construction-only validation, used at ingestion time.
pub fn validate(tests: &[(i32, Vec<i32>)]) -> Result<(), GraphError> {
    DependencyScheduler::new(tests).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> Vec<(i32, Vec<i32>)> {
        // 1 -> 2 -> 3
        vec![(1, vec![]), (2, vec![1]), (3, vec![2])]
    }

    #[test]
    fn test_independent_tests_all_ready_ascending() {
        let mut s = DependencyScheduler::new(&[(3, vec![]), (1, vec![]), (2, vec![])]).unwrap();
        assert_eq!(s.take_ready(), vec![1, 2, 3]);
        assert_eq!(s.take_ready(), Vec::<i32>::new());
    }

    #[test]
    fn test_chain_pass_releases_one_at_a_time() {
        let mut s = DependencyScheduler::new(&chain()).unwrap();
        assert_eq!(s.take_ready(), vec![1]);
        let step = s.record_result(1, true);
        assert_eq!(step.newly_ready, vec![2]);
        assert!(step.pruned.is_empty());
        let step = s.record_result(2, true);
        assert_eq!(step.newly_ready, vec![3]);
    }

    #[test]
    fn test_chain_failure_prunes_downstream() {
        let mut s = DependencyScheduler::new(&chain()).unwrap();
        assert_eq!(s.take_ready(), vec![1]);
        let step = s.record_result(1, false);
        assert!(step.newly_ready.is_empty());
        assert_eq!(step.pruned, vec![2, 3]);
        // Nothing left to schedule.
        assert_eq!(s.take_ready(), Vec::<i32>::new());
    }

    #[test]
    fn test_diamond_failure_prunes_reachable_only() {
        // 1 -> 2, 1 -> 3, 2 -> 4, 3 -> 4, plus independent 5.
        let mut s = DependencyScheduler::new(&[
            (1, vec![]),
            (2, vec![1]),
            (3, vec![1]),
            (4, vec![2, 3]),
            (5, vec![]),
        ])
        .unwrap();
        assert_eq!(s.take_ready(), vec![1, 5]);
        let step = s.record_result(1, true);
        assert_eq!(step.newly_ready, vec![2, 3]);
        // 2 fails: only 4 is reachable from it; 3 stays scheduled.
        let step = s.record_result(2, false);
        assert_eq!(step.pruned, vec![4]);
        // 3's pass must not resurrect the pruned node.
        let step = s.record_result(3, true);
        assert!(step.newly_ready.is_empty());
    }

    #[test]
    fn test_every_node_scheduled_or_pruned_exactly_once() {
        let mut s = DependencyScheduler::new(&[
            (1, vec![]),
            (2, vec![1]),
            (3, vec![1]),
            (4, vec![3]),
            (5, vec![]),
        ])
        .unwrap();
        let mut scheduled: Vec<i32> = s.take_ready();
        let step = s.record_result(1, true);
        scheduled.extend(&step.newly_ready);
        let step = s.record_result(3, false);
        let pruned = step.pruned.clone();
        for &t in &[2, 5] {
            let _ = s.record_result(t, true);
        }
        scheduled.sort_unstable();
        assert_eq!(scheduled, vec![1, 2, 3, 5]);
        assert_eq!(pruned, vec![4]);
        assert_eq!(scheduled.len() + pruned.len(), s.total());
    }

    #[test]
    fn test_dangling_predecessor_rejected() {
        let err = DependencyScheduler::new(&[(1, vec![]), (2, vec![9])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::DanglingPredecessor {
                test: 2,
                predecessor: 9
            }
        );
    }

    #[test]
    fn test_cycle_rejected() {
        let err = DependencyScheduler::new(&[(1, vec![2]), (2, vec![1]), (3, vec![])])
            .unwrap_err();
        match err {
            GraphError::Cycle(nodes) => assert_eq!(nodes, vec![1, 2]),
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_accepts_good_graph() {
        assert!(validate(&chain()).is_ok());
    }
}
