//! Dependency-aware ordering of the operations requested in one iteration.
//!
//! When the model requests several operations at once, independent ones run
//! concurrently and conflicting ones are serialized in request order. An
//! operation depends on every *earlier* operation it conflicts with:
//!
//! - their target paths overlap by prefix (a directory and a file inside it
//!   count) and at least one of the two mutates;
//! - either is exclusive (command execution, whose effects are unknown);
//! - they share a fingerprint.
//!
//! Operations are grouped into waves by topological level: wave N+1 starts
//! only after wave N has finished. Edges only point forward in request
//! order, so the graph is always acyclic.

use crate::tools::retry_guard::OperationFingerprint;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

/// The ordering-relevant facts about one requested operation.
#[derive(Debug, Clone)]
pub struct PlannedOperation {
    /// Absolute, lexically normalized target paths.
    pub targets: Vec<PathBuf>,
    pub mutating: bool,
    /// Conflicts with everything.
    pub exclusive: bool,
    pub fingerprint: Option<OperationFingerprint>,
}

/// A wave of operation indices that can execute concurrently.
pub type ExecutionWave = Vec<usize>;

fn paths_overlap(a: &PathBuf, b: &PathBuf) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

/// Whether `a` and `b` must not run at the same time.
pub fn conflicts(a: &PlannedOperation, b: &PlannedOperation) -> bool {
    if a.exclusive || b.exclusive {
        return true;
    }
    if a.fingerprint.is_some() && a.fingerprint == b.fingerprint {
        return true;
    }
    (a.mutating || b.mutating)
        && a
            .targets
            .iter()
            .any(|x| b.targets.iter().any(|y| paths_overlap(x, y)))
}

/// Group operations into execution waves via Kahn's algorithm.
///
/// Indices inside each wave are in request order.
pub fn build_execution_waves(ops: &[PlannedOperation]) -> Vec<ExecutionWave> {
    if ops.is_empty() {
        return vec![];
    }

    let mut in_degree = vec![0usize; ops.len()];
    let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
    for j in 0..ops.len() {
        for i in 0..j {
            if conflicts(&ops[i], &ops[j]) {
                in_degree[j] += 1;
                dependents.entry(i).or_default().push(j);
            }
        }
    }

    let mut waves: Vec<ExecutionWave> = Vec::new();
    let mut queue: VecDeque<usize> = (0..ops.len()).filter(|&i| in_degree[i] == 0).collect();

    while !queue.is_empty() {
        // Everything currently queued forms one wave.
        let mut wave: Vec<usize> = queue.drain(..).collect();
        wave.sort_unstable();

        for &id in &wave {
            if let Some(deps) = dependents.get(&id) {
                for &dep in deps {
                    in_degree[dep] -= 1;
                    if in_degree[dep] == 0 {
                        queue.push_back(dep);
                    }
                }
            }
        }
        waves.push(wave);
    }

    waves
}
