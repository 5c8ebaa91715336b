//! Parallel execution of independent chains.
//!
//! A chain owns a full clone of the model graph, so chains share no state and
//! need no locking. Within one chain every operation is single-threaded.

use crate::graph::model::ModelGraph;
use rayon::prelude::*;

/// Runs `f` over `n_chains` independent clones of `model` in parallel and
/// collects the per-chain results in chain order. Each clone is reseeded from
/// `base_seed` and its chain index, so runs are reproducible and the chains'
/// random streams are distinct.
pub fn run_chains<T, F>(model: &ModelGraph, n_chains: usize, base_seed: u64, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize, &mut ModelGraph) -> T + Sync + Send,
{
    (0..n_chains)
        .into_par_iter()
        .map(|chain| {
            let mut graph = model.clone();
            graph.reseed(base_seed.wrapping_add(chain as u64));
            f(chain, &mut graph)
        })
        .collect()
}
