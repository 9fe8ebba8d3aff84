//! Image reconstruction: push each rejected pixel's value up to the
//! nearest ancestor accepted by a criterion, via randomized pointer
//! jumping.
//!
//! Ported from the reference engine's `reconstruct_image`: every node
//! initially accepted by `criterion` resolves immediately (`out[i] =
//! values[i]`); every other node starts with `roots[i] = parents[i]` and is
//! walked toward an accepted ancestor by repeated randomized pointer
//! doubling. Each round draws a fresh 1-bit hash; a node only diverts
//! (schedules its final write) once the hash marks its current root as
//! settled this round, and only doubles its own pointer — never a peer's —
//! so, as in `crate::tree_scan`, at most one writer ever touches a given
//! `roots`/`out` slot per round, making the per-round passes below sound to
//! dispatch through the pool with plain shared writes.

use std::sync::Arc;

use crate::hash::{seeded_rng, IntegerHash};
use crate::pool::ThreadPool;
use crate::select::{Classify, IterativeSelect2Compact1};

const SELECT_BLOCK_LEN: usize = 8192;
const FOR_ALL_BLOCK_LEN: usize = 8192;

struct SendPtr<T>(*const T);
unsafe impl<T> Send for SendPtr<T> {}
struct SendMutPtr<T>(*mut T);
unsafe impl<T> Send for SendMutPtr<T> {}

fn rand_seed() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0x2545_F491_4F6C_DD1D);
    COUNTER.fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed)
}

/// Reconstructs `values_out[i] = values[ancestor]` for every pixel `i`,
/// where `ancestor` is `i`'s nearest self-or-ancestor accepted by
/// `criterion` under `parents`, via randomized pointer jumping.
///
/// Every node must have such an ancestor — in practice the maxtree's
/// self-parented root, which every caller in this crate arranges to always
/// satisfy `criterion` (area/attribute thresholds are checked against the
/// root's own maximal value).
pub fn reconstruct_image<V, C>(pool: &ThreadPool, values: &[V], parents: &[u32], criterion: C, values_out: &mut [V])
where
    V: Copy + Send + Sync + Default + 'static,
    C: Fn(usize) -> bool + Send + Sync + 'static,
{
    let n = parents.len();
    if n == 0 {
        return;
    }

    let mut roots: Vec<u32> = vec![0; n];
    let mut node_indices: Vec<u32> = vec![0; n];
    let mut select = IterativeSelect2Compact1::<u32>::new(n, SELECT_BLOCK_LEN);

    {
        let values_ptr = SendPtr(values.as_ptr());
        let parents_ptr = SendPtr(parents.as_ptr());
        let out_ptr = SendMutPtr(values_out.as_mut_ptr());
        let roots_ptr = SendMutPtr(roots.as_mut_ptr());
        let node_indices_ptr = SendMutPtr(node_indices.as_mut_ptr());
        let criterion = Arc::new(criterion);
        let crit = Arc::clone(&criterion);

        select.item_blocks_mut().select(pool, move |i, o| {
            let values = unsafe { std::slice::from_raw_parts(values_ptr.0, n) };
            let parents = unsafe { std::slice::from_raw_parts(parents_ptr.0, n) };
            let out = unsafe { std::slice::from_raw_parts_mut(out_ptr.0, n) };
            let roots = unsafe { std::slice::from_raw_parts_mut(roots_ptr.0, n) };
            let node_indices = unsafe { std::slice::from_raw_parts_mut(node_indices_ptr.0, n) };

            if crit(i) {
                out[i] = values[i];
                false
            } else {
                roots[i] = parents[i];
                node_indices[o] = i as u32;
                true
            }
        });
    }

    let mut rng = seeded_rng(rand_seed());
    let mut update_later: Vec<Vec<u32>> = Vec::new();

    while select.length() > 0 {
        let hash = IntegerHash::generate(&mut rng);

        let mut diverted: Vec<u32> = Vec::new();
        {
            let roots_ptr = SendPtr(roots.as_ptr());
            select.iterate(pool, &mut node_indices, &mut diverted, move |x| {
                let roots = unsafe { std::slice::from_raw_parts(roots_ptr.0, n) };

                if !hash.bit(x as u64) {
                    return (Classify::Keep, x);
                }
                let root = roots[x as usize];
                if hash.bit(root as u64) {
                    (Classify::Keep, x)
                } else {
                    (Classify::Divert, x)
                }
            });
        }
        update_later.push(diverted);

        {
            let roots_ptr = SendMutPtr(roots.as_mut_ptr());
            let node_indices_ptr = SendPtr(node_indices.as_ptr());

            select.item_blocks().apply(pool, move |pos| {
                let roots = unsafe { std::slice::from_raw_parts_mut(roots_ptr.0, n) };
                let node_indices = unsafe { std::slice::from_raw_parts(node_indices_ptr.0, n) };

                let x = node_indices[pos] as usize;
                let root = roots[x];
                if !hash.bit(root as u64) {
                    return;
                }
                let root_of_root = roots[root as usize];
                if hash.bit(root_of_root as u64) {
                    return;
                }
                roots[x] = roots[root as usize];
            });
        }
    }

    for group in update_later.iter().rev() {
        if group.is_empty() {
            continue;
        }

        let group_ptr = SendPtr(group.as_ptr());
        let roots_ptr = SendPtr(roots.as_ptr());
        let out_ptr = SendMutPtr(values_out.as_mut_ptr());
        let n_group = group.len();

        pool.for_all(n_group, FOR_ALL_BLOCK_LEN, move |k, _t| {
            let group = unsafe { std::slice::from_raw_parts(group_ptr.0, n_group) };
            let roots = unsafe { std::slice::from_raw_parts(roots_ptr.0, n) };
            let out = unsafe { std::slice::from_raw_parts_mut(out_ptr.0, n) };

            let x = group[k] as usize;
            out[x] = out[roots[x] as usize];
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;

    #[test]
    fn direct_rule_keeps_only_accepted_nodes_and_ancestors() {
        // Chain 0 <- 1 <- 2 <- 3 (3 is root), values strictly decreasing
        // toward the root as in a maxtree built from a monotone gradient.
        let parents = vec![1u32, 2, 3, 3];
        let values = vec![40u32, 30, 20, 10];
        let mut out = vec![0u32; 4];
        let pool = ThreadPool::new(PoolConfig { n_threads: 4 });

        // Only node 2 (and its ancestors) survive the filter.
        let criterion = |i: usize| i == 2 || i == 3;
        reconstruct_image(&pool, &values, &parents, criterion, &mut out);

        assert_eq!(out, vec![20, 20, 20, 10]);
    }

    #[test]
    fn accepting_every_node_is_the_identity_reconstruction() {
        let parents = vec![1u32, 2, 2];
        let values = vec![5u32, 6, 7];
        let mut out = vec![0u32; 3];
        let pool = ThreadPool::new(PoolConfig { n_threads: 2 });

        reconstruct_image(&pool, &values, &parents, |_| true, &mut out);

        assert_eq!(out, values);
    }

    #[test]
    fn long_chain_pushes_values_up_to_the_nearest_accepted_ancestor() {
        // Chain 0 <- 1 <- ... <- 99 (99 is root); only the root is accepted.
        let n = 100usize;
        let mut parents: Vec<u32> = (0..n as u32).collect();
        for i in 0..n - 1 {
            parents[i] = (i + 1) as u32;
        }
        let values: Vec<u32> = (0..n as u32).collect();
        let mut out = vec![0u32; n];
        let pool = ThreadPool::new(PoolConfig { n_threads: 4 });

        reconstruct_image(&pool, &values, &parents, |i| i == n - 1, &mut out);

        assert!(out.iter().all(|&v| v == (n - 1) as u32));
    }

    #[test]
    fn wide_star_reconstructs_leaves_independently() {
        let n = 300usize;
        let parents: Vec<u32> = vec![0u32; n];
        let values: Vec<u32> = (0..n as u32).map(|i| i * 2).collect();
        let mut out = vec![0u32; n];
        let pool = ThreadPool::new(PoolConfig { n_threads: 4 });

        reconstruct_image(&pool, &values, &parents, |i| i % 7 == 0 || i == 0, &mut out);

        for i in 0..n {
            if i % 7 == 0 || i == 0 {
                assert_eq!(out[i], values[i]);
            } else {
                assert_eq!(out[i], values[0]);
            }
        }
    }
}
