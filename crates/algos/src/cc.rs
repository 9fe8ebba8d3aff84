//! Randomized connected components of a node-weighted graph.
//!
//! Ported from the reference engine's `ConnectedComponents`: repeated
//! randomized edge contraction rounds (a coin-flip Boruvka variant driven by
//! a fresh [`IntegerHash`] per round) shrink the active edge set until none
//! remain, after which every node's root is walked down to the node holding
//! the minimal `(value, index)` pair in its component.
//!
//! Two edges' coin flips can point the same node's root at two different
//! winners in the same round — the reference engine accepts this as a
//! benign race, since any of the racing writes is a valid root for that
//! round. Plain writes to the same location from multiple threads are
//! undefined behavior in Rust regardless of outcome, so `roots` here is
//! backed by `atomic::Atomic<u32>` with relaxed ordering: the race itself
//! becomes well-defined (one of the stores wins, which one is unspecified),
//! matching the original's "any valid winner" semantics exactly, while the
//! `ThreadPool`'s dispatch-boundary condvar gives every round's writes
//! happens-before visibility into the next. Both contraction rounds here and
//! `change_roots_to_minima`'s convergence loop are driven through
//! [`crate::select`]'s `IterativeSelect2Compact1`, the same three-way
//! select/compact substrate `crate::tree_scan` and `crate::reconstruct` use.

use std::sync::atomic::Ordering;

use atomic::Atomic;
use maxtree_core::Value;
use maxtree_image::Edge;

use crate::hash::{seeded_rng, IntegerHash};
use crate::pool::ThreadPool;
use crate::select::{Classify, IterativeSelect2Compact1};

const SELECT_BLOCK_LEN: usize = 8192;
const FOR_ALL_BLOCK_LEN: usize = 8192;

struct SendPtr<T>(*const T);
unsafe impl<T> Send for SendPtr<T> {}

/// A deterministic-enough seed for the per-call RNG stream; connected
/// components is randomized by design (different runs may contract edges in
/// a different order), not required to be reproducible across calls.
fn rand_seed() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering as StdOrdering};
    static COUNTER: AtomicU64 = AtomicU64::new(0x9E37_79B9_7F4A_7C15);
    COUNTER.fetch_add(0x9E37_79B9_7F4A_7C15, StdOrdering::Relaxed)
}

/// Computes connected components of `edges` under the node weighting
/// `values`. `roots` must already be sized to at least `max_node + 1` and
/// initialized to the identity (`roots[i] == i`) for every node touched by
/// `edges`; on return, `roots[i]` holds the index of the node with minimal
/// `(value, index)` in `i`'s component, for every `i` that appears as an
/// edge endpoint.
pub fn connected_components<V: Value>(pool: &ThreadPool, edges: &[Edge<u32>], values: &[V], roots: &mut [u32]) {
    if edges.is_empty() {
        return;
    }

    let atomic_roots: Vec<Atomic<u32>> = roots.iter().map(|&r| Atomic::new(r)).collect();

    let mut rng = seeded_rng(rand_seed());
    let mut items: Vec<Edge<u32>> = edges.to_vec();
    let mut select = IterativeSelect2Compact1::<Edge<u32>>::new(items.len(), SELECT_BLOCK_LEN);
    let mut update_later: Vec<Vec<Edge<u32>>> = Vec::new();

    while select.length() > 0 {
        let hash = IntegerHash::generate(&mut rng);
        contract(pool, &select, &items, &hash, &atomic_roots);
        let diverted = update_edges(pool, &mut select, &mut items, &hash, &atomic_roots);
        update_later.push(diverted);
    }

    let total_compacted: Vec<Edge<u32>> = update_later.iter().flatten().copied().collect();
    update_roots(pool, &update_later, &atomic_roots);
    change_roots_to_minima(pool, &total_compacted, values, &atomic_roots);

    for (slot, atom) in roots.iter_mut().zip(atomic_roots.iter()) {
        *slot = atom.load(Ordering::Relaxed);
    }
}

/// One coin flip per endpoint; a differing flip points the "lo" endpoint's
/// root at the "hi" endpoint. Two active edges can race to set the same
/// node's root in the same round — see the module doc for why that's sound
/// here.
fn contract(pool: &ThreadPool, select: &IterativeSelect2Compact1<Edge<u32>>, items: &[Edge<u32>], hash: &IntegerHash, atomic_roots: &[Atomic<u32>]) {
    let items_ptr = SendPtr(items.as_ptr());
    let roots_ptr = SendPtr(atomic_roots.as_ptr());
    let n_items = items.len();
    let n_roots = atomic_roots.len();
    let hash = *hash;

    select.item_blocks().apply(pool, move |pos| {
        let items = unsafe { std::slice::from_raw_parts(items_ptr.0, n_items) };
        let roots = unsafe { std::slice::from_raw_parts(roots_ptr.0, n_roots) };

        let edge = items[pos];
        let hash_a = hash.bit(edge.a as u64);
        let hash_b = hash.bit(edge.b as u64);
        if hash_a == hash_b {
            return;
        }
        if hash_a {
            roots[edge.b as usize].store(edge.a, Ordering::Relaxed);
        } else {
            roots[edge.a as usize].store(edge.b, Ordering::Relaxed);
        }
    });
}

/// Classifies every active edge given this round's roots: resolved
/// self-loops are removed, edges whose root assignment is still pending are
/// diverted for deferred resolution, and the rest survive into the next
/// round with their endpoints lifted to this round's roots.
fn update_edges(
    pool: &ThreadPool,
    select: &mut IterativeSelect2Compact1<Edge<u32>>,
    items: &mut [Edge<u32>],
    hash: &IntegerHash,
    atomic_roots: &[Atomic<u32>],
) -> Vec<Edge<u32>> {
    let roots_ptr = SendPtr(atomic_roots.as_ptr());
    let n_roots = atomic_roots.len();
    let hash = *hash;
    let mut diverted = Vec::new();

    select.iterate(pool, items, &mut diverted, move |edge| {
        let roots = unsafe { std::slice::from_raw_parts(roots_ptr.0, n_roots) };
        let root = |i: u32| roots[i as usize].load(Ordering::Relaxed);

        let hash_a = hash.bit(edge.a as u64);
        let hash_b = hash.bit(edge.b as u64);

        if hash_a == hash_b {
            if !hash_a {
                let (ra, rb) = (root(edge.a), root(edge.b));
                if ra == rb {
                    return (Classify::Remove, edge);
                }
                return (Classify::Keep, Edge { a: ra, b: rb });
            }
            return (Classify::Keep, edge);
        }

        if hash_a {
            if root(edge.b) == edge.a {
                return (Classify::Divert, Edge { a: edge.b, b: edge.a });
            }
            if !hash_b {
                return (Classify::Keep, Edge { a: edge.a, b: root(edge.b) });
            }
            return (Classify::Keep, edge);
        }

        if root(edge.a) == edge.b {
            return (Classify::Divert, edge);
        }
        (Classify::Keep, Edge { a: root(edge.a), b: edge.b })
    });

    diverted
}

/// Resolves every diverted edge's pending `roots[a] = roots[b]` assignment,
/// walking rounds from last to first so a node re-rooted in a later round is
/// already settled by the time an earlier round's edge reads it.
fn update_roots(pool: &ThreadPool, update_later: &[Vec<Edge<u32>>], atomic_roots: &[Atomic<u32>]) {
    for group in update_later.iter().rev() {
        if group.is_empty() {
            continue;
        }

        let group_ptr = SendPtr(group.as_ptr());
        let roots_ptr = SendPtr(atomic_roots.as_ptr());
        let n_group = group.len();
        let n_roots = atomic_roots.len();

        pool.for_all(n_group, FOR_ALL_BLOCK_LEN, move |k, _t| {
            let group = unsafe { std::slice::from_raw_parts(group_ptr.0, n_group) };
            let roots = unsafe { std::slice::from_raw_parts(roots_ptr.0, n_roots) };

            let edge = group[k];
            let resolved = roots[edge.b as usize].load(Ordering::Relaxed);
            roots[edge.a as usize].store(resolved, Ordering::Relaxed);
        });
    }
}

/// Walks every contracted edge, repeatedly promoting the root with the
/// smaller `(value, index)` pair until each component's root is its own
/// minimum. Like `contract`, two edges can race to write the same node's
/// root in a round; relaxed atomics make that race well-defined.
fn change_roots_to_minima<V: Value>(pool: &ThreadPool, total_compacted: &[Edge<u32>], values: &[V], atomic_roots: &[Atomic<u32>]) {
    if total_compacted.is_empty() {
        return;
    }

    let mut items: Vec<Edge<u32>> = total_compacted.to_vec();
    let mut select = IterativeSelect2Compact1::<Edge<u32>>::new(items.len(), SELECT_BLOCK_LEN);

    while select.length() > 0 {
        let values_ptr = SendPtr(values.as_ptr());
        let roots_ptr = SendPtr(atomic_roots.as_ptr());
        let n_values = values.len();
        let n_roots = atomic_roots.len();
        let mut unused = Vec::new();

        select.iterate(pool, &mut items, &mut unused, move |edge| {
            let values = unsafe { std::slice::from_raw_parts(values_ptr.0, n_values) };
            let roots = unsafe { std::slice::from_raw_parts(roots_ptr.0, n_roots) };

            let candidate = roots[edge.b as usize].load(Ordering::Relaxed);
            let val_a = values[edge.a as usize];
            let val_candidate = values[candidate as usize];

            if val_a > val_candidate || (val_a == val_candidate && edge.a >= candidate) {
                return (Classify::Remove, edge);
            }

            roots[edge.b as usize].store(edge.a, Ordering::Relaxed);
            (Classify::Keep, edge)
        });

        debug_assert!(unused.is_empty(), "change_roots_to_minima never diverts");
    }

    let total_ptr = SendPtr(total_compacted.as_ptr());
    let roots_ptr = SendPtr(atomic_roots.as_ptr());
    let n_total = total_compacted.len();
    let n_roots = atomic_roots.len();

    pool.for_all(n_total, FOR_ALL_BLOCK_LEN, move |k, _t| {
        let total_compacted = unsafe { std::slice::from_raw_parts(total_ptr.0, n_total) };
        let roots = unsafe { std::slice::from_raw_parts(roots_ptr.0, n_roots) };

        let edge = total_compacted[k];
        let resolved = roots[edge.b as usize].load(Ordering::Relaxed);
        roots[edge.a as usize].store(resolved, Ordering::Relaxed);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;

    #[test]
    fn single_component_collapses_to_global_minimum() {
        // A path 0-1-2-3-4; node 0 has the smallest value.
        let values: Vec<u32> = vec![1, 9, 8, 7, 6];
        let edges: Vec<Edge<u32>> = (0..4).map(|i| Edge { a: i, b: i + 1 }).collect();
        let mut roots: Vec<u32> = (0..5).collect();
        let pool = ThreadPool::new(PoolConfig { n_threads: 4 });

        connected_components(&pool, &edges, &values, &mut roots);

        for i in 0..5usize {
            assert_eq!(roots[i], 0, "node {i} should resolve to the component minimum");
        }
    }

    #[test]
    fn disjoint_components_resolve_independently() {
        let values: Vec<u32> = vec![5, 1, 2, 9, 0, 3];
        let edges: Vec<Edge<u32>> = vec![
            Edge { a: 0, b: 1 },
            Edge { a: 1, b: 2 },
            Edge { a: 3, b: 4 },
            Edge { a: 4, b: 5 },
        ];
        let mut roots: Vec<u32> = (0..6).collect();
        let pool = ThreadPool::new(PoolConfig { n_threads: 4 });

        connected_components(&pool, &edges, &values, &mut roots);

        assert_eq!(roots[0], 1);
        assert_eq!(roots[1], 1);
        assert_eq!(roots[2], 1);
        assert_eq!(roots[3], 4);
        assert_eq!(roots[4], 4);
        assert_eq!(roots[5], 4);
    }

    #[test]
    fn large_path_collapses_under_many_threads() {
        let n = 2000usize;
        let values: Vec<u32> = (0..n as u32).collect();
        let edges: Vec<Edge<u32>> = (0..n as u32 - 1).map(|i| Edge { a: i, b: i + 1 }).collect();
        let mut roots: Vec<u32> = (0..n as u32).collect();
        let pool = ThreadPool::new(PoolConfig { n_threads: 8 });

        connected_components(&pool, &edges, &values, &mut roots);

        assert!(roots.iter().all(|&r| r == 0));
    }
}
