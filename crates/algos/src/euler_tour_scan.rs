//! Group-attribute scan over a maxtree via randomized list ranking on its
//! Euler tour — the alternative to [`crate::tree_scan`] available whenever
//! the attribute combines under a group (addition, not just a monoid like
//! max), since it trades [`crate::tree_scan`]'s general tree contraction for
//! a single circular linked list and an `inverse` to peel prefix sums back
//! apart.
//!
//! Ported from the reference engine's `EulerTourScan`: the tree's forward
//! edges `(parent[i], i)` are doubled into a `2n - 1`-node cyclic linked
//! list — every real node once, plus one "edge" node per non-root edge
//! marking where that child's subtree closes — by walking each node's
//! children in forward-edge order and threading the last child's close back
//! to the parent's own slot. Randomized list ranking (a fresh 1-bit-ish hash
//! per round selects which nodes are safe to fold this round) then
//! accumulates a running prefix sum around the whole cycle; a child's
//! subtree attribute falls out as the prefix at its own real-node slot minus
//! (via `inverse`) the prefix at its edge node's slot, recovered once every
//! slot's prefix has a fully settled value.
//!
//! As in `crate::tree_scan`, the cycle being a single permutation (each
//! node has exactly one predecessor) means a node absorbed by one round's
//! walk is never reachable as another walk's target again, so concurrent
//! walks within a round never contend for the same slot — sound to dispatch
//! through the pool with plain shared writes.

use std::sync::Arc;

use crate::hash::{seeded_rng, IntegerHash};
use crate::pool::ThreadPool;
use crate::radix_sort::{radix_sort_parallel, RadixItem};
use crate::select::{Classify, IterativeSelect2Compact1};

const N_HASH_BITS: u32 = 8;
const SELECT_BLOCK_LEN: usize = 8192;
const FOR_ALL_BLOCK_LEN: usize = 8192;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct FwdEdge {
    a: u32,
    b: u32,
}

impl RadixItem for FwdEdge {
    fn unsigned_value(&self) -> u64 {
        self.a as u64
    }
}

struct SendPtr<T>(*const T);
unsafe impl<T> Send for SendPtr<T> {}
struct SendMutPtr<T>(*mut T);
unsafe impl<T> Send for SendMutPtr<T> {}

fn rand_seed() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0x6A09_E667_F3BC_C908);
    COUNTER.fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed)
}

/// Scans a group-valued attribute over a maxtree via its Euler tour.
///
/// `weight(i)` seeds every real node's own contribution; `plus` combines
/// values around the tour; `inverse` undoes a `plus` (e.g. negation for a
/// sum, reciprocal for a product) so a child's subtree total can be
/// recovered as a prefix-sum difference. `identity` is `plus`'s neutral
/// element. `parents` must describe a forest with exactly one
/// self-parented root, as with [`crate::tree_scan`].
pub fn euler_tour_scan<A, W, P, Inv>(pool: &ThreadPool, parents: &[u32], weight: W, plus: P, inverse: Inv, identity: A) -> Vec<A>
where
    A: Clone + Send + 'static,
    W: Fn(usize) -> A,
    P: Fn(A, A) -> A + Send + Sync + 'static,
    Inv: Fn(A) -> A + Send + Sync + 'static,
{
    let n = parents.len();
    let mut attributes: Vec<A> = (0..n).map(&weight).collect();
    if n <= 1 {
        return attributes;
    }

    debug_assert_eq!(
        (0..n).filter(|&i| parents[i] as usize == i).count(),
        1,
        "euler_tour_scan assumes a single self-parented root"
    );

    let sentinel = n as u32;
    let mut forward: Vec<FwdEdge> = (0..n as u32)
        .map(|i| {
            let p = parents[i as usize];
            if p == i {
                FwdEdge { a: sentinel, b: i }
            } else {
                FwdEdge { a: p, b: i }
            }
        })
        .collect();
    let mut scratch = forward.clone();
    if !radix_sort_parallel(pool, &mut forward, &mut scratch, 32) {
        forward = scratch;
    }

    let root = forward[n - 1].b;
    let ll_n = 2 * n - 1;
    let mut next: Vec<u32> = vec![0; ll_n];
    let mut first: Vec<u32> = vec![0; n];

    {
        let parents_ptr = SendPtr(parents.as_ptr());
        let next_ptr = SendMutPtr(next.as_mut_ptr());
        let first_ptr = SendMutPtr(first.as_mut_ptr());
        pool.for_all(n, FOR_ALL_BLOCK_LEN, move |i, _t| {
            let parents = unsafe { std::slice::from_raw_parts(parents_ptr.0, n) };
            let next = unsafe { std::slice::from_raw_parts_mut(next_ptr.0, ll_n) };
            let first = unsafe { std::slice::from_raw_parts_mut(first_ptr.0, n) };
            next[i] = parents[i];
            first[i] = i as u32;
        });
    }

    {
        let forward_ptr = SendPtr(forward.as_ptr());
        let next_ptr = SendMutPtr(next.as_mut_ptr());
        let first_ptr = SendMutPtr(first.as_mut_ptr());
        pool.for_all(n - 1, FOR_ALL_BLOCK_LEN, move |i, _t| {
            let forward = unsafe { std::slice::from_raw_parts(forward_ptr.0, n) };
            let next = unsafe { std::slice::from_raw_parts_mut(next_ptr.0, ll_n) };
            let first = unsafe { std::slice::from_raw_parts_mut(first_ptr.0, n) };

            let current = forward[i];
            let right = forward[i + 1];
            if right.a != current.a {
                first[current.a as usize] = (n + i) as u32;
            } else {
                next[right.b as usize] = (n + i) as u32;
            }
        });
    }

    {
        let forward_ptr = SendPtr(forward.as_ptr());
        let first_ptr = SendPtr(first.as_ptr());
        let next_ptr = SendMutPtr(next.as_mut_ptr());
        pool.for_all(n - 1, FOR_ALL_BLOCK_LEN, move |i, _t| {
            let forward = unsafe { std::slice::from_raw_parts(forward_ptr.0, n) };
            let first = unsafe { std::slice::from_raw_parts(first_ptr.0, n) };
            let next = unsafe { std::slice::from_raw_parts_mut(next_ptr.0, ll_n) };
            next[n + i] = first[forward[i].b as usize];
        });
    }

    let end = root;
    let begin = first[end as usize];
    next[end as usize] = begin;

    let mut ll_attributes: Vec<A> = (0..ll_n)
        .map(|i| if i < n { attributes[i].clone() } else { identity.clone() })
        .collect();
    let mut nodes: Vec<u32> = (0..ll_n as u32).collect();

    let mut select = IterativeSelect2Compact1::<u32>::new(ll_n, SELECT_BLOCK_LEN);
    let mut rng = seeded_rng(rand_seed());
    let mut update_later: Vec<Vec<u32>> = Vec::new();
    let plus = Arc::new(plus);

    // `roots` is the same buffer as `next`: it starts as the tour's forward
    // links and is pointer-jumped in place as nodes get folded away.
    let mut roots = next;

    while select.length() > 2 {
        let hash = IntegerHash::generate(&mut rng);
        let mut diverted: Vec<u32> = Vec::new();

        let roots_ptr = SendMutPtr(roots.as_mut_ptr());
        let attrs_ptr = SendMutPtr(ll_attributes.as_mut_ptr());
        let plus = Arc::clone(&plus);

        select.iterate(pool, &mut nodes, &mut diverted, move |x| {
            let roots = unsafe { std::slice::from_raw_parts_mut(roots_ptr.0, ll_n) };
            let ll_attributes = unsafe { std::slice::from_raw_parts_mut(attrs_ptr.0, ll_n) };

            let mergeable = |v: u32| v != begin && v != end && hash.hash(v as u64, N_HASH_BITS) != 0;

            if mergeable(x) {
                return (Classify::Divert, x);
            }

            let mut current = roots[x as usize];
            while mergeable(current) {
                let next_hop = roots[current as usize];
                ll_attributes[next_hop as usize] =
                    plus(ll_attributes[next_hop as usize].clone(), ll_attributes[current as usize].clone());
                roots[current as usize] = x;
                current = next_hop;
            }
            roots[x as usize] = current;

            (Classify::Keep, x)
        });

        update_later.push(diverted);
    }

    ll_attributes[end as usize] = plus(ll_attributes[end as usize].clone(), ll_attributes[begin as usize].clone());

    for group in update_later.iter().rev() {
        if group.is_empty() {
            continue;
        }

        let group_ptr = SendPtr(group.as_ptr());
        let roots_ptr = SendPtr(roots.as_ptr());
        let attrs_ptr = SendMutPtr(ll_attributes.as_mut_ptr());
        let n_group = group.len();
        let plus = Arc::clone(&plus);

        pool.for_all(n_group, FOR_ALL_BLOCK_LEN, move |k, _t| {
            let group = unsafe { std::slice::from_raw_parts(group_ptr.0, n_group) };
            let roots = unsafe { std::slice::from_raw_parts(roots_ptr.0, ll_n) };
            let ll_attributes = unsafe { std::slice::from_raw_parts_mut(attrs_ptr.0, ll_n) };

            let x = group[k] as usize;
            let r = roots[x] as usize;
            ll_attributes[x] = plus(ll_attributes[x].clone(), ll_attributes[r].clone());
        });
    }

    {
        let forward_ptr = SendPtr(forward.as_ptr());
        let ll_attrs_ptr = SendPtr(ll_attributes.as_ptr());
        let attrs_ptr = SendMutPtr(attributes.as_mut_ptr());
        let inverse = Arc::new(inverse);
        let plus = Arc::clone(&plus);

        pool.for_all(n - 1, FOR_ALL_BLOCK_LEN, move |i, _t| {
            let forward = unsafe { std::slice::from_raw_parts(forward_ptr.0, n) };
            let ll_attributes = unsafe { std::slice::from_raw_parts(ll_attrs_ptr.0, ll_n) };
            let attributes = unsafe { std::slice::from_raw_parts_mut(attrs_ptr.0, n) };

            let y = forward[i].b as usize;
            attributes[y] = plus(ll_attributes[y].clone(), inverse(ll_attributes[n + i].clone()));
        });
    }

    attributes[root as usize] = ll_attributes[root as usize].clone();

    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;

    #[test]
    fn counts_subtree_sizes_on_a_chain() {
        // Chain 0 <- 1 <- 2 <- 3 (3 is root).
        let parents = vec![1u32, 2, 3, 3];
        let pool = ThreadPool::new(PoolConfig { n_threads: 4 });
        let sizes = euler_tour_scan(&pool, &parents, |_| 1i64, |a, b| a + b, |a: i64| -a, 0i64);
        assert_eq!(sizes, vec![1, 2, 3, 4]);
    }

    #[test]
    fn counts_subtree_sizes_on_a_branching_tree() {
        // Root 4 with children 0 and 3; 0's child is 1; 3's child is 2.
        let parents = vec![4u32, 0, 3, 4, 4];
        let pool = ThreadPool::new(PoolConfig { n_threads: 3 });
        let sizes = euler_tour_scan(&pool, &parents, |_| 1i64, |a, b| a + b, |a: i64| -a, 0i64);

        assert_eq!(sizes[1], 1);
        assert_eq!(sizes[0], 2);
        assert_eq!(sizes[2], 1);
        assert_eq!(sizes[3], 2);
        assert_eq!(sizes[4], 5);
    }

    #[test]
    fn single_node_tree_keeps_its_own_weight() {
        let parents = vec![0u32];
        let pool = ThreadPool::new(PoolConfig { n_threads: 2 });
        let attrs = euler_tour_scan(&pool, &parents, |_| 7i64, |a, b| a + b, |a: i64| -a, 0i64);
        assert_eq!(attrs, vec![7]);
    }

    #[test]
    fn agrees_with_tree_scan_sum_over_a_wide_star() {
        let n = 200usize;
        let parents: Vec<u32> = vec![0u32; n];
        let pool = ThreadPool::new(PoolConfig { n_threads: 4 });

        let via_euler = euler_tour_scan(&pool, &parents, |_| 1i64, |a, b| a + b, |a: i64| -a, 0i64);
        let via_contraction = crate::tree_scan::tree_scan(&pool, &parents, |_| 1i64, |a, b| a + b);

        assert_eq!(via_euler, via_contraction);
    }
}
