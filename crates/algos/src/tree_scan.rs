//! Bottom-up semigroup attribute scan over a maxtree, via randomized tree
//! contraction.
//!
//! Ported from the reference engine's `TreeContract`: every node's parent
//! edge `(parents[i], i)` is radix-sorted by parent (a root's self-loop
//! sorts last under a sentinel key), then classified by in-degree — a
//! `childs[]` entry of `node` itself marks a leaf, the sentinel `n` marks a
//! node with more than one child ("balanced"), anything else is the single
//! child of a linked-list run. `select`/`iterate` (`crate::select`) then
//! drive repeated randomized rounds: a fresh 8-bit hash per round lets each
//! active linked-list node's single owner (the node whose hash is zero, or
//! the global root) walk its entire still-attached chain and fold
//! [`plus`](tree_scan)'s attribute bottom-up in one pass, while every other
//! node on that chain defers to its owner this round. A node that resolves
//! fully becomes a leaf and drops out; one that only partially resolves is
//! "diverted" and relinked to its first unresolved descendant for the next
//! round, with the merge recorded in a reverse (last-round-first) log
//! applied once contraction finishes.
//!
//! Because a chain-owning node is always the single hash-zero (or root)
//! node of its run and every non-owner on the chain defers outright rather
//! than acting independently, the set of nodes any one thread's chain walk
//! touches in a given round is disjoint from every other active thread's —
//! unlike the coin-flip contraction in `crate::cc`/`crate::partition`, no
//! two threads ever contend for the same `childs`/`attributes` slot within
//! a round. That makes the per-round passes below sound to dispatch through
//! the pool with plain (non-atomic) shared writes.

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

#[inline]
fn is_balanced(childs: &[u32], node: u32, n: u32) -> bool {
    childs[node as usize] == n
}

#[inline]
fn is_leaf(childs: &[u32], node: u32) -> bool {
    childs[node as usize] == node
}

#[inline]
fn is_linked_list_node(childs: &[u32], node: u32, n: u32) -> bool {
    !is_balanced(childs, node, n) && !is_leaf(childs, node)
}

/// A deterministic-enough seed for the per-call RNG stream; contraction is
/// randomized by design, not required to be reproducible across calls.
fn rand_seed() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0xD1B5_4A32_D192_ED03);
    COUNTER.fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed)
}

/// Scans every node's attribute into its ancestors, bottom-up, via
/// randomized tree contraction.
///
/// `attributes[i]` is initialized to `w(i)` for every node; on return
/// `attributes[i]` holds the semigroup combination of `w` over `i`'s entire
/// subtree. `parents` must describe a forest with exactly one self-parented
/// root — guaranteed for a max-tree built over a connected pixel domain,
/// which is the only shape this crate ever produces.
pub fn tree_scan<A, W, P>(pool: &ThreadPool, parents: &[u32], w: W, plus: P) -> Vec<A>
where
    A: Clone + Send + 'static,
    W: Fn(usize) -> A,
    P: Fn(A, A) -> A + Send + Sync + 'static,
{
    let n = parents.len();
    let mut attributes: Vec<A> = (0..n).map(&w).collect();
    if n <= 1 {
        return attributes;
    }

    debug_assert_eq!(
        (0..n).filter(|&i| parents[i] as usize == i).count(),
        1,
        "tree_scan assumes a single self-parented root"
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

    let n_forward = n - 1;
    let root = forward[n - 1].b;
    let mut childs: Vec<u32> = (0..n as u32).collect();

    classify_children(pool, &forward, n, n_forward, &mut childs);

    let mut select = IterativeSelect2Compact1::<u32>::new(n_forward, SELECT_BLOCK_LEN);
    let mut edge_indices: Vec<u32> = vec![0; n_forward];
    select_first(pool, &mut select, &forward, n_forward, &mut edge_indices);

    let plus = Arc::new(plus);
    let mut rng = seeded_rng(rand_seed());
    let mut update_later: Vec<Vec<u32>> = Vec::new();

    while select.length() > 0 {
        let hash = IntegerHash::generate(&mut rng);
        contract(
            pool,
            &mut select,
            &mut forward,
            &mut childs,
            &mut attributes,
            &mut edge_indices,
            &plus,
            &hash,
            root,
            &mut update_later,
        );
    }

    merge_first_excluded_descendant(pool, &forward, &mut attributes, &plus, &update_later);

    attributes
}

/// Determines, for every node that is some other node's parent, whether it
/// has one child (a linked-list run, `childs[parent] = child`) or more than
/// one (balanced, `childs[parent] = n`). Leaves keep their `init`-time
/// identity entry (`childs[i] == i`).
fn classify_children(pool: &ThreadPool, forward: &[FwdEdge], n: usize, n_forward: usize, childs: &mut [u32]) {
    if n_forward == 0 {
        return;
    }

    let forward_ptr = SendPtr(forward.as_ptr());
    let childs_ptr = SendMutPtr(childs.as_mut_ptr());

    pool.for_all(n_forward, FOR_ALL_BLOCK_LEN, move |i, _t| {
        let forward = unsafe { std::slice::from_raw_parts(forward_ptr.0, n) };
        let childs = unsafe { std::slice::from_raw_parts_mut(childs_ptr.0, n) };

        let current = forward[i];
        let left_end_different = i == 0 || forward[i - 1].a != current.a;
        let right_end_different = i + 1 == n_forward || forward[i + 1].a != current.a;

        if right_end_different {
            if left_end_different {
                childs[current.a as usize] = current.b;
            } else {
                childs[current.a as usize] = n as u32;
            }
        }
    });
}

/// Seeds the active set with one representative edge per distinct parent —
/// the last entry of each contiguous same-parent run in sorted `forward`.
fn select_first(
    pool: &ThreadPool,
    select: &mut IterativeSelect2Compact1<u32>,
    forward: &[FwdEdge],
    n_forward: usize,
    edge_indices: &mut [u32],
) {
    let forward_ptr = SendPtr(forward.as_ptr());
    let edge_indices_ptr = SendMutPtr(edge_indices.as_mut_ptr());
    let n_forward_total = forward.len();
    let n_ei = edge_indices.len();

    select.item_blocks_mut().select(pool, move |i, o| {
        let forward = unsafe { std::slice::from_raw_parts(forward_ptr.0, n_forward_total) };
        let edge_indices = unsafe { std::slice::from_raw_parts_mut(edge_indices_ptr.0, n_ei) };

        let current = forward[i];
        let right_start_different = i + 1 == n_forward || current.a != forward[i + 1].a;
        if right_start_different {
            edge_indices[o] = i as u32;
        }
        right_start_different
    });
}

/// Walks a node's linked-list chain as far as this round's hash lets it,
/// folding `plus` bottom-up. Returns whether the walk bottomed out at a
/// leaf (the edge at `i` fully resolved) — if not, `forward[i].b` is
/// relinked to the first node the walk couldn't claim this round.
fn try_merge_and_check_if_leaf<A, P>(
    forward: &mut [FwdEdge],
    childs: &mut [u32],
    attributes: &mut [A],
    hash: &IntegerHash,
    plus: &P,
    i: u32,
) -> bool
where
    A: Clone,
    P: Fn(A, A) -> A,
{
    let edge = forward[i as usize];
    let n = forward.len() as u32;
    let mut stack: Vec<u32> = Vec::new();

    let mut current = edge.b;
    while is_linked_list_node(childs, current, n) && hash.hash(current as u64, N_HASH_BITS) != 0 {
        stack.push(current);
        current = childs[current as usize];
    }

    let future_leaf = is_leaf(childs, current);

    if !future_leaf && stack.is_empty() {
        return false;
    }

    if future_leaf {
        let mut tail = current;
        while let Some(next) = stack.pop() {
            childs[next as usize] = next;
            attributes[next as usize] = plus(attributes[next as usize].clone(), attributes[tail as usize].clone());
            tail = next;
        }
        attributes[edge.a as usize] = plus(attributes[edge.a as usize].clone(), attributes[tail as usize].clone());
        return true;
    }

    let relink_node = current;
    let mut tail = stack.pop().expect("stack non-empty: future_leaf is false and the empty-stack case already returned");
    while let Some(next) = stack.pop() {
        childs[next as usize] = relink_node;
        attributes[next as usize] = plus(attributes[next as usize].clone(), attributes[tail as usize].clone());
        tail = next;
    }
    attributes[edge.a as usize] = plus(attributes[edge.a as usize].clone(), attributes[tail as usize].clone());
    forward[i as usize].b = relink_node;
    false
}

/// One contraction round: attempt to merge every active chain or balanced
/// group, then classify the (possibly relinked) survivors as kept,
/// resolved-to-leaf (removed), or diverted for a deferred final merge.
#[allow(clippy::too_many_arguments)]
fn contract<A, P>(
    pool: &ThreadPool,
    select: &mut IterativeSelect2Compact1<u32>,
    forward: &mut [FwdEdge],
    childs: &mut [u32],
    attributes: &mut [A],
    edge_indices: &mut [u32],
    plus: &Arc<P>,
    hash: &IntegerHash,
    root: u32,
    update_later: &mut Vec<Vec<u32>>,
) where
    A: Clone + Send + 'static,
    P: Fn(A, A) -> A + Send + Sync + 'static,
{
    let n = forward.len() as u32;
    let n_edges = forward.len();
    let n_attrs = attributes.len();
    let n_ei = edge_indices.len();

    {
        let forward_ptr = SendMutPtr(forward.as_mut_ptr());
        let childs_ptr = SendMutPtr(childs.as_mut_ptr());
        let attributes_ptr = SendMutPtr(attributes.as_mut_ptr());
        let edge_indices_ptr = SendPtr(edge_indices.as_ptr());
        let plus = Arc::clone(plus);
        let hash = *hash;

        select.item_blocks().apply(pool, move |pos| {
            let forward = unsafe { std::slice::from_raw_parts_mut(forward_ptr.0, n_edges) };
            let childs = unsafe { std::slice::from_raw_parts_mut(childs_ptr.0, n_edges) };
            let attributes = unsafe { std::slice::from_raw_parts_mut(attributes_ptr.0, n_attrs) };
            let edge_indices = unsafe { std::slice::from_raw_parts(edge_indices_ptr.0, n_ei) };

            let edge_idx = edge_indices[pos];
            let start_point = forward[edge_idx as usize].a;

            let is_ll_node = edge_idx == 0 || forward[edge_idx as usize - 1].a != start_point;

            if is_ll_node && start_point != root && hash.hash(start_point as u64, N_HASH_BITS) != 0 {
                // start_point is merged by another node's chain walk this round.
                return;
            }

            if is_ll_node {
                let became_leaf = try_merge_and_check_if_leaf(forward, childs, attributes, &hash, plus.as_ref(), edge_idx);
                if became_leaf {
                    forward[edge_idx as usize].b = start_point;
                }
                return;
            }

            // Balanced node: walk every edge in the contiguous same-parent
            // run, compacting surviving (non-merged) children toward the
            // high end of the run's index range.
            let compacted_index = edge_idx as i64;
            let mut forward_compacting = compacted_index;
            let mut cur = edge_idx as i64;
            let mut n_childs = 0usize;

            loop {
                if !try_merge_and_check_if_leaf(forward, childs, attributes, &hash, plus.as_ref(), cur as u32) {
                    n_childs += 1;
                    forward[forward_compacting as usize] = forward[cur as usize];
                    forward_compacting -= 1;
                }

                if cur == 0 {
                    break;
                }
                cur -= 1;
                if forward[cur as usize].a != start_point {
                    break;
                }
            }

            if n_childs == 0 {
                forward[compacted_index as usize].b = start_point;
                return;
            }

            if forward_compacting >= 0 && forward[forward_compacting as usize].a == start_point {
                forward[forward_compacting as usize].a = n;
            }
        });
    }

    let mut diverted: Vec<u32> = Vec::new();
    {
        let forward_ptr = SendMutPtr(forward.as_mut_ptr());
        let childs_ptr = SendMutPtr(childs.as_mut_ptr());
        let hash = *hash;

        select.iterate(pool, edge_indices, &mut diverted, move |item| {
            let forward = unsafe { std::slice::from_raw_parts_mut(forward_ptr.0, n_edges) };
            let childs = unsafe { std::slice::from_raw_parts_mut(childs_ptr.0, n_edges) };

            let i = item;
            let edge = forward[i as usize];
            let start_point = edge.a;

            if edge.b == edge.a {
                childs[start_point as usize] = start_point;
                return (Classify::Remove, item);
            }

            if childs[start_point as usize] == start_point {
                return (Classify::Remove, item);
            }

            if i > 0 && forward[i as usize - 1].a == start_point {
                return (Classify::Keep, item);
            }

            if childs[start_point as usize] == n || start_point == root || hash.hash(start_point as u64, N_HASH_BITS) == 0 {
                childs[start_point as usize] = edge.b;
                return (Classify::Keep, item);
            }

            forward[i as usize] = FwdEdge { a: edge.a, b: childs[edge.a as usize] };
            (Classify::Divert, item)
        });
    }

    update_later.push(diverted);
}

/// Applies every round's diverted merges in reverse (last round first), so
/// a descendant re-rooted in a later round is already settled by the time
/// an earlier round's deferred merge reads its attribute.
fn merge_first_excluded_descendant<A, P>(
    pool: &ThreadPool,
    forward: &[FwdEdge],
    attributes: &mut [A],
    plus: &Arc<P>,
    update_later: &[Vec<u32>],
) where
    A: Clone + Send + 'static,
    P: Fn(A, A) -> A + Send + Sync + 'static,
{
    let n_forward = forward.len();
    let n_attrs = attributes.len();

    for group in update_later.iter().rev() {
        if group.is_empty() {
            continue;
        }

        let group_ptr = SendPtr(group.as_ptr());
        let forward_ptr = SendPtr(forward.as_ptr());
        let attributes_ptr = SendMutPtr(attributes.as_mut_ptr());
        let plus = Arc::clone(plus);
        let n_group = group.len();

        pool.for_all(n_group, FOR_ALL_BLOCK_LEN, move |k, _t| {
            let group = unsafe { std::slice::from_raw_parts(group_ptr.0, n_group) };
            let forward = unsafe { std::slice::from_raw_parts(forward_ptr.0, n_forward) };
            let attributes = unsafe { std::slice::from_raw_parts_mut(attributes_ptr.0, n_attrs) };

            let edge = forward[group[k] as usize];
            attributes[edge.a as usize] = plus(attributes[edge.a as usize].clone(), attributes[edge.b as usize].clone());
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;

    #[test]
    fn counts_subtree_sizes() {
        // Tree: 0 is root, 1 and 2 are children of 0, 3 is a child of 1.
        let parents = vec![0u32, 0, 0, 1];
        let pool = ThreadPool::new(PoolConfig { n_threads: 4 });
        let sizes = tree_scan(&pool, &parents, |_| 1u32, |a, b| a + b);
        assert_eq!(sizes, vec![4, 2, 1, 1]);
    }

    #[test]
    fn single_node_tree_keeps_its_own_weight() {
        let parents = vec![0u32];
        let pool = ThreadPool::new(PoolConfig { n_threads: 2 });
        let attrs = tree_scan(&pool, &parents, |_| 7u32, |a, b| a + b);
        assert_eq!(attrs, vec![7]);
    }

    #[test]
    fn accumulates_max_over_subtree() {
        // Single tree, root is node 4. Children of 4: 0 and 3. 0's child: 1.
        // 3's child: 2.
        let parents = vec![4u32, 0, 3, 4, 4];
        let weights = vec![5u32, 9, 1, 2, 8];
        let pool = ThreadPool::new(PoolConfig { n_threads: 3 });
        let attrs = tree_scan(&pool, &parents, |i| weights[i], |a, b| a.max(b));

        // Subtree {0, 1}: max(5, 9) = 9.
        assert_eq!(attrs[0], 9);
        // Subtree {2, 3}: max(1, 2) = 2.
        assert_eq!(attrs[3], 2);
        // Root's subtree is everything: max(5, 9, 1, 2, 8) = 9.
        assert_eq!(attrs[4], 9);
    }

    #[test]
    fn long_chain_contracts_correctly() {
        // A pure linked list: 0 <- 1 <- 2 <- ... <- 199 (root).
        let n = 200usize;
        let mut parents: Vec<u32> = (0..n as u32).collect();
        for i in 0..n - 1 {
            parents[i] = (i + 1) as u32;
        }
        let pool = ThreadPool::new(PoolConfig { n_threads: 4 });
        let sizes = tree_scan(&pool, &parents, |_| 1u32, |a, b| a + b);

        for i in 0..n {
            assert_eq!(sizes[i], (n - i) as u32, "node {i} should count itself and every descendant below it");
        }
    }

    #[test]
    fn wide_star_contracts_correctly() {
        // Root 0 with 500 direct leaf children.
        let n = 501usize;
        let mut parents: Vec<u32> = vec![0u32; n];
        for i in 1..n {
            parents[i] = 0;
        }
        let pool = ThreadPool::new(PoolConfig { n_threads: 4 });
        let sizes = tree_scan(&pool, &parents, |_| 1u32, |a, b| a + b);

        assert_eq!(sizes[0], n as u32);
        for i in 1..n {
            assert_eq!(sizes[i], 1);
        }
    }
}
