//! MSB-first bit-partitioned graph partitioning.
//!
//! Recovers parent pointers for every boundary connected component at each
//! value band, processing the band index from its most significant bit down
//! to bit 0. At each level every edge is classified by its endpoints'
//! current bit: `00` edges stay live for the next level (or, at the last
//! level, are handed to union-by-rank as pure intra-band edges), `11` edges
//! have both endpoints above the bit and get unioned via [`crate::cc`], and
//! `01` edges cross the bit boundary and get resolved into `parent[]` by
//! repeatedly attaching the best still-outside candidate to each `11`
//! component's canonical root. `10` cannot occur: edges are canonically
//! ordered so `partition[a] <= partition[b]`.
//!
//! Every level's classification and resolution passes are dispatched
//! through the pool. Two `01` edges sharing a component can race to improve
//! the same `parent[]` slot in the same `select` round — as in `crate::cc`,
//! any edge whose candidate improves on what's recorded is a valid winner,
//! so `parent` is backed by `atomic::Atomic<u32>` with relaxed ordering to
//! make that race well-defined rather than undefined behavior.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use atomic::Atomic;
use parking_lot::Mutex;

use maxtree_core::Value;
use maxtree_image::{Edge, Graph};

use crate::cc::connected_components;
use crate::pool::ThreadPool;
use crate::select::ItemBlocks;

const SELECT_BLOCK_LEN: usize = 8192;
const FOR_ALL_BLOCK_LEN: usize = 8192;

struct SendPtr<T>(*const T);
unsafe impl<T> Send for SendPtr<T> {}
struct SendMutPtr<T>(*mut T);
unsafe impl<T> Send for SendMutPtr<T> {}

/// Partitions `graph`'s edges against the per-pixel `partition` labels
/// (`0..n_partitions`, monotone non-decreasing in pixel value), writing
/// `parent[]` for every boundary component resolved along the way. Returns
/// the surviving same-band ("00 all the way down") edges, grouped by band,
/// for the caller to hand to union-by-rank.
pub fn partition_graph<V: Value>(
    pool: &ThreadPool,
    graph: &Graph<u32>,
    values: &[V],
    partition: &[u32],
    parent: &mut [u32],
    n_partitions: usize,
) -> Vec<Vec<Edge<u32>>> {
    if n_partitions <= 1 {
        return vec![all_edges(graph)];
    }

    let msb_start = n_partitions.trailing_zeros() - 1;
    let mut active = all_edges(graph);
    let max_node = partition.len();
    let mut roots = vec![0u32; max_node];
    let atomic_parent: Vec<Atomic<u32>> = parent.iter().map(|&p| Atomic::new(p)).collect();

    for msb in (0..=msb_start).rev() {
        let (mut kept00, edges01, edges11) = classify_by_bit(pool, &active, partition, msb);

        for edge in &edges01 {
            roots[edge.b as usize] = edge.b;
        }
        if !edges11.is_empty() {
            for edge in &edges11 {
                roots[edge.a as usize] = edge.a;
                roots[edge.b as usize] = edge.b;
            }
            connected_components(pool, &edges11, values, &mut roots);
        }

        resolve_01_edges(pool, &edges01, values, &roots, &atomic_parent);

        // Re-emit every original 01-edge against the now-converged parent[],
        // skipping the trivial self-loop where `a` already is the winner.
        kept00.extend(reemit_01_edges(pool, &edges01, &roots, &atomic_parent));

        active = kept00;
    }

    for (slot, atom) in parent.iter_mut().zip(atomic_parent.iter()) {
        *slot = atom.load(Ordering::Relaxed);
    }

    let mut by_band: Vec<Vec<Edge<u32>>> = vec![Vec::new(); n_partitions];
    for edge in active {
        by_band[partition[edge.a as usize] as usize].push(edge);
    }
    by_band
}

fn all_edges(graph: &Graph<u32>) -> Vec<Edge<u32>> {
    let mut edges = Vec::with_capacity(graph.n_edges());
    for s in 0..graph.n_subgraphs() {
        edges.extend_from_slice(graph.subgraph(s));
    }
    edges
}

/// Splits `edges` into `00`/`01`/`11` bands under bit `msb` of `partition`,
/// one block per pool dispatch, merged in block order once every block has
/// reported its local counts.
fn classify_by_bit(pool: &ThreadPool, edges: &[Edge<u32>], partition: &[u32], msb: u32) -> (Vec<Edge<u32>>, Vec<Edge<u32>>, Vec<Edge<u32>>) {
    let n = edges.len();
    if n == 0 {
        return (Vec::new(), Vec::new(), Vec::new());
    }

    let n_blocks = (n + FOR_ALL_BLOCK_LEN - 1) / FOR_ALL_BLOCK_LEN;
    let edges_ptr = SendPtr(edges.as_ptr());
    let partition_ptr = SendPtr(partition.as_ptr());
    let n_partition = partition.len();

    let bins: Arc<Mutex<Vec<(Vec<Edge<u32>>, Vec<Edge<u32>>, Vec<Edge<u32>>)>>> =
        Arc::new(Mutex::new((0..n_blocks).map(|_| (Vec::new(), Vec::new(), Vec::new())).collect()));

    {
        let bins = Arc::clone(&bins);
        pool.for_all_blocks(n_blocks, move |b, _t| {
            let edges = unsafe { std::slice::from_raw_parts(edges_ptr.0, n) };
            let partition = unsafe { std::slice::from_raw_parts(partition_ptr.0, n_partition) };

            let begin = b * FOR_ALL_BLOCK_LEN;
            let end = (begin + FOR_ALL_BLOCK_LEN).min(n);

            let mut kept00 = Vec::new();
            let mut edges01 = Vec::new();
            let mut edges11 = Vec::new();

            for &edge in &edges[begin..end] {
                let bit_a = (partition[edge.a as usize] >> msb) & 1;
                let bit_b = (partition[edge.b as usize] >> msb) & 1;
                debug_assert!(bit_a <= bit_b, "edges must be canonically ordered by partition");

                match (bit_a, bit_b) {
                    (0, 0) => kept00.push(edge),
                    (0, 1) => edges01.push(edge),
                    (1, 1) => edges11.push(edge),
                    _ => unreachable!("10 cannot occur under canonical edge order"),
                }
            }

            bins.lock()[b] = (kept00, edges01, edges11);
        });
    }

    let bins = Arc::try_unwrap(bins).expect("no outstanding references after for_all_blocks returns").into_inner();

    let mut kept00 = Vec::new();
    let mut edges01 = Vec::new();
    let mut edges11 = Vec::new();
    for (a, b, c) in bins {
        kept00.extend(a);
        edges01.extend(b);
        edges11.extend(c);
    }
    (kept00, edges01, edges11)
}

/// Repeatedly attaches the best still-unattached `01` candidate to each
/// component's `parent[]` slot, stopping only once no edge can improve on
/// what is already recorded there. Driven by [`ItemBlocks::select`], the
/// same iterative narrowing substrate `crate::tree_scan`/`crate::reconstruct`
/// use for their contraction rounds.
fn resolve_01_edges<V: Value>(pool: &ThreadPool, edges01: &[Edge<u32>], values: &[V], roots: &[u32], atomic_parent: &[Atomic<u32>]) {
    if edges01.is_empty() {
        return;
    }

    let mut items: Vec<Edge<u32>> = edges01.to_vec();
    let mut blocks = ItemBlocks::new(items.len(), SELECT_BLOCK_LEN);

    while blocks.length() > 0 {
        let items_ptr = SendMutPtr(items.as_mut_ptr());
        let values_ptr = SendPtr(values.as_ptr());
        let roots_ptr = SendPtr(roots.as_ptr());
        let parent_ptr = SendPtr(atomic_parent.as_ptr());
        let n_items = items.len();
        let n_values = values.len();
        let n_roots = roots.len();
        let n_parent = atomic_parent.len();

        blocks.select(pool, move |i, o| {
            let items = unsafe { std::slice::from_raw_parts_mut(items_ptr.0, n_items) };
            let values = unsafe { std::slice::from_raw_parts(values_ptr.0, n_values) };
            let roots = unsafe { std::slice::from_raw_parts(roots_ptr.0, n_roots) };
            let atomic_parent = unsafe { std::slice::from_raw_parts(parent_ptr.0, n_parent) };

            let edge = items[i];
            let cc_root = roots[edge.b as usize];
            let current_parent = atomic_parent[cc_root as usize].load(Ordering::Relaxed);
            let candidate = edge.a;

            let improves = current_parent == cc_root
                || values[candidate as usize] < values[current_parent as usize]
                || (values[candidate as usize] == values[current_parent as usize] && candidate < current_parent);

            if improves {
                atomic_parent[cc_root as usize].store(candidate, Ordering::Relaxed);
                items[o] = edge;
                true
            } else {
                false
            }
        });
    }
}

/// Re-derives, for every original `01` edge, the converged intra-band edge
/// `(a, parent[roots[b]])` it resolves to — dropped if `a` is already the
/// winner at that component.
fn reemit_01_edges(pool: &ThreadPool, edges01: &[Edge<u32>], roots: &[u32], atomic_parent: &[Atomic<u32>]) -> Vec<Edge<u32>> {
    let n = edges01.len();
    if n == 0 {
        return Vec::new();
    }

    let n_blocks = (n + FOR_ALL_BLOCK_LEN - 1) / FOR_ALL_BLOCK_LEN;
    let edges_ptr = SendPtr(edges01.as_ptr());
    let roots_ptr = SendPtr(roots.as_ptr());
    let parent_ptr = SendPtr(atomic_parent.as_ptr());
    let n_roots = roots.len();
    let n_parent = atomic_parent.len();

    let bins: Arc<Mutex<Vec<Vec<Edge<u32>>>>> = Arc::new(Mutex::new((0..n_blocks).map(|_| Vec::new()).collect()));

    {
        let bins = Arc::clone(&bins);
        pool.for_all_blocks(n_blocks, move |b, _t| {
            let edges = unsafe { std::slice::from_raw_parts(edges_ptr.0, n) };
            let roots = unsafe { std::slice::from_raw_parts(roots_ptr.0, n_roots) };
            let atomic_parent = unsafe { std::slice::from_raw_parts(parent_ptr.0, n_parent) };

            let begin = b * FOR_ALL_BLOCK_LEN;
            let end = (begin + FOR_ALL_BLOCK_LEN).min(n);

            let mut out = Vec::new();
            for &edge in &edges[begin..end] {
                let cc_root = roots[edge.b as usize];
                let p = atomic_parent[cc_root as usize].load(Ordering::Relaxed);
                if edge.a != p {
                    out.push(Edge { a: edge.a, b: p });
                }
            }
            bins.lock()[b] = out;
        });
    }

    Arc::try_unwrap(bins)
        .expect("no outstanding references after for_all_blocks returns")
        .into_inner()
        .into_iter()
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;

    #[test]
    fn single_partition_returns_all_edges_unpartitioned() {
        let mut graph = Graph::<u32>::new_uniform(1, 3);
        let edges = graph.subgraph_capacity_mut(0);
        edges[0] = Edge { a: 0, b: 1 };
        edges[1] = Edge { a: 1, b: 2 };
        graph.set_local_edge_count(0, 2);
        graph.set_global_edge_count(0, 0);

        let values = vec![3u32, 2, 1];
        let partition = vec![0u32; 3];
        let mut parent = vec![0u32; 3];
        let pool = ThreadPool::new(PoolConfig { n_threads: 2 });

        let by_band = partition_graph(&pool, &graph, &values, &partition, &mut parent, 1);
        assert_eq!(by_band.len(), 1);
        assert_eq!(by_band[0].len(), 2);
    }

    #[test]
    fn cross_band_edge_resolves_a_parent() {
        // Two bands: node 0 in band 0 (lower value), nodes 1,2 in band 1.
        // Edge 0-1 crosses bands; edge 1-2 is an 11 edge inside band 1.
        let mut graph = Graph::<u32>::new_uniform(1, 4);
        let edges = graph.subgraph_capacity_mut(0);
        edges[0] = Edge { a: 0, b: 1 };
        edges[1] = Edge { a: 1, b: 2 };
        graph.set_local_edge_count(0, 2);
        graph.set_global_edge_count(0, 0);

        let values = vec![1u32, 5, 6];
        let partition = vec![0u32, 1, 1];
        let mut parent: Vec<u32> = (0..3).collect();
        let pool = ThreadPool::new(PoolConfig { n_threads: 4 });

        let by_band = partition_graph(&pool, &graph, &values, &partition, &mut parent, 2);

        // Band 1's component (nodes 1,2) should have its root's parent set to
        // node 0, the only outside candidate.
        let cc_root = if values[1] <= values[2] { 1u32 } else { 2u32 };
        assert_eq!(parent[cc_root as usize], 0);
        let _ = by_band;
    }
}
