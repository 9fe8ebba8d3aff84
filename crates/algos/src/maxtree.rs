//! Top-level max-tree construction, tying together per-block construction,
//! quantile estimation, graph partitioning and union-by-rank assembly.
//!
//! Mirrors the reference engine's `Maxtree` constructor: build every block's
//! local tree and boundary graph, then — if there's more than one worker
//! thread to spread the boundary graph's components over — estimate value
//! quantiles, assign every pixel to a band, partition the boundary graph by
//! band, and finally resolve every band's surviving edges by union-by-rank.
//! A single-threaded pool, or an image small enough that no boundary edges
//! survive block construction, short-circuits straight to the already-
//! resolved `parents`.

use maxtree_core::Value;
use maxtree_image::{determine_max_edges, BlockShape, Connectivity, Edge, Graph, Image, ImageBlocks};

use crate::block_tree::reduce_edges;
use crate::partition::partition_graph;
use crate::pool::ThreadPool;
use crate::quantile::{estimate_quantiles, Quantile};
use crate::union_by_rank::union_by_rank;

/// Builds the max-tree of `image`, writing each pixel's parent index into
/// `parents` (sized to `image.values().len()`; a root's own index is its
/// parent).
pub fn maxtree<V: Value, const N: usize, Shape: BlockShape<N>>(
    pool: &ThreadPool,
    image: &Image<V, N>,
    parents: &mut [u32],
) {
    let n = image.values().len();
    if n == 0 {
        return;
    }
    if n == 1 {
        parents[0] = 0;
        return;
    }

    let grid = ImageBlocks::<N>::new::<Shape>(*image.dimensions());
    let max_edges = determine_max_edges::<N, Shape>(*image.dimensions(), image.connectivity());
    let mut graph = Graph::<u32>::new(grid.n_blocks(), max_edges);

    reduce_edges::<V, N, Shape>(pool, image, parents, &mut graph);

    if graph.n_edges() == 0 {
        return;
    }

    let n_partitions = largest_power_of_two_at_most(pool.max_threads());
    let values = image.values();

    let edges_by_band = if n_partitions <= 1 {
        vec![all_edges(&graph)]
    } else {
        let quantiles = estimate_quantiles(pool, &graph, values, n_partitions);
        let partition = partition_image(pool, values, &quantiles, n_partitions);
        partition_graph(pool, &graph, values, &partition, parents, n_partitions)
    };

    let mut edges_by_band = edges_by_band;
    union_by_rank(pool, &mut edges_by_band, values, parents);
}

fn largest_power_of_two_at_most(n: usize) -> usize {
    if n <= 1 {
        1
    } else {
        1usize << (usize::BITS - 1 - n.leading_zeros())
    }
}

fn all_edges(graph: &Graph<u32>) -> Vec<Edge<u32>> {
    let mut edges = Vec::with_capacity(graph.n_edges());
    for s in 0..graph.n_subgraphs() {
        edges.extend_from_slice(graph.subgraph(s));
    }
    edges
}

fn partition_image<V: Value>(pool: &ThreadPool, values: &[V], quantiles: &[Quantile<V>], n_partitions: usize) -> Vec<u32> {
    let n = values.len();
    let mut partition = vec![0u32; n];

    let partition_ptr = SendMutPtr(partition.as_mut_ptr());
    let values_ptr = SendPtr(values.as_ptr());
    let quantiles_ptr = SendPtr(quantiles.as_ptr());
    let n_quantiles = quantiles.len();
    debug_assert_eq!(n_quantiles, n_partitions);

    pool.for_all(n, 8192, move |i, _t| {
        let partition = unsafe { std::slice::from_raw_parts_mut(partition_ptr.0, n) };
        let values = unsafe { std::slice::from_raw_parts(values_ptr.0, n) };
        let quantiles = unsafe { std::slice::from_raw_parts(quantiles_ptr.0, n_quantiles) };
        partition[i] = Quantile::determine_partition(values[i], i as u32, quantiles) as u32;
    });

    partition
}

struct SendPtr<T>(*const T);
unsafe impl<T> Send for SendPtr<T> {}
struct SendMutPtr<T>(*mut T);
unsafe impl<T> Send for SendMutPtr<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use maxtree_image::DefaultBlockShape;

    #[test]
    fn single_pixel_image_is_its_own_root() {
        let values = vec![42u8];
        let image = Image::<u8, 2>::new(&values, [1, 1], Connectivity::Face).unwrap();
        let pool = ThreadPool::new(PoolConfig { n_threads: 2 });
        let mut parents = vec![0u32; 1];
        maxtree::<u8, 2, DefaultBlockShape>(&pool, &image, &mut parents);
        assert_eq!(parents[0], 0);
    }

    #[test]
    fn flat_image_collapses_to_a_single_tree() {
        let values = vec![7u8; 16];
        let image = Image::<u8, 2>::new(&values, [4, 4], Connectivity::Face).unwrap();
        let pool = ThreadPool::new(PoolConfig { n_threads: 4 });
        let mut parents = vec![0u32; 16];
        maxtree::<u8, 2, DefaultBlockShape>(&pool, &image, &mut parents);

        let mut roots = std::collections::HashSet::new();
        for i in 0..16usize {
            let mut cur = i;
            for _ in 0..17 {
                let p = parents[cur] as usize;
                if p == cur {
                    break;
                }
                cur = p;
            }
            roots.insert(cur);
        }
        assert_eq!(roots.len(), 1);
    }

    #[test]
    fn multi_block_image_matches_sequential_oracle() {
        use crate::sequential::{check_equiv, maxtree_seq};

        // 300x2 forces two blocks under DefaultBlockShape's 256x256 cap,
        // exercising boundary-graph assembly, quantile estimation,
        // partitioning and union-by-rank end to end.
        let dims = [300usize, 2];
        let n = dims[0] * dims[1];
        let values: Vec<u8> = (0..n).map(|i| ((i * 53 + 7) % 251) as u8).collect();
        let image = Image::<u8, 2>::new(&values, dims, Connectivity::Face).unwrap();

        let pool = ThreadPool::new(PoolConfig { n_threads: 4 });
        let mut parents_parallel = vec![0u32; n];
        maxtree::<u8, 2, DefaultBlockShape>(&pool, &image, &mut parents_parallel);

        let mut parents_seq = vec![0u32; n];
        maxtree_seq(&image, &mut parents_seq);

        check_equiv(&mut parents_parallel, &mut parents_seq, &values);
    }
}
