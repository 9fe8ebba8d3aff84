//! Per-block max-tree construction and boundary-edge reduction.
//!
//! Each image block is built into a local max-tree independently by priority
//! flood (generalizing the reference engine's `MaxtreeTrie` to arbitrary
//! connectivity via `for_each_neighbor` instead of its hand-unrolled
//! per-dimension neighbor checks), then reduced to a boundary tree: any
//! local pixel whose subtree never touches the block's border is resolved
//! to its final global parent immediately; only border-touching edges are
//! exported for the later global assembly (§5.6 / §5.7).

use maxtree_core::{Dims, Value};
use maxtree_image::{for_each_neighbor, BlockShape, Connectivity, Edge, Graph, Image, ImageBlocks};

use crate::radix_sort::{radix_sort_seq, RadixItem};
use crate::trie_queue::TrieQueue;

#[derive(Clone, Copy)]
struct RankItem {
    value: u64,
    index: u32,
}

impl RadixItem for RankItem {
    fn unsigned_value(&self) -> u64 {
        self.value
    }
}

/// Stable sort of `values` by ascending order, returning `rank_to_index`
/// (the permutation taking a rank to its original index) and `index_to_rank`
/// (its inverse).
fn build_ranks<V: Value>(values: &[V]) -> (Vec<u32>, Vec<u32>) {
    let n = values.len();
    let mut items: Vec<RankItem> = values
        .iter()
        .enumerate()
        .map(|(i, v)| RankItem {
            value: v.to_unsigned().into(),
            index: i as u32,
        })
        .collect();

    radix_sort_seq(&mut items, V::BITS);

    let rank_to_index: Vec<u32> = items.iter().map(|it| it.index).collect();
    let mut index_to_rank = vec![0u32; n];
    for (rank, &idx) in rank_to_index.iter().enumerate() {
        index_to_rank[idx as usize] = rank as u32;
    }

    (rank_to_index, index_to_rank)
}

/// Priority-flood max-tree build over `n = rank_to_index.len()` pixels
/// addressed by local index. `parents[local]` receives the local index of
/// `local`'s parent in the max-tree (a pixel is its own root's parent).
pub fn maxtree_priority_flood<const N: usize>(
    dims: &Dims<N>,
    connectivity: Connectivity,
    rank_to_index: &[u32],
    index_to_rank: &[u32],
    parents: &mut [u32],
) {
    let n = rank_to_index.len();
    if n == 0 {
        return;
    }

    let mut visited = vec![false; n];
    let mut queue = TrieQueue::new((n - 1) as u32);

    let mut current = rank_to_index[0];
    let mut current_rank = 0u32;
    parents[current as usize] = current;
    visited[current as usize] = true;

    loop {
        let mut found_next: Option<(u32, u32)> = None;

        for_each_neighbor(dims, connectivity, current, |nb: u32| {
            if visited[nb as usize] {
                return true;
            }
            visited[nb as usize] = true;
            let nb_rank = index_to_rank[nb as usize];
            if nb_rank <= current_rank {
                queue.insert(nb_rank);
                true
            } else {
                found_next = Some((nb, nb_rank));
                false
            }
        });

        if let Some((next, next_rank)) = found_next {
            queue.insert(current_rank);
            current = next;
            current_rank = next_rank;
            continue;
        }

        if queue.empty() {
            break;
        }

        let parent_rank = queue.top();
        let parent = rank_to_index[parent_rank as usize];
        queue.remove();
        parents[current as usize] = parent;
        current = parent;
        current_rank = parent_rank;
    }
}

/// Build every block's local max-tree, reduce it to a boundary tree, and
/// write the resulting local edges (for border-touching pixels) plus
/// resolved global parents (for everything else) into `graph`/`parents`.
///
/// `graph` must already be sized with one subgraph per block and enough
/// capacity per subgraph (see [`maxtree_image::determine_max_edges`]).
pub fn reduce_edges<V: Value, const N: usize, Shape: BlockShape<N>>(
    pool: &crate::pool::ThreadPool,
    image: &Image<V, N>,
    parents: &mut [u32],
    graph: &mut Graph<u32>,
) {
    let grid = ImageBlocks::<N>::new::<Shape>(*image.dimensions());
    let n_blocks = grid.n_blocks();
    let connectivity = image.connectivity();
    let n_pixels = image.values().len();

    // Per-block subgraph bounds, snapshotted once: each worker below writes
    // only inside its own block's disjoint `[offsets[b], offsets[b+1])` span
    // of `edges` and its own disjoint set of pixels in `parents`, so sharing
    // these two buffers across threads through raw pointers carries no data
    // race even though the pool gives each worker no exclusive Rust borrow.
    let offsets: Vec<usize> = (0..=n_blocks).map(|b| graph.subgraph_offset(b)).collect();
    let edges_len = graph.edges().len();

    let values_ptr = SendPtr(image.values().as_ptr());
    let parents_ptr = SendMutPtr(parents.as_mut_ptr());
    let edges_ptr = SendMutPtr(graph.edges_mut().as_mut_ptr());

    let local_counts: Vec<atomic::Atomic<usize>> = (0..n_blocks).map(|_| atomic::Atomic::new(0)).collect();
    let global_counts: Vec<atomic::Atomic<usize>> = (0..n_blocks).map(|_| atomic::Atomic::new(0)).collect();
    let local_counts = &local_counts[..];
    let global_counts = &global_counts[..];

    pool.for_all_blocks(n_blocks, move |block_nr, _t| {
        let values = unsafe { std::slice::from_raw_parts(values_ptr.0, n_pixels) };
        let parents = unsafe { std::slice::from_raw_parts_mut(parents_ptr.0, n_pixels) };
        let edges = unsafe { std::slice::from_raw_parts_mut(edges_ptr.0, edges_len) };
        let subgraph_edges = &mut edges[offsets[block_nr]..offsets[block_nr + 1]];

        let block = grid.block::<Shape>(block_nr);
        let len = block.len();

        let mut local_values: Vec<V> = Vec::with_capacity(len);
        let mut local_to_global: Vec<u32> = Vec::with_capacity(len);
        block.apply::<u32>(|global, _local| {
            local_values.push(values[global.index()]);
            local_to_global.push(global.index() as u32);
        });

        let (rank_to_index, index_to_rank) = build_ranks(&local_values);

        let mut local_parents = vec![0u32; len];
        maxtree_priority_flood(block.dimensions(), connectivity, &rank_to_index, &index_to_rank, &mut local_parents);

        let mut is_boundary_subtree = vec![false; len];
        for local in 0..len {
            if block.is_boundary(local) {
                is_boundary_subtree[local] = true;
            }
        }
        // Propagate "touches the boundary" up from leaves to roots, walking
        // in descending rank order so every child is processed before its
        // parent.
        for rank in (0..len).rev() {
            let k = rank_to_index[rank] as usize;
            if is_boundary_subtree[k] {
                is_boundary_subtree[local_parents[k] as usize] = true;
            }
        }

        let mut n_local_edges = 0usize;

        for rank in 0..len {
            let k = rank_to_index[rank] as usize;
            let parent_local = local_parents[k];

            if is_boundary_subtree[k] && parent_local as usize != k {
                // The block max-tree already orders parent before child by
                // rank, so the pair is canonical without a value lookup.
                subgraph_edges[n_local_edges] = Edge::canonical(
                    local_to_global[parent_local as usize],
                    local_to_global[k],
                    true,
                );
                n_local_edges += 1;
            } else {
                parents[local_to_global[k] as usize] = local_to_global[parent_local as usize];
            }
        }

        local_counts[block_nr].store(n_local_edges, std::sync::atomic::Ordering::Relaxed);

        let n_global_edges = add_global_edges::<V, N>(
            &block,
            values,
            &local_to_global,
            &mut subgraph_edges[n_local_edges..],
        );
        global_counts[block_nr].store(n_global_edges, std::sync::atomic::Ordering::Relaxed);
    });

    for b in 0..n_blocks {
        graph.set_local_edge_count(b, local_counts[b].load(std::sync::atomic::Ordering::Relaxed));
        graph.set_global_edge_count(b, global_counts[b].load(std::sync::atomic::Ordering::Relaxed));
    }
}

/// Emit one candidate edge per pair of block-adjacent pixels across a lower
/// face of the grid (i.e. towards decreasing coordinate on some axis whose
/// predecessor block exists), generalizing the reference engine's
/// axis-unrolled `add_global_edges`. Returns the number of edges written.
fn add_global_edges<V: Value, const N: usize>(
    block: &maxtree_image::ImageBlock<N>,
    values: &[V],
    local_to_global: &[u32],
    out: &mut [Edge<u32>],
) -> usize {
    let loc = *block.location();
    let dims = *block.dimensions();
    let mut ctr = 0usize;

    for d in 0..N {
        if loc[d] == 0 {
            continue;
        }

        let stride = dims.stride(d);
        let len = dims.length();
        let mut local = 0usize;
        while local < len {
            let local_coord_d = (local / stride) % dims[d];
            if local_coord_d == 0 {
                let current = local_to_global[local];
                let neighbor = current - stride as u32;

                // Matches the reference engine's `add_edge`: a strict value
                // comparison, not the (value, index) tie-break used inside a
                // single block's own max-tree.
                let edge = if values[neighbor as usize] > values[current as usize] {
                    Edge { a: current, b: neighbor }
                } else {
                    Edge { a: neighbor, b: current }
                };
                out[ctr] = edge;
                ctr += 1;
            }
            local += 1;
        }
    }

    ctr
}

struct SendPtr<T>(*const T);
unsafe impl<T> Send for SendPtr<T> {}
struct SendMutPtr<T>(*mut T);
unsafe impl<T> Send for SendMutPtr<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{PoolConfig, ThreadPool};
    use maxtree_image::DefaultBlockShape;

    #[test]
    fn priority_flood_is_a_single_tree_spanning_all_pixels() {
        let dims: Dims<2> = Dims::new([4, 4]);
        let values: Vec<u8> = vec![
            1, 2, 3, 4, //
            5, 9, 8, 6, //
            4, 7, 9, 3, //
            2, 1, 0, 5,
        ];
        let (rank_to_index, index_to_rank) = build_ranks(&values);
        let mut parents = vec![0u32; values.len()];
        maxtree_priority_flood(&dims, Connectivity::Face, &rank_to_index, &index_to_rank, &mut parents);

        // Every pixel must reach a single root by following parent pointers.
        let mut roots = std::collections::HashSet::new();
        for i in 0..values.len() {
            let mut cur = i as u32;
            for _ in 0..values.len() + 1 {
                let p = parents[cur as usize];
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
    fn reduce_edges_resolves_interior_pixels_and_exports_boundary_edges() {
        let dims = [8usize, 8];
        let values: Vec<u8> = (0..64).map(|i| (i * 37 % 251) as u8).collect();
        let image = Image::<u8, 2>::new(&values, dims, Connectivity::Face).unwrap();

        let grid = ImageBlocks::<2>::new::<DefaultBlockShape>(*image.dimensions());
        let max_edges = maxtree_image::determine_max_edges::<2, DefaultBlockShape>(*image.dimensions(), Connectivity::Face);
        let mut graph = Graph::<u32>::new_uniform(grid.n_blocks(), max_edges / grid.n_blocks());
        let mut parents = vec![0u32; values.len()];

        let pool = ThreadPool::new(PoolConfig { n_threads: 2 });
        reduce_edges::<u8, 2, DefaultBlockShape>(&pool, &image, &mut parents, &mut graph);

        // With one block covering the whole 8x8 image, nothing is block-adjacent.
        assert_eq!(graph.n_edges(), 0);
    }
}
