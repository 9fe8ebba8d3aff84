//! Final union-by-rank maxtree assembly.
//!
//! Ties off every remaining intra-band edge into the maxtree's `parent[]`.
//! Each band's edges are sorted ascending by the value of their `a` endpoint
//! and walked from the highest value down (mirroring the reference engine's
//! `maxtree_union_by_rank`): a [`RankSet`] disjoint-set per pixel tracks
//! which pixels have already merged into a component, and each component
//! additionally tracks its *current* connected-component root — the pixel
//! whose `parents[]` entry is still open to improvement. When two components
//! merge, whichever side's root already has a resolved parent elsewhere (set
//! by an earlier, higher-valued edge, or by [`crate::partition`]'s cross-band
//! resolution) keeps that resolution and absorbs the other; otherwise the
//! higher side's root becomes the new parent of the lower side's root.
//!
//! A band's edges only ever connect pixels within that band (bands are
//! disjoint by construction — see [`crate::partition`]), so distinct bands
//! share no mutable state and are processed in parallel across the pool.

use maxtree_core::Value;
use maxtree_image::Edge;

use crate::pool::ThreadPool;
use crate::radix_sort::{radix_sort_seq, RadixItem};
use crate::rank_set::{compress_path, merge_sets, RankSet};

#[derive(Clone, Copy)]
struct KeyedEdge {
    key: u64,
    edge: Edge<u32>,
}

impl RadixItem for KeyedEdge {
    fn unsigned_value(&self) -> u64 {
        self.key
    }
}

/// Resolves every band's surviving intra-band edges into `parents`.
///
/// `parents` must already hold, for every pixel, either its own index (no
/// parent assigned yet) or a resolved parent set by [`crate::partition`]'s
/// cross-band resolution. On return every pixel touched by some edge has its
/// final maxtree parent.
pub fn union_by_rank<V: Value>(
    pool: &ThreadPool,
    edges_by_band: &mut [Vec<Edge<u32>>],
    values: &[V],
    parents: &mut [u32],
) {
    let n = parents.len();
    let mut sets: Vec<RankSet<u32>> = vec![RankSet::default(); n];
    for (i, set) in sets.iter_mut().enumerate() {
        set.reset(i as u32);
    }

    let n_bands = edges_by_band.len();
    let bands_ptr = SendMutPtr(edges_by_band.as_mut_ptr());
    let values_ptr = SendPtr(values.as_ptr());
    let sets_ptr = SendMutPtr(sets.as_mut_ptr());
    let parents_ptr = SendMutPtr(parents.as_mut_ptr());
    let n_values = values.len();

    pool.for_all_blocks(n_bands, move |band, _t| {
        let bands = unsafe { std::slice::from_raw_parts_mut(bands_ptr.0, n_bands) };
        let values = unsafe { std::slice::from_raw_parts(values_ptr.0, n_values) };
        let sets = unsafe { std::slice::from_raw_parts_mut(sets_ptr.0, n) };
        let parents = unsafe { std::slice::from_raw_parts_mut(parents_ptr.0, n) };

        let sorted = sort_band(&bands[band], values);
        assemble_band(&sorted, sets, parents);
    });
}

fn sort_band<V: Value>(edges: &[Edge<u32>], values: &[V]) -> Vec<Edge<u32>> {
    let mut keyed: Vec<KeyedEdge> = edges
        .iter()
        .map(|&edge| KeyedEdge {
            key: values[edge.a as usize].to_unsigned().into(),
            edge,
        })
        .collect();
    radix_sort_seq(&mut keyed, V::BITS);
    keyed.into_iter().map(|k| k.edge).collect()
}

/// Walks `sorted` (ascending by `a`'s value) from the end, merging each
/// edge's endpoints' disjoint sets and resolving `parents` along the way.
fn assemble_band(sorted: &[Edge<u32>], sets: &mut [RankSet<u32>], parents: &mut [u32]) {
    for edge in sorted.iter().rev() {
        if edge.a == edge.b {
            continue;
        }

        let set_a = compress_path(sets, edge.a);
        let set_b = compress_path(sets, edge.b);
        if set_a == set_b {
            continue;
        }

        let cc_root_a = sets[set_a as usize].load();
        let cc_root_b = sets[set_b as usize].load();

        let cc_root = if parents[cc_root_b as usize] != cc_root_b {
            // `cc_root_b`'s parent was already fixed by an earlier (higher-
            // valued) edge or by cross-band resolution; route through it.
            parents[cc_root_a as usize] = cc_root_b;
            cc_root_b
        } else {
            parents[cc_root_b as usize] = cc_root_a;
            cc_root_a
        };

        merge_sets(sets, set_a, set_b, cc_root);
    }
}

struct SendPtr<T>(*const T);
unsafe impl<T> Send for SendPtr<T> {}
struct SendMutPtr<T>(*mut T);
unsafe impl<T> Send for SendMutPtr<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;

    #[test]
    fn single_band_path_resolves_to_minimum_value_root() {
        // Path 0-1-2-3, values strictly decreasing so node 3 is the minimum
        // and should end up as everyone's parent root.
        let values: Vec<u32> = vec![4, 3, 2, 1];
        let edges = vec![
            Edge::canonical(0, 1, values[0] <= values[1]),
            Edge::canonical(1, 2, values[1] <= values[2]),
            Edge::canonical(2, 3, values[2] <= values[3]),
        ];
        let mut parents: Vec<u32> = (0..4).collect();
        let pool = ThreadPool::new(PoolConfig { n_threads: 2 });

        let mut by_band = vec![edges];
        union_by_rank(&pool, &mut by_band, &values, &mut parents);

        assert_eq!(parents[2], 3);
        assert_eq!(parents[1], 2);
        assert_eq!(parents[0], 1);
        assert_eq!(parents[3], 3);
    }

    #[test]
    fn bands_are_independent() {
        let values: Vec<u32> = vec![5, 1, 9, 2];
        let band0 = vec![Edge::canonical(0, 1, values[0] <= values[1])];
        let band1 = vec![Edge::canonical(2, 3, values[2] <= values[3])];
        let mut parents: Vec<u32> = (0..4).collect();
        let pool = ThreadPool::new(PoolConfig { n_threads: 2 });

        let mut by_band = vec![band0, band1];
        union_by_rank(&pool, &mut by_band, &values, &mut parents);

        assert_eq!(parents[0], 1);
        assert_eq!(parents[2], 3);
    }
}
