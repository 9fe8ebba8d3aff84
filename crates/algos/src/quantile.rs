//! Quantile estimation over the boundary graph's edge values.
//!
//! Before the graph can be partitioned by value band, the engine needs
//! `n_partitions - 1` cut values that roughly bisect the edge values into
//! equal-sized groups. Sorting every edge exactly would work but is wasteful
//! once the graph is large relative to the partition count, so (mirroring
//! the reference engine's `EstimateQuantiles`) a random sample of edges is
//! sorted instead whenever the sample would be much smaller than the edge
//! count; small graphs are sorted exactly.

use nanorand::{Rng, WyRand};

use maxtree_core::Value;
use maxtree_image::Graph;

use crate::pool::ThreadPool;
use crate::radix_sort::{radix_sort_parallel, RadixItem};

/// Samples per squared partition count; matches the reference estimator's
/// `n_samples_factor`.
const N_SAMPLES_FACTOR: usize = 384;

/// A value/index pair marking where one of the `n_partitions` value bands
/// begins.
#[derive(Clone, Copy)]
pub struct Quantile<V> {
    pub value: V,
    pub index: u32,
}

impl<V: Value> Quantile<V> {
    fn less_than_or_equal(&self, v: V, i: u32) -> bool {
        self.value < v || (self.value == v && self.index <= i)
    }

    /// Binary search for the highest partition whose quantile is `<= (v, i)`
    /// in `(value, index)` order, i.e. the band `(v, i)` belongs to.
    pub fn determine_partition(v: V, i: u32, quantiles: &[Quantile<V>]) -> usize {
        let mut min = 0usize;
        let mut max = quantiles.len();

        while min + 1 < max {
            let mid = min + (max - min) / 2;
            if quantiles[mid].less_than_or_equal(v, i) {
                min = mid;
            } else {
                max = mid;
            }
        }

        min
    }
}

#[derive(Clone, Copy)]
struct SamplePair {
    uvalue: u64,
    index: u32,
}

impl RadixItem for SamplePair {
    fn unsigned_value(&self) -> u64 {
        self.uvalue
    }
}

/// Estimate `n_partitions` quantiles (the first always `(V::MIN, 0)`) over
/// `graph`'s edge source-endpoint values.
pub fn estimate_quantiles<V: Value>(
    pool: &ThreadPool,
    graph: &Graph<u32>,
    values: &[V],
    n_partitions: usize,
) -> Vec<Quantile<V>> {
    let n_edges = graph.n_edges();
    assert!(n_edges > 0, "estimate_quantiles requires at least one edge");

    let total_sample_n_approx = N_SAMPLES_FACTOR * n_partitions * n_partitions;

    let mut sorted = if total_sample_n_approx >= n_edges / 2 {
        log::debug!("quantile estimation: sorting all {n_edges} edges");
        sort_all_edges(pool, graph, values)
    } else {
        create_sorted_sample(pool, graph, values, total_sample_n_approx, n_edges)
    };

    let mut scratch = sorted.clone();
    let final_in_items = radix_sort_parallel(pool, &mut sorted, &mut scratch, V::BITS);
    let sorted = if final_in_items { sorted } else { scratch };

    determine_quantiles(&sorted, values, n_partitions)
}

fn subgraph_offsets(graph: &Graph<u32>) -> Vec<usize> {
    let n_subgraphs = graph.n_subgraphs();
    let mut offsets = vec![0usize; n_subgraphs + 1];
    for s in 0..n_subgraphs {
        offsets[s + 1] = offsets[s] + graph.edge_count(s);
    }
    offsets
}

fn sort_all_edges<V: Value>(pool: &ThreadPool, graph: &Graph<u32>, values: &[V]) -> Vec<SamplePair> {
    let offsets = subgraph_offsets(graph);
    let n = *offsets.last().unwrap();
    let n_subgraphs = graph.n_subgraphs();

    let mut out = vec![SamplePair { uvalue: 0, index: 0 }; n];
    let out_ptr = SendMutPtr(out.as_mut_ptr());
    let graph_ptr = SendPtr(graph as *const Graph<u32>);
    let values_ptr = SendPtr(values.as_ptr());
    let n_values = values.len();

    pool.for_all_blocks(n_subgraphs, move |subgraph_nr, _t| {
        let graph = unsafe { &*graph_ptr.0 };
        let values = unsafe { std::slice::from_raw_parts(values_ptr.0, n_values) };
        let edges = graph.subgraph(subgraph_nr);
        let out = unsafe { std::slice::from_raw_parts_mut(out_ptr.0, n) };
        let dst = &mut out[offsets[subgraph_nr]..offsets[subgraph_nr + 1]];

        for (i, edge) in edges.iter().enumerate() {
            dst[i] = SamplePair {
                uvalue: values[edge.a as usize].to_unsigned().into(),
                index: edge.a,
            };
        }
    });

    out
}

fn create_sorted_sample<V: Value>(
    pool: &ThreadPool,
    graph: &Graph<u32>,
    values: &[V],
    total_sample_n_approx: usize,
    n_edges: usize,
) -> Vec<SamplePair> {
    let offsets = subgraph_offsets(graph);
    let n_subgraphs = graph.n_subgraphs();

    // Per-subgraph sample size, proportional to its edge share, with one
    // extra sample distributed randomly to absorb the rounding remainder
    // (matches the reference estimator's remainder lottery).
    let mut rng = WyRand::new();
    let mut n_selected = vec![0usize; n_subgraphs];
    let mut sample_n = 0usize;
    let mut sample_offsets = vec![0usize; n_subgraphs + 1];

    for s in 0..n_subgraphs {
        let n_edges_in_subgraph = offsets[s + 1] - offsets[s];
        let product = n_edges_in_subgraph * total_sample_n_approx;
        let mut selected = product / n_edges;
        let remainder = product % n_edges;
        if remainder > 0 && rng.generate_range(0usize..n_edges) < remainder {
            selected += 1;
        }
        n_selected[s] = selected;
        sample_offsets[s] = sample_n;
        sample_n += selected;
    }
    sample_offsets[n_subgraphs] = sample_n;

    let mut out = vec![SamplePair { uvalue: 0, index: 0 }; sample_n];
    let out_ptr = SendMutPtr(out.as_mut_ptr());
    let graph_ptr = SendPtr(graph as *const Graph<u32>);
    let values_ptr = SendPtr(values.as_ptr());
    let n_values = values.len();

    pool.for_all_blocks(n_subgraphs, move |subgraph_nr, _t| {
        let graph = unsafe { &*graph_ptr.0 };
        let values = unsafe { std::slice::from_raw_parts(values_ptr.0, n_values) };
        let edges = graph.subgraph(subgraph_nr);
        if edges.is_empty() {
            return;
        }
        let out = unsafe { std::slice::from_raw_parts_mut(out_ptr.0, sample_n) };
        let dst = &mut out[sample_offsets[subgraph_nr]..sample_offsets[subgraph_nr + 1]];

        let mut local_rng = WyRand::new_seed(subgraph_nr as u64 ^ 0x9E37_79B9_7F4A_7C15);
        for slot in dst.iter_mut() {
            let pick = local_rng.generate_range(0usize..edges.len());
            let edge = edges[pick];
            *slot = SamplePair {
                uvalue: values[edge.a as usize].to_unsigned().into(),
                index: edge.a,
            };
        }
    });

    out
}

/// Picks the `n_partitions - 1` cut points from the sorted sample, each
/// reported as `(value, index)` by looking the pixel value back up from
/// `values` — simpler than inverting `Value::to_unsigned`'s bit mapping, and
/// exact rather than reconstructed from a lossy key.
fn determine_quantiles<V: Value>(sorted: &[SamplePair], values: &[V], n_partitions: usize) -> Vec<Quantile<V>> {
    let sample_n = sorted.len();
    let mut quantiles = Vec::with_capacity(n_partitions);
    quantiles.push(Quantile {
        value: V::MIN,
        index: 0,
    });

    for i in 1..n_partitions {
        let offset = i * sample_n / n_partitions;
        let pair = sorted[offset];
        quantiles.push(Quantile {
            value: values[pair.index as usize],
            index: pair.index,
        });
    }

    quantiles
}

struct SendPtr<T>(*const T);
unsafe impl<T> Send for SendPtr<T> {}
struct SendMutPtr<T>(*mut T);
unsafe impl<T> Send for SendMutPtr<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use maxtree_image::Edge;

    #[test]
    fn determine_partition_finds_containing_band() {
        let quantiles: Vec<Quantile<u32>> = vec![
            Quantile { value: 0, index: 0 },
            Quantile { value: 10, index: 0 },
            Quantile { value: 20, index: 0 },
        ];

        assert_eq!(Quantile::determine_partition(5u32, 0, &quantiles), 0);
        assert_eq!(Quantile::determine_partition(10u32, 0, &quantiles), 1);
        assert_eq!(Quantile::determine_partition(25u32, 0, &quantiles), 2);
    }

    #[test]
    fn estimate_quantiles_on_small_graph_sorts_exactly() {
        let values: Vec<u32> = (0..100).collect();
        let mut graph = Graph::<u32>::new_uniform(1, 99);
        let edges = graph.subgraph_capacity_mut(0);
        for i in 0..99usize {
            edges[i] = Edge { a: i as u32, b: (i + 1) as u32 };
        }
        graph.set_local_edge_count(0, 99);
        graph.set_global_edge_count(0, 0);

        let pool = ThreadPool::new(PoolConfig { n_threads: 2 });
        let quantiles = estimate_quantiles(&pool, &graph, &values, 4);

        assert_eq!(quantiles.len(), 4);
        assert_eq!(quantiles[0].value, u32::MIN);
        // The bands should be non-decreasing in value.
        for w in quantiles.windows(2) {
            assert!(w[0].value <= w[1].value);
        }
    }
}
