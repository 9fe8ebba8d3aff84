//! Parallel max-tree construction, tree scan and reconstruction engine.
//!
//! Four public entry points cover the whole pipeline: [`maxtree::maxtree`]
//! builds the tree, [`tree_scan::tree_scan`] folds a semigroup attribute
//! bottom-up over it, [`euler_tour_scan::euler_tour_scan`] does the same for
//! a group-valued attribute via the tree's Euler tour instead of direct
//! contraction, and [`reconstruct::reconstruct_image`] applies a direct-rule
//! filter back onto the pixel grid. Everything else in this crate is
//! plumbing the four share: the thread pool, radix sort, disjoint-set and
//! priority-queue primitives, and the per-stage algorithms (block
//! construction, quantile estimation, graph partitioning, union-by-rank).

pub mod block_tree;
pub mod cc;
#[cfg(feature = "dump")]
pub mod dump;
pub mod euler_tour_scan;
pub mod hash;
pub mod maxtree;
pub mod partition;
pub mod pool;
pub mod quantile;
pub mod radix_sort;
pub mod rank_set;
pub mod reconstruct;
pub mod select;
pub mod tree_scan;
pub mod trie_queue;
pub mod union_by_rank;

#[cfg(any(test, feature = "sequential-reference"))]
pub mod sequential;

pub use euler_tour_scan::euler_tour_scan;
pub use maxtree::maxtree;
pub use pool::{PoolConfig, ThreadPool};
pub use reconstruct::reconstruct_image;
pub use tree_scan::tree_scan;
