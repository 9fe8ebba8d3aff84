//! Iterative select/compact over fixed-size item blocks.
//!
//! Ported from the reference engine's `ItemBlocks`/`IterativeSelect2Compact1`:
//! items are grouped into fixed-length blocks, and blocks into coarser
//! thread-sized partitions. Each worker walks its partition's blocks through
//! a small stack-local buffer, classifying every item as kept (written back
//! to a compacted prefix), diverted (written to a compacted suffix sharing
//! the same buffer), or dropped. This is the shared substrate driving every
//! randomized contraction round in the engine: connected components
//! (`crate::cc`), graph partitioning (`crate::partition`), tree contraction
//! (`crate::tree_scan`) and reconstruction (`crate::reconstruct`) all narrow
//! an active-item frontier in place through `select`/`iterate`.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::pool::ThreadPool;

fn div_roundup(n: usize, d: usize) -> usize {
    (n + d - 1) / d
}

#[derive(Clone, Copy, Debug)]
struct ItemBlock {
    offset: usize,
    length: usize,
}

/// A contiguous item range split into fixed-size blocks, grouped into
/// thread-sized partitions of several blocks each.
pub struct ItemBlocks {
    n: usize,
    max_block_length: usize,
    blocks: Vec<ItemBlock>,
    partitions: Vec<usize>,
}

impl ItemBlocks {
    pub fn new(n: usize, max_block_length: usize) -> Self {
        let mut b = ItemBlocks {
            n,
            max_block_length,
            blocks: Vec::new(),
            partitions: vec![0],
        };
        b.determine_blocks();
        b
    }

    pub fn length(&self) -> usize {
        self.n
    }

    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn n_partitions(&self) -> usize {
        self.partitions.len().saturating_sub(1)
    }

    fn determine_blocks(&mut self) {
        let n_blocks = div_roundup(self.n, self.max_block_length);
        self.blocks = Vec::with_capacity(n_blocks);

        if n_blocks == 0 {
            self.partitions = vec![0];
            return;
        }

        let mut offset = 0;
        for _ in 0..n_blocks - 1 {
            self.blocks.push(ItemBlock {
                offset,
                length: self.max_block_length,
            });
            offset += self.max_block_length;
        }
        self.blocks.push(ItemBlock {
            offset,
            length: self.n - offset,
        });

        self.partitions = (0..=n_blocks).collect();
    }

    /// Rebuild single-block-per-partition bookkeeping after a prior
    /// `select`/iterate pass has shrunk (or emptied) some blocks.
    fn concat_blocks(&mut self) {
        if self.blocks.is_empty() {
            return;
        }

        self.n = 0;
        self.partitions = vec![0];
        let mut block_len = 0usize;
        let mut kept = Vec::with_capacity(self.blocks.len());

        for block in &self.blocks {
            if block.length == 0 {
                continue;
            }
            self.n += block.length;

            if block_len > 0 && block_len + block.length > self.max_block_length {
                self.partitions.push(kept.len());
                block_len = 0;
            }
            block_len += block.length;
            kept.push(*block);
        }

        self.blocks = kept;
        if self.n == 0 {
            self.partitions = vec![0];
            return;
        }
        self.partitions.push(self.blocks.len());
    }

    /// Call `f(item_index)` once for every active item, in parallel.
    pub fn apply(&self, pool: &ThreadPool, f: impl Fn(usize) + Send + Sync + 'static) {
        let n_partitions = self.n_partitions();
        if n_partitions == 0 {
            return;
        }
        let partitions = self.partitions.clone();
        let blocks = self.blocks.clone();

        pool.for_all_blocks(n_partitions, move |p, _t| {
            for b in partitions[p]..partitions[p + 1] {
                let block = blocks[b];
                for i in block.offset..block.offset + block.length {
                    f(i);
                }
            }
        });
    }

    /// In-place stable partition: `f(item_index, write_offset) -> bool`
    /// reports whether the item at `item_index` should be kept, moving it to
    /// `write_offset` itself if so. Shrinks the active set to the survivors.
    pub fn select(&mut self, pool: &ThreadPool, f: impl Fn(usize, usize) -> bool + Send + Sync + 'static) {
        let n_partitions = self.n_partitions();
        if n_partitions == 0 {
            return;
        }

        let partitions = self.partitions.clone();
        let blocks_snapshot = self.blocks.clone();
        let new_lengths: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));

        {
            let new_lengths = Arc::clone(&new_lengths);
            pool.for_all_blocks(n_partitions, move |p, _t| {
                let b_begin = partitions[p];
                let b_end = partitions[p + 1];
                let mut offset = blocks_snapshot[b_begin].offset;

                for b in b_begin..b_end {
                    let block = blocks_snapshot[b];
                    let mut begin = block.offset;
                    let end = begin + block.length;
                    while begin != end {
                        if f(begin, offset) {
                            offset += 1;
                        }
                        begin += 1;
                    }
                }

                let new_len = offset - blocks_snapshot[b_begin].offset;
                new_lengths.lock().push((b_begin, new_len));
            });
        }

        for block in &mut self.blocks {
            block.length = 0;
        }
        for (b_begin, new_len) in new_lengths.lock().iter() {
            self.blocks[*b_begin].length = *new_len;
        }

        self.concat_blocks();
    }
}

/// How [`IterativeSelect2Compact1::iterate`] disposes of an item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classify {
    /// Drop the item entirely.
    Remove,
    /// Keep it in the active array (compacted to the front of its block).
    Keep,
    /// Move it out to the side `compact` array.
    Divert,
}

/// Three-way select/compact: partitions `items` in place into a kept
/// prefix and diverts the rest into a side buffer (`compact`), repeatable
/// across rounds without reallocating the active array.
pub struct IterativeSelect2Compact1<Item> {
    item_blocks: ItemBlocks,
    max_block_length: usize,
    _marker: std::marker::PhantomData<Item>,
}

struct SendMutPtr<T>(*mut T);
unsafe impl<T> Send for SendMutPtr<T> {}
struct SendPtr<T>(*const T);
unsafe impl<T> Send for SendPtr<T> {}

impl<Item: Copy + Send + Sync + Default + 'static> IterativeSelect2Compact1<Item> {
    pub fn new(n: usize, max_block_length: usize) -> Self {
        IterativeSelect2Compact1 {
            item_blocks: ItemBlocks::new(n, max_block_length),
            max_block_length,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn length(&self) -> usize {
        self.item_blocks.length()
    }

    pub fn item_blocks(&self) -> &ItemBlocks {
        &self.item_blocks
    }

    /// Mutable access to the underlying blocks, needed for the initial
    /// 2-way `select` that seeds the active set before any `iterate` round
    /// (see `tree_scan::select_first`, `reconstruct::reconstruct_image`).
    pub fn item_blocks_mut(&mut self) -> &mut ItemBlocks {
        &mut self.item_blocks
    }

    /// One round: classify every active item with `f`, compact survivors
    /// to the front of `items`, and append diverted items to `compact`
    /// (which is cleared and resized to exactly the diverted count).
    /// Returns the number of diverted items.
    pub fn iterate(
        &mut self,
        pool: &ThreadPool,
        items: &mut [Item],
        compact: &mut Vec<Item>,
        f: impl Fn(Item) -> (Classify, Item) + Send + Sync + 'static,
    ) -> usize {
        let n_partitions = self.item_blocks.n_partitions();
        let n_blocks = self.item_blocks.blocks.len();
        if n_partitions == 0 {
            compact.clear();
            return 0;
        }

        let partitions = self.item_blocks.partitions.clone();
        let blocks_snapshot = self.item_blocks.blocks.clone();
        let items_ptr = SendMutPtr(items.as_mut_ptr());
        let n_items = items.len();
        let max_block_length = self.max_block_length;
        let f = Arc::new(f);

        let kept_lengths: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(vec![0usize; n_blocks]));
        let diverted_lengths: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(vec![0usize; n_blocks + 1]));

        {
            let kept_lengths = Arc::clone(&kept_lengths);
            let diverted_lengths = Arc::clone(&diverted_lengths);
            pool.for_all_blocks(n_partitions, move |p, _t| {
                let items = unsafe { std::slice::from_raw_parts_mut(items_ptr.0, n_items) };
                let b_begin = partitions[p];
                let b_end = partitions[p + 1];

                let mut buffer: Vec<Item> = vec![Item::default(); max_block_length];
                let mut front = 0usize;
                let mut back = max_block_length;

                for b in b_begin..b_end {
                    let block = blocks_snapshot[b];
                    for idx in block.offset..block.offset + block.length {
                        let (class, out) = f(items[idx]);
                        match class {
                            Classify::Keep => {
                                buffer[front] = out;
                                front += 1;
                            }
                            Classify::Divert => {
                                back -= 1;
                                buffer[back] = out;
                            }
                            Classify::Remove => {}
                        }
                    }
                }

                let len1 = front;
                let len2 = max_block_length - back;
                let dest_offset = blocks_snapshot[b_begin].offset;

                items[dest_offset..dest_offset + len1].copy_from_slice(&buffer[..len1]);
                for i in 0..len2 {
                    items[dest_offset + len1 + i] = buffer[max_block_length - 1 - i];
                }

                kept_lengths.lock()[b_begin] = len1;
                diverted_lengths.lock()[b_begin] = len2;
            });
        }

        let kept_lengths = kept_lengths.lock().clone();
        let mut diverted_lengths = diverted_lengths.lock().clone();

        let mut running = 0usize;
        for v in diverted_lengths.iter_mut() {
            let cur = *v;
            *v = running;
            running += cur;
        }
        let n_diverted = running;

        compact.clear();
        compact.resize(n_diverted, Item::default());

        {
            let items_ptr = SendPtr(items.as_ptr());
            let items_snapshot: &[Item] = unsafe { std::slice::from_raw_parts(items_ptr.0, n_items) };
            for b in 0..n_blocks {
                let length = diverted_lengths[b + 1] - diverted_lengths[b];
                if length == 0 {
                    continue;
                }
                let src_begin = blocks_snapshot[b].offset + kept_lengths[b];
                let dst_begin = diverted_lengths[b];
                compact[dst_begin..dst_begin + length].copy_from_slice(&items_snapshot[src_begin..src_begin + length]);
            }
        }

        for (b, block) in self.item_blocks.blocks.iter_mut().enumerate() {
            block.length = kept_lengths[b];
        }
        self.item_blocks.concat_blocks();

        n_diverted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;

    #[test]
    fn select_keeps_only_matching_items_in_order() {
        let pool = ThreadPool::new(PoolConfig { n_threads: 4 });
        let mut items: Vec<u32> = (0..10_000).collect();
        let mut blocks = ItemBlocks::new(items.len(), 777);

        let items_ptr = SendMutPtr(items.as_mut_ptr());
        blocks.select(&pool, move |read, write| {
            let items = unsafe { std::slice::from_raw_parts_mut(items_ptr.0, 10_000) };
            let keep = items[read] % 3 == 0;
            if keep {
                items[write] = items[read];
            }
            keep
        });

        assert_eq!(blocks.length(), (0..10_000u32).filter(|v| v % 3 == 0).count());
        let survivors = &items[..blocks.length()];
        for w in survivors.windows(2) {
            assert!(w[0] < w[1]);
        }
        assert!(survivors.iter().all(|v| v % 3 == 0));
    }

    #[test]
    fn iterate_splits_three_ways() {
        let pool = ThreadPool::new(PoolConfig { n_threads: 4 });
        let n = 5_000usize;
        let mut items: Vec<u32> = (0..n as u32).collect();
        let mut select = IterativeSelect2Compact1::<u32>::new(n, 512);
        let mut compact: Vec<u32> = Vec::new();

        let n_diverted = select.iterate(&pool, &mut items, &mut compact, |v| {
            if v % 5 == 0 {
                (Classify::Remove, v)
            } else if v % 3 == 0 {
                (Classify::Divert, v)
            } else {
                (Classify::Keep, v)
            }
        });

        assert_eq!(n_diverted, compact.len());
        let expected_kept = (0..n as u32).filter(|v| v % 5 != 0 && v % 3 != 0).count();
        assert_eq!(select.length(), expected_kept);

        let kept: std::collections::HashSet<u32> = items[..select.length()].iter().copied().collect();
        let diverted: std::collections::HashSet<u32> = compact.iter().copied().collect();

        for v in 0..n as u32 {
            if v % 5 == 0 {
                assert!(!kept.contains(&v) && !diverted.contains(&v));
            } else if v % 3 == 0 {
                assert!(diverted.contains(&v));
            } else {
                assert!(kept.contains(&v));
            }
        }
    }
}
