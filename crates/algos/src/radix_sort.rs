//! LSB-first parallel radix sort, radix 256, with a single-threaded variant
//! for small per-block sorts and the sequential reference implementations.
//!
//! Ported from the reference engine's `RadixSortParallel`: per digit, a
//! histogram pass, a block-exclusive-sum offset pass, and a scatter pass,
//! each a `for_all_blocks` dispatch; two scratch buffers ping-pong between
//! digits; stability preserved across digits.

use crate::pool::ThreadPool;

const RADIX_BITS: u32 = 8;
const RADIX: usize = 1 << RADIX_BITS;
const RADIX_MASK: u64 = (RADIX as u64) - 1;
const ITEMS_PER_BLOCK: usize = 16 * 1024;

/// A sortable item: exposes the unsigned key radix_sort sorts on.
pub trait RadixItem: Copy + Send + Sync {
    fn unsigned_value(&self) -> u64;
}

fn digit_of(value: u64, shift: u32) -> usize {
    ((value >> shift) & RADIX_MASK) as usize
}

/// Number of 8-bit digits needed to cover `n_bits` bits.
pub fn n_digits(n_bits: u32) -> u32 {
    (n_bits + RADIX_BITS - 1) / RADIX_BITS
}

/// Sort `items` (length `n`) by ascending `unsigned_value()`, using `scratch`
/// as a same-length auxiliary buffer. Returns which of `items`/`scratch`
/// holds the final sorted sequence.
pub fn radix_sort_parallel<T: RadixItem>(
    pool: &ThreadPool,
    items: &mut [T],
    scratch: &mut [T],
    key_bits: u32,
) -> bool {
    let n = items.len();
    if n <= 1 {
        return true;
    }
    debug_assert_eq!(items.len(), scratch.len());

    let digits = n_digits(key_bits);
    let mut in_items = true; // true => current data is in `items`

    for d in 0..digits {
        let shift = d * RADIX_BITS;
        if in_items {
            sort_digit_parallel(pool, items, scratch, shift);
        } else {
            sort_digit_parallel(pool, scratch, items, shift);
        }
        in_items = !in_items;
    }

    in_items
}

fn sort_digit_parallel<T: RadixItem>(pool: &ThreadPool, src: &mut [T], dst: &mut [T], shift: u32) {
    let n = src.len();
    let n_blocks = (n + ITEMS_PER_BLOCK - 1) / ITEMS_PER_BLOCK;

    let mut histograms = vec![[0usize; RADIX]; n_blocks];

    {
        let src_ptr = SendPtr(src.as_ptr());
        let histo_ptr = SendMutPtr(histograms.as_mut_ptr());
        pool.for_all_blocks(n_blocks, move |b, _t| {
            let src = unsafe { std::slice::from_raw_parts(src_ptr.0, n) };
            let histo = unsafe { &mut *histo_ptr.0.add(b) };
            let begin = b * ITEMS_PER_BLOCK;
            let end = (begin + ITEMS_PER_BLOCK).min(n);
            for item in &src[begin..end] {
                histo[digit_of(item.unsigned_value(), shift)] += 1;
            }
        });
    }

    // Serial prefix over blocks (per §4.2 phase 2): convert block histograms
    // into global scatter offsets.
    let mut sums = [0usize; RADIX + 1];
    for histo in &mut histograms {
        for bin in 0..RADIX {
            let tmp = histo[bin];
            histo[bin] = sums[bin];
            sums[bin] += tmp;
        }
    }
    let mut running = 0usize;
    for bin in 0..RADIX {
        let count = sums[bin];
        sums[bin] = running;
        running += count;
    }
    for histo in &mut histograms {
        for bin in 0..RADIX {
            histo[bin] += sums[bin];
        }
    }

    {
        let src_ptr = SendPtr(src.as_ptr());
        let dst_ptr = SendMutPtr(dst.as_mut_ptr());
        let histo_ptr = SendMutPtr(histograms.as_mut_ptr());
        pool.for_all_blocks(n_blocks, move |b, _t| {
            let src = unsafe { std::slice::from_raw_parts(src_ptr.0, n) };
            let dst = unsafe { std::slice::from_raw_parts_mut(dst_ptr.0, n) };
            let histo = unsafe { &mut *histo_ptr.0.add(b) };
            let begin = b * ITEMS_PER_BLOCK;
            let end = (begin + ITEMS_PER_BLOCK).min(n);
            for &item in &src[begin..end] {
                let bin = digit_of(item.unsigned_value(), shift);
                dst[histo[bin]] = item;
                histo[bin] += 1;
            }
        });
    }
}

/// Single-threaded radix sort, used for small per-block sorts and as an
/// oracle for the parallel version.
pub fn radix_sort_seq<T: RadixItem>(items: &mut Vec<T>, key_bits: u32) {
    let n = items.len();
    if n <= 1 {
        return;
    }

    let digits = n_digits(key_bits);
    let mut scratch = items.clone();
    let mut src_is_items = true;

    for d in 0..digits {
        let shift = d * RADIX_BITS;
        let (src, dst): (&mut Vec<T>, &mut Vec<T>) = if src_is_items {
            (items, &mut scratch)
        } else {
            (&mut scratch, items)
        };

        let mut counts = [0usize; RADIX + 1];
        for item in src.iter() {
            counts[digit_of(item.unsigned_value(), shift) + 1] += 1;
        }
        for bin in 0..RADIX {
            counts[bin + 1] += counts[bin];
        }
        for &item in src.iter() {
            let bin = digit_of(item.unsigned_value(), shift);
            dst[counts[bin]] = item;
            counts[bin] += 1;
        }

        src_is_items = !src_is_items;
    }

    if !src_is_items {
        *items = scratch;
    }
}

// Thread-pool closures need `Send`-able raw pointers into caller-owned
// slices; the pool's phase boundaries guarantee no data race (each block
// owns a disjoint index range), so this wrapper is a bookkeeping device, not
// a safety loophole.
#[derive(Clone, Copy)]
struct SendPtr<T>(*const T);
unsafe impl<T> Send for SendPtr<T> {}

#[derive(Clone, Copy)]
struct SendMutPtr<T>(*mut T);
unsafe impl<T> Send for SendMutPtr<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct Item(u32);

    impl RadixItem for Item {
        fn unsigned_value(&self) -> u64 {
            self.0 as u64
        }
    }

    #[test]
    fn seq_sort_is_permutation_and_sorted() {
        let mut rng = nanorand::WyRand::new_seed(7);
        use nanorand::Rng;
        let mut items: Vec<Item> = (0..5000).map(|_| Item(rng.generate::<u32>())).collect();
        let original = items.clone();

        radix_sort_seq(&mut items, 32);

        for w in items.windows(2) {
            assert!(w[0].0 <= w[1].0);
        }

        let mut sorted_original = original;
        sorted_original.sort_by_key(|i| i.0);
        assert_eq!(items, sorted_original);
    }

    #[test]
    fn parallel_sort_matches_seq_oracle() {
        let mut rng = nanorand::WyRand::new_seed(11);
        use nanorand::Rng;
        let items: Vec<Item> = (0..20_000).map(|_| Item(rng.generate::<u32>())).collect();

        let mut seq = items.clone();
        radix_sort_seq(&mut seq, 32);

        let pool = ThreadPool::new(PoolConfig { n_threads: 4 });
        let mut par = items.clone();
        let mut scratch = items.clone();
        let final_in_items = radix_sort_parallel(&pool, &mut par, &mut scratch, 32);

        let result = if final_in_items { par } else { scratch };
        assert_eq!(result, seq);
    }
}
