//! Rank-balanced disjoint sets with an embedded connected-component root.
//!
//! Ported directly from the reference engine's `RankSet`/`compress_path`/
//! `merge_sets`. Each record holds a pixel index (`data`) plus a packed
//! `(rank: 7 bits, is_set_root: 1 bit)` byte, used only during the final
//! union-by-rank assembly pass (§4.11 / §5.11).

use maxtree_core::Idx;

#[derive(Clone, Copy, Debug)]
pub struct RankSet<I> {
    data: I,
    rank_and_root: u8,
}

const IS_SET_ROOT_BIT: u8 = 0b1000_0000;
const RANK_MASK: u8 = 0b0111_1111;

impl<I: Idx> RankSet<I> {
    pub fn reset(&mut self, k: I) {
        self.data = k;
        self.rank_and_root = IS_SET_ROOT_BIT;
    }

    #[inline]
    pub fn is_set_root(&self) -> bool {
        self.rank_and_root & IS_SET_ROOT_BIT != 0
    }

    #[inline]
    pub fn rank(&self) -> u8 {
        self.rank_and_root & RANK_MASK
    }

    #[inline]
    pub fn load(&self) -> I {
        self.data
    }

    #[inline]
    fn store(&mut self, k: I) {
        self.data = k;
    }
}

impl<I: Idx> Default for RankSet<I> {
    fn default() -> Self {
        RankSet {
            data: I::zero(),
            rank_and_root: IS_SET_ROOT_BIT,
        }
    }
}

/// Find the set root of `i`, fully path-compressing along the way.
pub fn compress_path<I: Idx>(sets: &mut [RankSet<I>], i: I) -> I {
    if sets[i.index()].is_set_root() {
        return i;
    }

    let mut root = sets[i.index()].load();
    while !sets[root.index()].is_set_root() {
        root = sets[root.index()].load();
    }

    let mut cur = i;
    while !sets[sets[cur.index()].load().index()].is_set_root() {
        let next = sets[cur.index()].load();
        sets[cur.index()].store(root);
        cur = next;
    }

    root
}

/// Union two distinct set roots by rank, setting the winner's connected-
/// component root to `cc_root`.
pub fn merge_sets<I: Idx>(sets: &mut [RankSet<I>], set_a: I, set_b: I, cc_root: I) {
    let rank_a = sets[set_a.index()].rank();
    let rank_b = sets[set_b.index()].rank();

    if rank_b > rank_a {
        sets[set_a.index()].store(set_b);
        sets[set_a.index()].rank_and_root &= !IS_SET_ROOT_BIT;
        sets[set_b.index()].store(cc_root);
        return;
    }

    sets[set_b.index()].store(set_a);
    sets[set_b.index()].rank_and_root &= !IS_SET_ROOT_BIT;
    sets[set_a.index()].store(cc_root);

    if rank_b < rank_a {
        return;
    }

    sets[set_a.index()].rank_and_root += 1;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(n: usize) -> Vec<RankSet<u32>> {
        (0..n)
            .map(|i| {
                let mut s = RankSet::default();
                s.reset(u32::new(i));
                s
            })
            .collect()
    }

    #[test]
    fn find_is_idempotent_after_merges() {
        let mut sets = fresh(8);
        merge_sets(&mut sets, 0u32, 1u32, 0u32);
        merge_sets(&mut sets, 2u32, 3u32, 2u32);
        merge_sets(
            &mut sets,
            compress_path(&mut sets, 0u32),
            compress_path(&mut sets, 2u32),
            0u32,
        );

        let root = compress_path(&mut sets, 3u32);
        assert_eq!(compress_path(&mut sets, root), root);
        assert_eq!(compress_path(&mut sets, 1u32), root);
    }

    #[test]
    fn rank_is_bounded_by_log2_plus_one() {
        let n = 64;
        let mut sets = fresh(n);
        let mut roots: Vec<u32> = (0..n as u32).collect();

        while roots.len() > 1 {
            let mut next = Vec::new();
            for pair in roots.chunks(2) {
                if pair.len() == 2 {
                    let a = compress_path(&mut sets, pair[0]);
                    let b = compress_path(&mut sets, pair[1]);
                    merge_sets(&mut sets, a, b, a.min(b));
                    next.push(a.min(b));
                } else {
                    next.push(pair[0]);
                }
            }
            roots = next;
        }

        let max_rank = sets.iter().map(|s| s.rank()).max().unwrap();
        assert!((max_rank as u32) <= (n as f64).log2().ceil() as u32 + 1);
    }
}
