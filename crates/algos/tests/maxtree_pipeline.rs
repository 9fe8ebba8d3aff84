//! End-to-end tests: build a max-tree, scan a subtree-area attribute over
//! it, reconstruct an area-opened image, and compare against the
//! sequential reference maxtree.

use maxtree_algos::pool::{PoolConfig, ThreadPool};
use maxtree_algos::{maxtree, reconstruct_image, tree_scan};
use maxtree_image::{Connectivity, DefaultBlockShape, Image};

fn checkerboard(width: usize, height: usize) -> Vec<u8> {
    (0..width * height)
        .map(|i| {
            let (x, y) = (i % width, i / width);
            if (x / 4 + y / 4) % 2 == 0 {
                200
            } else {
                50
            }
        })
        .collect()
}

#[test]
fn area_opening_removes_components_smaller_than_lambda() {
    let (width, height) = (16, 16);
    let values = checkerboard(width, height);
    let image = Image::<u8, 2>::new(&values, [width, height], Connectivity::Face).unwrap();

    let pool = ThreadPool::new(PoolConfig { n_threads: 4 });
    let n = values.len();
    let mut parents = vec![0u32; n];
    maxtree(&pool, &image, &mut parents);

    let area = tree_scan::<u32, _, _>(&pool, &parents, |_| 1u32, |a, b| a + b);

    // Every 4x4 block is its own flat zone of 16 pixels; requiring area
    // >= 17 discards every leaf component, collapsing the image toward its
    // single root value.
    let mut filtered = vec![0u8; n];
    reconstruct_image(&pool, &values, &parents, |i| area[i] >= 17, &mut filtered);

    let root_value = {
        let mut cur = 0usize;
        loop {
            let p = parents[cur] as usize;
            if p == cur {
                break values[cur];
            }
            cur = p;
        }
    };
    assert!(filtered.iter().all(|&v| v == root_value));
}

#[test]
fn tree_scan_area_sums_to_image_size_at_every_root() {
    let (width, height) = (32, 9);
    let values: Vec<u8> = (0..width * height).map(|i| ((i * 31 + 11) % 200) as u8).collect();
    let image = Image::<u8, 2>::new(&values, [width, height], Connectivity::FaceAndDiagonal).unwrap();

    let pool = ThreadPool::new(PoolConfig { n_threads: 3 });
    let n = values.len();
    let mut parents = vec![0u32; n];
    maxtree(&pool, &image, &mut parents);

    let area = tree_scan::<u32, _, _>(&pool, &parents, |_| 1u32, |a, b| a + b);

    let total_at_roots: u32 = (0..n).filter(|&i| parents[i] as usize == i).map(|i| area[i]).sum();
    assert_eq!(total_at_roots as usize, n);
}
