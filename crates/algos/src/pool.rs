//! Fixed-pool work-stealing thread scheduler.
//!
//! Ported from the reference engine's `ThreadPool`: `T` worker threads are
//! created once and parked on a condition variable between dispatches. Each
//! dispatch ("parallel") partitions `n_blocks` indices into contiguous
//! per-worker ranges; an idle worker steals half of a victim's remaining
//! range via CAS. `for_all_blocks`/`for_all` are synchronous — the calling
//! thread participates as worker 0 and blocks until every worker has
//! reported ready again.
//!
//! CPU pinning is dropped: Rust's standard thread API has no portable
//! affinity call, and the reference engine's own affinity assignment is
//! Linux-specific pthread plumbing with no bearing on the scheduling
//! algorithm itself (noted in DESIGN.md).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use atomic::Atomic;
use parking_lot::{Condvar, Mutex};

pub const DEFAULT_MAX_THREADS: usize = 256;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Span {
    begin: u32,
    end: u32,
}

type DynJob = dyn Fn(usize) + Send + Sync;

struct Shared {
    n_threads: usize,
    ranges: Vec<Atomic<Span>>,
    job: Mutex<Option<Arc<DynJob>>>,
    generation: Mutex<u64>,
    cond_go: Condvar,
    cond_done: Condvar,
    n_ready: AtomicUsize,
    terminating: AtomicBool,
}

/// Configuration for a [`ThreadPool`]: number of workers, default
/// `min(num_cpus::get(), 256)`, matching the engine's environment defaults.
#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
    pub n_threads: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            n_threads: num_cpus::get().clamp(1, DEFAULT_MAX_THREADS),
        }
    }
}

pub struct ThreadPool {
    shared: Arc<Shared>,
    handles: Vec<std::thread::JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(config: PoolConfig) -> Self {
        let n_threads = config.n_threads.max(1);
        log::debug!("thread pool starting with {n_threads} workers");

        let shared = Arc::new(Shared {
            n_threads,
            ranges: (0..n_threads).map(|_| Atomic::new(Span::default())).collect(),
            job: Mutex::new(None),
            generation: Mutex::new(0),
            cond_go: Condvar::new(),
            cond_done: Condvar::new(),
            n_ready: AtomicUsize::new(0),
            terminating: AtomicBool::new(false),
        });

        let mut handles = Vec::with_capacity(n_threads.saturating_sub(1));

        for thread_nr in 1..n_threads {
            let shared = Arc::clone(&shared);
            handles.push(std::thread::spawn(move || worker_loop(shared, thread_nr)));
        }

        ThreadPool { shared, handles }
    }

    pub fn max_threads(&self) -> usize {
        self.shared.n_threads
    }

    /// Run `f(thread_nr)` once on every worker (including the calling
    /// thread as worker 0), blocking until all have finished.
    pub fn parallel(&self, f: impl Fn(usize) + Send + Sync + 'static) {
        let job: Arc<DynJob> = Arc::new(f);

        {
            let mut slot = self.shared.job.lock();
            *slot = Some(Arc::clone(&job));
        }

        {
            let mut generation = self.shared.generation.lock();
            *generation += 1;
            self.shared.n_ready.store(0, Ordering::SeqCst);
            self.shared.cond_go.notify_all();
        }

        job(0);

        let target = self.shared.n_threads - 1;
        let mut ready = self.shared.n_ready.load(Ordering::Acquire);
        if ready != target {
            let mut guard = self.shared.generation.lock();
            while self.shared.n_ready.load(Ordering::Acquire) != target {
                self.shared.cond_done.wait(&mut guard);
            }
            ready = target;
        }
        debug_assert_eq!(ready, target);
    }

    /// Run `f(block_nr, thread_nr)` exactly once per block in `[0, n_blocks)`.
    pub fn for_all_blocks(&self, n_blocks: usize, f: impl Fn(usize, usize) + Send + Sync + 'static) {
        if n_blocks == 0 {
            return;
        }

        if n_blocks == 1 || self.shared.n_threads == 1 {
            for b in 0..n_blocks {
                f(b, 0);
            }
            return;
        }

        let n_threads = self.shared.n_threads.min(n_blocks);
        let per_thread = n_blocks / n_threads;
        let remainder = n_blocks % n_threads;
        let mut begin = 0u32;

        for t in 0..self.shared.n_threads {
            let span = if t < n_threads {
                let len = per_thread + usize::from(t < remainder);
                let span = Span {
                    begin,
                    end: begin + len as u32,
                };
                begin += len as u32;
                span
            } else {
                Span { begin: 0, end: 0 }
            };
            self.shared.ranges[t].store(span, Ordering::Relaxed);
        }

        let shared = Arc::clone(&self.shared);
        let n_threads_active = n_threads;
        self.parallel(move |thread_nr| {
            if thread_nr >= n_threads_active {
                return;
            }
            loop {
                match find_work(&shared, thread_nr, n_threads_active) {
                    Some(block_nr) => f(block_nr, thread_nr),
                    None => break,
                }
            }
        });
    }

    /// Run `f(i, thread_nr)` for `i` in `[0, n)`, grouped into blocks of
    /// `items_per_block` consecutive indices (sequential within a block).
    pub fn for_all(&self, n: usize, items_per_block: usize, f: impl Fn(usize, usize) + Send + Sync + 'static) {
        if n == 0 {
            return;
        }

        let n_blocks = (n + items_per_block - 1) / items_per_block;
        let f = Arc::new(f);

        self.for_all_blocks(n_blocks, move |block_nr, thread_nr| {
            let begin = block_nr * items_per_block;
            let end = (begin + items_per_block).min(n);
            for i in begin..end {
                f(i, thread_nr);
            }
        });
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.terminating.store(true, Ordering::SeqCst);
        {
            let mut generation = self.shared.generation.lock();
            *generation += 1;
            self.shared.cond_go.notify_all();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>, thread_nr: usize) {
    let mut seen_generation = 0u64;

    loop {
        {
            let mut guard = shared.generation.lock();
            while *guard == seen_generation {
                if shared.terminating.load(Ordering::SeqCst) {
                    return;
                }
                shared.cond_go.wait(&mut guard);
            }
            seen_generation = *guard;
        }

        if shared.terminating.load(Ordering::SeqCst) {
            return;
        }

        let job = { shared.job.lock().clone() };
        if let Some(job) = job {
            job(thread_nr);
        }

        if shared.n_ready.fetch_add(1, Ordering::AcqRel) + 1 == shared.n_threads - 1 {
            let _guard = shared.generation.lock();
            shared.cond_done.notify_all();
        }
    }
}

/// Pop a block index from this worker's range, or steal half of a peer's
/// remaining range. Returns `None` once the whole dispatch is exhausted.
fn find_work(shared: &Shared, thread_nr: usize, n_threads: usize) -> Option<usize> {
    let mine = &shared.ranges[thread_nr];
    let mut current = mine.load(Ordering::Relaxed);

    loop {
        if current.begin < current.end {
            let desired = Span {
                begin: current.begin + 1,
                end: current.end,
            };
            match mine.compare_exchange_weak(current, desired, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return Some(current.begin as usize),
                Err(observed) => {
                    current = observed;
                    continue;
                }
            }
        }

        let mut k = (thread_nr + 1) % n_threads;
        let mut probed = 0;

        while probed < n_threads - 1 {
            if k == thread_nr {
                k = (k + 1) % n_threads;
                continue;
            }

            let victim = &shared.ranges[k];
            let mut victim_range = victim.load(Ordering::Relaxed);

            loop {
                let length = victim_range.end.saturating_sub(victim_range.begin);
                if length == 0 {
                    break;
                }

                let half = (length + 1) / 2;
                let desired = Span {
                    begin: victim_range.begin,
                    end: victim_range.end - half,
                };

                match victim.compare_exchange_weak(victim_range, desired, Ordering::Relaxed, Ordering::Relaxed) {
                    Ok(_) => {
                        let stolen_begin = desired.end;
                        let new_range = Span {
                            begin: stolen_begin + 1,
                            end: victim_range.end,
                        };
                        mine.store(new_range, Ordering::Relaxed);
                        return Some(stolen_begin as usize);
                    }
                    Err(observed) => {
                        victim_range = observed;
                        continue;
                    }
                }
            }

            probed += 1;
            k = (k + 1) % n_threads;
        }

        return None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    #[test]
    fn for_all_blocks_visits_every_block_once() {
        let pool = ThreadPool::new(PoolConfig { n_threads: 4 });
        let n_blocks = 1000;
        let seen: Arc<Vec<StdAtomicUsize>> =
            Arc::new((0..n_blocks).map(|_| StdAtomicUsize::new(0)).collect());

        let seen_cl = Arc::clone(&seen);
        pool.for_all_blocks(n_blocks, move |b, _t| {
            seen_cl[b].fetch_add(1, Ordering::SeqCst);
        });

        for count in seen.iter() {
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn for_all_visits_every_item_once() {
        let pool = ThreadPool::new(PoolConfig { n_threads: 3 });
        let n = 10_000;
        let seen: Arc<Vec<StdAtomicUsize>> = Arc::new((0..n).map(|_| StdAtomicUsize::new(0)).collect());

        let seen_cl = Arc::clone(&seen);
        pool.for_all(n, 777, move |i, _t| {
            seen_cl[i].fetch_add(1, Ordering::SeqCst);
        });

        for count in seen.iter() {
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn single_thread_pool_runs_sequentially() {
        let pool = ThreadPool::new(PoolConfig { n_threads: 1 });
        let order = Arc::new(Mutex::new(Vec::new()));
        let order_cl = Arc::clone(&order);
        pool.for_all_blocks(5, move |b, _t| order_cl.lock().push(b));
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }
}
