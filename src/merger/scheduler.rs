//! Memory-aware thread pool running merge work items.
//!
//! Workers pull items in order. An item starts only while the memory
//! assigned to running items plus its own requirement stays within the
//! budget; otherwise the worker waits for running items to finish. An item
//! that alone exceeds the budget raises the ceiling to its requirement.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::unbounded;
use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex};

use crate::error::{IndexlibError, Result};
use crate::merger::merge_file_system::MergeFileSystem;
use crate::merger::work_item::MergeWorkItem;

/// Outcome of one [`MultiThreadedMergeScheduler::run`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleStats {
    /// Identifiers of the items that completed, in completion order.
    pub completed: Vec<String>,

    /// Largest amount of memory assigned to concurrently running items.
    pub peak_assigned: i64,

    /// Memory ceiling at the end of the run; above the budget when an item
    /// needed more than the budget.
    pub final_ceiling: i64,
}

#[derive(Debug)]
struct DispatchState {
    next: usize,
    assigned: i64,
    running: usize,
    ceiling: i64,
    peak_assigned: i64,
    error: Option<IndexlibError>,
}

#[derive(Debug)]
struct Completion {
    identifier: String,
    worker: usize,
    elapsed_ms: u128,
}

#[derive(Debug, Clone)]
pub struct MultiThreadedMergeScheduler {
    max_mem_use: i64,
    thread_num: usize,
}

impl MultiThreadedMergeScheduler {
    pub fn new(max_mem_use: i64, thread_num: usize) -> Self {
        MultiThreadedMergeScheduler {
            max_mem_use: max_mem_use.max(1),
            thread_num: thread_num.max(1),
        }
    }

    pub fn thread_num(&self) -> usize {
        self.thread_num
    }

    pub fn max_mem_use(&self) -> i64 {
        self.max_mem_use
    }

    /// Run `items` to completion. `create_fs(worker)` gives each worker its
    /// file system; it is committed after every successful item and once
    /// more when the worker exits normally.
    ///
    /// The first failing item stops dispatch; items already running finish
    /// and the failure is returned.
    pub fn run<F>(&self, items: &[Arc<dyn MergeWorkItem>], create_fs: F) -> Result<ScheduleStats>
    where
        F: Fn(usize) -> Box<dyn MergeFileSystem> + Sync,
    {
        let state = Mutex::new(DispatchState {
            next: 0,
            assigned: 0,
            running: 0,
            ceiling: self.max_mem_use,
            peak_assigned: 0,
            error: None,
        });
        let wakeup = Condvar::new();
        let (done_sender, done_receiver) = unbounded::<Completion>();
        let worker_count = self.thread_num.min(items.len()).max(1);
        info!(
            "scheduling [{}] merge items on [{worker_count}] threads, memory budget [{}]",
            items.len(),
            self.max_mem_use
        );

        thread::scope(|scope| -> Result<()> {
            let mut handles = Vec::with_capacity(worker_count);
            for worker in 0..worker_count {
                let sender = done_sender.clone();
                let state = &state;
                let wakeup = &wakeup;
                let create_fs = &create_fs;
                let handle = thread::Builder::new()
                    .name(format!("merge-worker-{worker}"))
                    .spawn_scoped(scope, move || {
                        let mut fs = create_fs(worker);
                        while let Some((idx, required)) = Self::acquire(state, wakeup, items) {
                            let item = &items[idx];
                            let start = Instant::now();
                            let result = item.process(fs.as_mut()).and_then(|_| fs.commit());

                            let mut guard = state.lock();
                            guard.assigned -= required;
                            guard.running -= 1;
                            match result {
                                Ok(_) => {
                                    let _ = sender.send(Completion {
                                        identifier: item.identifier().to_string(),
                                        worker,
                                        elapsed_ms: start.elapsed().as_millis(),
                                    });
                                }
                                Err(e) => {
                                    error!("merge item [{}] failed: {e}", item.identifier());
                                    if let Err(discard) = fs.discard() {
                                        warn!("dropping output of [{}] failed: {discard}", item.identifier());
                                    }
                                    if guard.error.is_none() {
                                        guard.error = Some(e);
                                    }
                                }
                            }
                            wakeup.notify_all();
                        }
                        if let Err(e) = fs.commit() {
                            let mut guard = state.lock();
                            if guard.error.is_none() {
                                guard.error = Some(e);
                            }
                        }
                    })
                    .map_err(|e| IndexlibError::ThreadJoin(format!("spawning merge worker: {e}")))?;
                handles.push(handle);
            }
            for handle in handles {
                handle
                    .join()
                    .map_err(|_| IndexlibError::ThreadJoin("merge worker panicked".to_string()))?;
            }
            Ok(())
        })?;
        drop(done_sender);

        let state = state.into_inner();
        if let Some(e) = state.error {
            return Err(e);
        }
        let mut stats = ScheduleStats {
            completed: Vec::with_capacity(items.len()),
            peak_assigned: state.peak_assigned,
            final_ceiling: state.ceiling,
        };
        for done in done_receiver.try_iter() {
            debug!(
                "merge item [{}] done on worker [{}] in [{}] ms",
                done.identifier, done.worker, done.elapsed_ms
            );
            stats.completed.push(done.identifier);
        }
        Ok(stats)
    }

    /// Claim the next item once its memory fits. `None` when dispatch is
    /// over.
    fn acquire(
        state: &Mutex<DispatchState>,
        wakeup: &Condvar,
        items: &[Arc<dyn MergeWorkItem>],
    ) -> Option<(usize, i64)> {
        let mut guard = state.lock();
        loop {
            if guard.error.is_some() || guard.next >= items.len() {
                return None;
            }
            let item = &items[guard.next];
            let required = item.required_resource().max(0);
            if required > guard.ceiling {
                warn!(
                    "merge item [{}] needs [{required}] bytes, above the ceiling [{}]; raising it",
                    item.identifier(),
                    guard.ceiling
                );
                guard.ceiling = required;
            }
            if guard.running == 0 || guard.assigned + required <= guard.ceiling {
                let idx = guard.next;
                guard.next += 1;
                guard.assigned += required;
                guard.running += 1;
                guard.peak_assigned = guard.peak_assigned.max(guard.assigned);
                return Some((idx, required));
            }
            wakeup.wait(&mut guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::merger::merge_file_system::BufferedMergeFileSystem;
    use crate::storage::Storage;
    use crate::storage::memory::MemoryStorage;

    #[derive(Debug)]
    struct FileItem {
        name: String,
        memory: i64,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    impl MergeWorkItem for FileItem {
        fn identifier(&self) -> &str {
            &self.name
        }

        fn required_resource(&self) -> i64 {
            self.memory
        }

        fn cost(&self) -> f64 {
            1.0
        }

        fn process(&self, fs: &mut dyn MergeFileSystem) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                fs.storage().write_all(&format!("{}.partial", self.name), b"x")?;
                return Err(IndexlibError::other(format!("{} failed", self.name)));
            }
            fs.storage().write_all(&self.name, self.name.as_bytes())
        }
    }

    fn items(specs: &[(&str, i64, bool)], calls: &Arc<AtomicUsize>) -> Vec<Arc<dyn MergeWorkItem>> {
        specs
            .iter()
            .map(|&(name, memory, fail)| {
                Arc::new(FileItem {
                    name: name.to_string(),
                    memory,
                    fail,
                    calls: calls.clone(),
                }) as Arc<dyn MergeWorkItem>
            })
            .collect()
    }

    fn run(
        scheduler: &MultiThreadedMergeScheduler,
        items: &[Arc<dyn MergeWorkItem>],
    ) -> (Arc<dyn Storage>, Result<ScheduleStats>) {
        let target: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let lock = Arc::new(Mutex::new(()));
        let result = scheduler.run(items, |worker| {
            Box::new(BufferedMergeFileSystem::new(
                target.clone(),
                &format!("instance/w{worker}"),
                lock.clone(),
            ))
        });
        (target, result)
    }

    #[test]
    fn test_runs_every_item() {
        let calls = Arc::new(AtomicUsize::new(0));
        let items = items(&[("a", 10, false), ("b", 10, false), ("c", 10, false)], &calls);
        let (target, result) = run(&MultiThreadedMergeScheduler::new(100, 2), &items);
        let stats = result.unwrap();
        assert_eq!(stats.completed.len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(target.list_files().unwrap().len(), 3);
        assert!(stats.peak_assigned <= 100);
    }

    #[test]
    fn test_budget_limits_concurrency() {
        let calls = Arc::new(AtomicUsize::new(0));
        let items = items(&[("a", 60, false), ("b", 60, false), ("c", 60, false)], &calls);
        let (_, result) = run(&MultiThreadedMergeScheduler::new(100, 3), &items);
        let stats = result.unwrap();
        assert_eq!(stats.peak_assigned, 60);
        assert_eq!(stats.final_ceiling, 100);
    }

    #[test]
    fn test_oversized_item_raises_ceiling() {
        let calls = Arc::new(AtomicUsize::new(0));
        let items = items(&[("small", 10, false), ("huge", 500, false)], &calls);
        let (_, result) = run(&MultiThreadedMergeScheduler::new(100, 2), &items);
        let stats = result.unwrap();
        assert_eq!(stats.final_ceiling, 500);
        assert_eq!(stats.completed.len(), 2);
    }

    #[test]
    fn test_first_error_stops_dispatch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let items = items(
            &[("bad", 10, true), ("x", 10, false), ("y", 10, false), ("z", 10, false)],
            &calls,
        );
        let (target, result) = run(&MultiThreadedMergeScheduler::new(100, 1), &items);
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(target.list_files().unwrap().is_empty());
    }
}
