//! Bounded worker pool
//!
//! Runs independent tasks on a dedicated rayon pool of at most `limit`
//! threads. Results come back in submission order; a failing task reports
//! through its own return value and never cancels its siblings.

use rayon::prelude::*;

/// Apply `task` to every item with at most `limit` running at once
pub fn run_bounded<T, R, F>(limit: usize, items: &[T], task: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    let limit = limit.max(1).min(items.len().max(1));
    if limit == 1 {
        return items.iter().map(task).collect();
    }

    match rayon::ThreadPoolBuilder::new().num_threads(limit).build() {
        Ok(pool) => pool.install(|| items.par_iter().map(&task).collect()),
        Err(e) => {
            log::warn!("Could not start a {}-thread pool ({}); running sequentially", limit, e);
            items.iter().map(task).collect()
        }
    }
}
