//! Bounded fan-out over scoped threads.

use parking_lot::Mutex;
use std::thread;

/// Runs `work` over `items` on at most `parallelism` threads and returns the
/// outputs in input order.
///
/// Workers pull the next item from a shared queue, so a slow item never
/// holds back the others. A panic in `work` propagates to the caller.
pub(crate) fn run<I, O, F>(parallelism: usize, items: Vec<I>, work: F) -> Vec<O>
where
    I: Send,
    O: Send,
    F: Fn(I) -> O + Sync,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }

    let queue = Mutex::new(items.into_iter().enumerate());
    let results = Mutex::new(Vec::with_capacity(total));
    let workers = parallelism.clamp(1, total);

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let next = queue.lock().next();
                let Some((position, item)) = next else {
                    break;
                };
                let output = work(item);
                results.lock().push((position, output));
            });
        }
    });

    let mut results = results.into_inner();
    results.sort_by_key(|(position, _)| *position);
    results.into_iter().map(|(_, output)| output).collect()
}
