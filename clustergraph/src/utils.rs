use hytra::TrAdder;
use indicatif::{ProgressBar, ProgressFinish, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Run `f` on the current thread, displaying a progress bar of `n_steps` steps if `f` takes
/// longer than `config.progress_min_time`.
///
/// `f` reports its progress by incrementing the counter it receives.
pub(crate) fn with_progress<F, T>(
    f: F,
    n_steps: u64,
    pb_msg: &'static str,
    config: &crate::Config,
) -> T
where
    F: FnOnce(&TrAdder<u64>) -> T + Send,
    T: Send,
{
    let step_cnt: TrAdder<u64> = TrAdder::new();
    let finished = AtomicBool::new(false);
    thread::scope(|s| {
        let finished_ref = &finished;
        let step_cnt_ref = &step_cnt;
        let pb_thread_handle = config.show_progress.then(|| {
            s.spawn(move || {
                let start = Instant::now();
                while start.elapsed() < config.progress_min_time {
                    thread::park_timeout(config.progress_min_time.saturating_sub(start.elapsed()));
                    if finished_ref.load(Ordering::Acquire) {
                        return;
                    }
                }
                let pb = ProgressBar::new(n_steps)
                    .with_style(
                        ProgressStyle::default_bar()
                            .template("{msg} {bar:40.green/white} {pos}/{len} messages ({elapsed})")
                            .unwrap_or_else(|_| ProgressStyle::default_bar()),
                    )
                    .with_finish(ProgressFinish::AndClear)
                    .with_message(pb_msg)
                    .with_position(step_cnt_ref.get());
                while !finished_ref.load(Ordering::Acquire) {
                    pb.set_position(step_cnt_ref.get());
                    thread::park_timeout(Duration::from_millis(50));
                }
                pb.finish_and_clear();
            })
        });

        let res = f(step_cnt_ref);
        finished_ref.store(true, Ordering::Release);
        // park always consumes the token and unpark always produces it, whether or not the
        // progress thread is currently parked.
        if let Some(handle) = pb_thread_handle {
            handle.thread().unpark();
        }
        res
    })
}
