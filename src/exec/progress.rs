//! Progress Reporting
//!
//! Tracks how many commands have completed out of the total planned for a
//! run (the sum of command counts across every transition, not the number of
//! transitions) and renders the distilled spec's §6 progress-line template,
//! rate limited to 1 Hz so a fast run doesn't flood the log with one line per
//! command.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// `done`/`total` counters plus a last-report gate. Shared via `Arc` across
/// every worker task; `bump_done` is the only mutating call on the hot path.
pub struct ProgressReporter {
    total: AtomicU64,
    done: AtomicU64,
    last_report: Mutex<Option<Instant>>,
    start: Instant,
}

impl ProgressReporter {
    pub fn new(total: u64) -> Self {
        Self { total: AtomicU64::new(total), done: AtomicU64::new(0), last_report: Mutex::new(None), start: Instant::now() }
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    /// Records one more completed command and returns a rendered line if
    /// enough time has passed since the last report (or this is the final
    /// one), else `None`.
    pub fn bump_done(&self) -> Option<String> {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.total();
        let is_final = done >= total;
        let mut gate = self.last_report.lock().unwrap();
        let should_report = is_final
            || match *gate {
                None => true,
                Some(last) => last.elapsed() >= MIN_INTERVAL,
            };
        if !should_report {
            return None;
        }
        *gate = Some(Instant::now());
        drop(gate);
        Some(self.render(done, total))
    }

    /// Renders the template unconditionally, ignoring the rate gate — used to
    /// emit a closing line even when the final `bump_done` landed inside the
    /// same second as the previous report.
    pub fn render_now(&self) -> String {
        self.render(self.done(), self.total())
    }

    fn render(&self, done: u64, total: u64) -> String {
        let percent = if total == 0 { 100.0 } else { (done as f64 / total as f64) * 100.0 };
        let elapsed = self.start.elapsed().as_secs_f64();
        let avg_rate = if elapsed > 0.0 { done as f64 / elapsed } else { 0.0 };
        let eta = if avg_rate > 0.0 { ((total.saturating_sub(done)) as f64 / avg_rate).round() as u64 } else { 0 };
        format!("[{done}/{total}] {percent:.1}% eta {eta}s ({avg_rate:.2}/s)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_bump_always_reports() {
        let reporter = ProgressReporter::new(3);
        assert!(reporter.bump_done().is_some());
    }

    #[test]
    fn final_bump_always_reports_even_if_rate_limited() {
        let reporter = ProgressReporter::new(1);
        let line = reporter.bump_done();
        assert!(line.is_some());
        assert!(line.unwrap().starts_with("[1/1]"));
    }

    #[test]
    fn rapid_intermediate_bumps_are_rate_limited() {
        let reporter = ProgressReporter::new(100);
        assert!(reporter.bump_done().is_some());
        assert!(reporter.bump_done().is_none());
    }
}
