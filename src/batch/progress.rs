//! Progress throttling and transfer rate accounting

use std::time::{Duration, Instant};

/// Gate for `progress` events: at most one per interval
///
/// The first update always passes. The final 100 % event bypasses the gate.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    next_due: Option<Instant>,
}

impl ProgressThrottle {
    /// Throttle to one update per `interval`
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    /// Whether an update may go out now
    pub fn should_emit(&mut self) -> bool {
        self.due_at(Instant::now())
    }

    fn due_at(&mut self, now: Instant) -> bool {
        if self.next_due.is_some_and(|due| now < due) {
            return false;
        }
        self.next_due = Some(now + self.interval);
        true
    }
}

/// Derived progress figures for one transfer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    /// Bytes written so far
    pub downloaded_bytes: u64,
    /// Expected size
    pub total_bytes: Option<u64>,
    /// 0.0 to 100.0; 0.0 while the size is unknown
    pub percent: f64,
    /// Average bytes per second since the transfer started
    pub speed_bps: u64,
    /// Seconds remaining at the current average speed
    pub eta_secs: Option<u64>,
}

/// Accumulates bytes written and derives speed and ETA
#[derive(Debug)]
pub struct TransferMeter {
    started: Instant,
    downloaded: u64,
    total: Option<u64>,
}

impl TransferMeter {
    /// Start measuring now
    pub fn start(total: Option<u64>) -> Self {
        Self {
            started: Instant::now(),
            downloaded: 0,
            total,
        }
    }

    /// Record written bytes
    pub fn add(&mut self, bytes: u64) {
        self.downloaded += bytes;
    }

    /// Update the expected size (a resumed attempt may learn it late)
    pub fn set_total(&mut self, total: Option<u64>) {
        if total.is_some() {
            self.total = total;
        }
    }

    /// Bytes recorded so far
    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    /// Current figures
    pub fn snapshot(&self) -> ProgressSnapshot {
        snapshot_at(self.downloaded, self.total, self.started.elapsed())
    }
}

fn snapshot_at(downloaded: u64, total: Option<u64>, elapsed: Duration) -> ProgressSnapshot {
    let secs = elapsed.as_secs_f64();
    let speed_bps = if secs > 0.0 {
        (downloaded as f64 / secs) as u64
    } else {
        0
    };

    let percent = match total {
        Some(0) => 100.0,
        Some(total) => ((downloaded as f64 / total as f64) * 100.0).min(100.0),
        None => 0.0,
    };

    let eta_secs = match total {
        Some(total) if speed_bps > 0 => Some(total.saturating_sub(downloaded) / speed_bps),
        _ => None,
    };

    ProgressSnapshot {
        downloaded_bytes: downloaded,
        total_bytes: total,
        percent,
        speed_bps,
        eta_secs,
    }
}
