use std::time::{Duration, Instant};

use upqueue_protocol::FileRecord;

/// Samples required before outlier rejection kicks in.
pub const MIN_SAMPLES_FOR_OUTLIER_REJECTION: usize = 8;

/// Samples more than this many standard deviations from the mean are
/// dropped from the moving average.
pub const OUTLIER_DEVIATION_RANGE: f64 = 2.0;

/// Default cap on retained per-interval speed samples.
pub const DEFAULT_MAX_SAMPLES: usize = 1024;

/// Intervals shorter than this are treated as zero: they yield no speed
/// sample and no average.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(1);

/// Mean of `history`, ignoring outliers once there are enough samples.
///
/// With fewer than [`MIN_SAMPLES_FOR_OUTLIER_REJECTION`] samples this is the
/// plain mean. Otherwise samples whose z-score falls outside
/// `±`[`OUTLIER_DEVIATION_RANGE`] are dropped first. A zero
/// standard deviation keeps every sample. Empty input yields 0.
pub fn moving_average(history: &[f64]) -> f64 {
    if history.is_empty() {
        return 0.0;
    }

    let count = history.len() as f64;
    let mean = history.iter().sum::<f64>() / count;
    if history.len() < MIN_SAMPLES_FOR_OUTLIER_REJECTION {
        return mean;
    }

    let variance = history.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / count;
    let std_dev = variance.sqrt();
    if std_dev == 0.0 {
        return mean;
    }

    let (sum, kept) = history
        .iter()
        .filter(|&&s| ((s - mean) / std_dev).abs() <= OUTLIER_DEVIATION_RANGE)
        .fold((0.0, 0usize), |(sum, n), s| (sum + s, n + 1));

    if kept == 0 { 0.0 } else { sum / kept as f64 }
}

/// Updates a record's live statistics from transport progress signals.
///
/// The calculator owns no state beyond its sample cap; the timestamps and
/// the speed history live on the record so each file is tracked
/// independently.
#[derive(Debug, Clone)]
pub struct SpeedCalculator {
    max_samples: usize,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SpeedCalculator {
    /// Creates a new calculator retaining at most `max_samples` speed
    /// samples per record (default 1024).
    pub fn new(max_samples: Option<usize>) -> Self {
        Self {
            max_samples: max_samples.unwrap_or(DEFAULT_MAX_SAMPLES).max(1),
        }
    }

    /// Stamps the start of a transfer and clears any figures left over
    /// from a previous attempt.
    pub fn begin(&self, record: &mut FileRecord, now: Instant) {
        record.started_at = Some(now);
        record.last_event_at = Some(now);
        record.bytes_uploaded = 0;
        record.current_speed = 0.0;
        record.average_speed = 0.0;
        record.moving_average_speed = 0.0;
        record.percent_uploaded = 0.0;
        record.time_elapsed = 0.0;
        record.time_remaining = 0.0;
        record.speed_history.clear();
    }

    /// Folds one progress report into the record.
    ///
    /// All figures are recomputed; any that come out non-finite (no time
    /// elapsed, zero total, zero speed) are stored as 0. A report arriving
    /// within [`MIN_SAMPLE_INTERVAL`] of the previous one adds nothing to
    /// the speed history. `bytes_uploaded` never decreases.
    pub fn record_progress(
        &self,
        record: &mut FileRecord,
        bytes_complete: u64,
        bytes_total: u64,
        now: Instant,
    ) {
        let started = *record.started_at.get_or_insert(now);
        let last = record.last_event_at.unwrap_or(started);

        let bytes_since = bytes_complete.saturating_sub(record.bytes_uploaded) as f64;
        let since_last = timed_secs(now.saturating_duration_since(last));
        let elapsed = timed_secs(now.saturating_duration_since(started));

        let current = bytes_since * 8.0 / since_last;
        if current.is_finite() {
            record.speed_history.push(current);
            if record.speed_history.len() > self.max_samples {
                let excess = record.speed_history.len() - self.max_samples;
                record.speed_history.drain(..excess);
            }
        }
        record.current_speed = finite_or_zero(current);

        let complete = bytes_complete as f64;
        let total = bytes_total as f64;
        record.bytes_uploaded = record.bytes_uploaded.max(bytes_complete);
        record.last_event_at = Some(now);
        record.time_elapsed = finite_or_zero(elapsed);
        record.average_speed = finite_or_zero(complete * 8.0 / elapsed);
        record.moving_average_speed = moving_average(&record.speed_history);
        record.percent_uploaded = finite_or_zero(complete / total * 100.0);
        record.time_remaining = finite_or_zero((total - complete) / (complete / elapsed));
    }
}

/// Seconds in `interval`, or NaN when it is too short to time.
fn timed_secs(interval: Duration) -> f64 {
    if interval < MIN_SAMPLE_INTERVAL {
        f64::NAN
    } else {
        interval.as_secs_f64()
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}
