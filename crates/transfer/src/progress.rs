use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Minimum time between two redraws of a [`ProgressLine`].
const DEFAULT_REDRAW: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100).max(2),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records that `bytes` more were transferred just now.
    pub fn add_sample(&self, bytes: u64) {
        self.add_sample_at(bytes, Instant::now());
    }

    fn add_sample_at(&self, bytes: u64, now: Instant) {
        let mut s = self.lock();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        if let Some(cutoff) = now.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }
        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Average bytes/second within the window; 0.0 with fewer than 2 samples.
    ///
    /// The oldest sample only marks the window start, its bytes were
    /// transferred before it.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.lock();
        let (Some(first), Some(last)) = (s.samples.first(), s.samples.last()) else {
            return 0.0;
        };
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if s.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }
        let total_bytes: u64 = s.samples[1..].iter().map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimates time remaining to transfer `remaining_bytes`.
    ///
    /// Returns `None` if speed is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    pub fn reset(&self) {
        self.lock().samples.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SpeedInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Sizes
// ---------------------------------------------------------------------------

/// Formats a byte count with binary units, e.g. `"1.50 MiB"`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

// ---------------------------------------------------------------------------
// ProgressLine
// ---------------------------------------------------------------------------

/// Renders a one-line terminal progress bar for a single transfer.
///
/// `<name> [#####     ] 50.0% (5.00 MiB/10.00 MiB) 1.20 MiB/s`
///
/// The caller writes the returned strings (they end in `\r`, the final one
/// in `\n`). Shorter lines are padded so no stale characters remain.
pub struct ProgressLine {
    name: String,
    total: u64,
    width: usize,
    redraw_every: Duration,
    speed: SpeedCalculator,
    started: Instant,
    last_draw: Option<Instant>,
    last_bytes: u64,
    widest: usize,
}

impl ProgressLine {
    pub fn new(name: impl Into<String>, total: u64) -> Self {
        Self {
            name: name.into(),
            total,
            width: 32,
            redraw_every: DEFAULT_REDRAW,
            speed: SpeedCalculator::new(Some(Duration::from_secs(3)), None),
            started: Instant::now(),
            last_draw: None,
            last_bytes: 0,
            widest: 0,
        }
    }

    /// Sets the bar width in characters.
    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    pub fn with_redraw_interval(mut self, interval: Duration) -> Self {
        self.redraw_every = interval;
        self
    }

    /// Feeds the absolute byte count; returns a line when a redraw is due.
    pub fn update(&mut self, bytes: u64) -> Option<String> {
        self.speed.add_sample(bytes.saturating_sub(self.last_bytes));
        self.last_bytes = self.last_bytes.max(bytes);

        let now = Instant::now();
        if self
            .last_draw
            .is_some_and(|at| now.duration_since(at) < self.redraw_every)
        {
            return None;
        }
        self.last_draw = Some(now);
        let line = self.render(bytes, self.speed.bytes_per_second());
        Some(self.pad(line, '\r'))
    }

    /// Final full bar with the average speed of the whole transfer.
    pub fn done(&mut self) -> String {
        let total = self.total.max(self.last_bytes);
        let elapsed = self.started.elapsed().as_secs_f64();
        let speed = if elapsed > 0.0 {
            total as f64 / elapsed
        } else {
            0.0
        };
        self.total = total;
        let line = self.render(total, speed);
        self.pad(line, '\n')
    }

    /// Formats one line without throttling or padding.
    pub fn render(&self, bytes: u64, bytes_per_second: f64) -> String {
        let fraction = if self.total == 0 {
            1.0
        } else {
            (bytes as f64 / self.total as f64).min(1.0)
        };
        let filled = ((self.width as f64) * fraction) as usize;
        format!(
            "{} [{}{}] {:.1}% ({}/{}) {}/s",
            self.name,
            "#".repeat(filled),
            " ".repeat(self.width - filled),
            fraction * 100.0,
            format_size(bytes),
            format_size(self.total),
            format_size(bytes_per_second as u64),
        )
    }

    fn pad(&mut self, mut line: String, end: char) -> String {
        let len = line.chars().count();
        if len < self.widest {
            line.push_str(&" ".repeat(self.widest - len));
        }
        self.widest = self.widest.max(len);
        line.push(end);
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn speed_calculator_no_samples() {
        let calc = SpeedCalculator::new(None, None);
        assert_eq!(calc.bytes_per_second(), 0.0);
        assert!(calc.eta(1000).is_none());
    }

    #[test]
    fn speed_calculator_single_sample() {
        let calc = SpeedCalculator::new(None, None);
        calc.add_sample(100);
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn speed_calculator_exact_rate() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(10)), None);
        let t0 = Instant::now();
        calc.add_sample_at(500, t0);
        calc.add_sample_at(1000, t0 + Duration::from_millis(500));
        calc.add_sample_at(1000, t0 + Duration::from_secs(1));
        assert_eq!(calc.bytes_per_second(), 2000.0);
        assert_eq!(calc.eta(4000), Some(Duration::from_secs(2)));
    }

    #[test]
    fn speed_calculator_drops_old_samples() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(1)), None);
        let t0 = Instant::now();
        calc.add_sample_at(1_000_000, t0);
        calc.add_sample_at(10, t0 + Duration::from_secs(5));
        calc.add_sample_at(10, t0 + Duration::from_millis(5500));
        assert_eq!(calc.bytes_per_second(), 20.0);
    }

    #[test]
    fn speed_calculator_reset() {
        let calc = SpeedCalculator::new(None, None);
        calc.add_sample(100);
        calc.add_sample(200);
        calc.reset();
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn speed_calculator_max_samples() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(60)), Some(5));
        for i in 0..20 {
            calc.add_sample(i * 10);
        }
        assert!(calc.lock().samples.len() <= 5);
    }

    #[test]
    fn speed_calculator_concurrent_access() {
        use std::thread;

        let calc = Arc::new(SpeedCalculator::new(None, None));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let c = Arc::clone(&calc);
                thread::spawn(move || {
                    for _ in 0..100 {
                        c.add_sample(1);
                        let _ = c.bytes_per_second();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let _ = calc.bytes_per_second();
    }

    #[test]
    fn format_size_units() {
        assert_eq!(format_size(0), "0.00 B");
        assert_eq!(format_size(1023), "1023.00 B");
        assert_eq!(format_size(1536), "1.50 KiB");
        assert_eq!(format_size(10 * 1024 * 1024), "10.00 MiB");
    }

    #[test]
    fn render_half_done() {
        let line = ProgressLine::new("movie.mkv", 10 * 1024 * 1024).with_width(10);
        assert_eq!(
            line.render(5 * 1024 * 1024, 1024.0 * 1024.0),
            "movie.mkv [#####     ] 50.0% (5.00 MiB/10.00 MiB) 1.00 MiB/s"
        );
    }

    #[test]
    fn updates_are_throttled() {
        let mut line = ProgressLine::new("f", 100).with_redraw_interval(Duration::from_secs(60));
        assert!(line.update(10).is_some());
        assert!(line.update(20).is_none());
    }

    #[test]
    fn done_is_full_and_padded() {
        let mut line = ProgressLine::new("f", 0).with_width(4);
        let first = line.update(0).unwrap();
        let last = line.done();
        assert!(last.starts_with("f [####] 100.0%"));
        assert!(last.ends_with('\n'));
        assert!(last.len() >= first.len());
    }
}
