//! Windowed moving-average bitrate accounting.

use std::collections::VecDeque;
use std::time::Instant;

/// Moving-average bits-per-second meter.
///
/// Bytes accumulate into the current one-second bucket; each closed
/// bucket is pushed into a bounded window and the reported bitrate is
/// the mean over the window. Until the first bucket closes the meter
/// falls back to a coarse lifetime estimate.
#[derive(Debug)]
pub struct BitrateMeter {
    created: Instant,
    total_bytes: u64,
    window: VecDeque<u64>,
    window_size: usize,
    current_bitrate: u64,
    bucket_started: Instant,
    bucket_bytes: u64,
}

impl BitrateMeter {
    /// Create a meter averaging over `window_size` one-second buckets.
    pub fn new(window_size: usize) -> Self {
        let now = Instant::now();
        Self {
            created: now,
            total_bytes: 0,
            window: VecDeque::with_capacity(window_size),
            window_size: window_size.max(1),
            current_bitrate: 0,
            bucket_started: now,
            bucket_bytes: 0,
        }
    }

    /// Account for sent bytes, closing the current bucket when it is due.
    pub fn add(&mut self, bytes: u64) {
        self.total_bytes += bytes;
        self.bucket_bytes += bytes;

        let elapsed = self.bucket_started.elapsed();
        if elapsed.as_secs_f64() >= 1.0 {
            let bitrate = (self.bucket_bytes as f64 * 8.0 / elapsed.as_secs_f64()) as u64;
            if self.window.len() == self.window_size {
                self.window.pop_front();
            }
            self.window.push_back(bitrate);
            self.current_bitrate = self.window.iter().sum::<u64>() / self.window.len() as u64;
            self.bucket_started = Instant::now();
            self.bucket_bytes = 0;
        }
    }

    /// Current average in bits per second.
    pub fn bitrate(&self) -> u64 {
        if self.current_bitrate == 0 {
            let elapsed = self.created.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                return (self.total_bytes as f64 * 8.0 / elapsed) as u64;
            }
        }
        self.current_bitrate
    }

    /// Lifetime total of accounted bytes.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_total_bytes_accumulates() {
        let mut meter = BitrateMeter::new(5);
        meter.add(1000);
        meter.add(500);
        assert_eq!(meter.total_bytes(), 1500);
    }

    #[test]
    fn test_coarse_estimate_before_first_bucket() {
        let mut meter = BitrateMeter::new(5);
        meter.add(125_000); // 1 Mbit
        thread::sleep(Duration::from_millis(50));
        let bitrate = meter.bitrate();
        // Roughly 1 Mbit over a few dozen milliseconds.
        assert!(bitrate > 1_000_000, "got {bitrate}");
    }

    #[test]
    fn test_window_average_after_bucket_closes() {
        let mut meter = BitrateMeter::new(3);
        meter.add(125_000);
        thread::sleep(Duration::from_millis(1050));
        meter.add(0); // closes the bucket
        let bitrate = meter.bitrate();
        // 1 Mbit over ~1.05 s, allow generous slack for scheduling.
        assert!(bitrate > 700_000 && bitrate < 1_100_000, "got {bitrate}");
    }
}
