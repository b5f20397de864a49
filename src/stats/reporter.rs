// src/stats/reporter.rs
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use sysinfo::{Components, System};

/// Statistics related to search performance
#[derive(Debug, Clone, Default)]
pub struct SearchStats {
    /// Total number of hashes computed
    pub hashes_total: u64,
    /// Number of nonces that met the threshold
    pub winners: u64,
    /// Average hashrate since the reporter started (hashes per second)
    pub avg_hashrate: f64,
    /// Seconds since the reporter started
    pub elapsed_secs: f64,
}

/// Statistics related to hardware performance
#[derive(Debug, Clone)]
pub struct HardwareStats {
    /// Current CPU usage percentage (0-100)
    pub cpu_usage: f32,
    /// Memory currently used on the host (in bytes)
    pub memory_used: u64,
    /// Current CPU temperature in Celsius
    pub temperature: f32,
}

/// Collects and reports search and hardware statistics
pub struct StatsReporter {
    /// Atomic counters for search statistics
    stats: Arc<SearchStatsAtomic>,
    /// System information collector
    system: System,
    /// Hardware component information collector
    components: Components,
    /// Interval at which stats are reported
    report_interval: Duration,
    /// Cleared by [`StatsReporter::stop`]
    active: Arc<AtomicBool>,
}

/// Atomic version of SearchStats for thread-safe operations
struct SearchStatsAtomic {
    hashes: AtomicU64,
    winners: AtomicU64,
    start_time: Instant,
}

impl Clone for StatsReporter {
    fn clone(&self) -> Self {
        StatsReporter {
            stats: self.stats.clone(),
            system: System::new_all(),
            components: Components::new_with_refreshed_list(),
            report_interval: self.report_interval,
            active: self.active.clone(),
        }
    }
}

impl StatsReporter {
    /// Creates a new StatsReporter with the specified reporting interval
    ///
    /// # Arguments
    /// * `report_interval` - How often to log statistics
    pub fn new(report_interval: Duration) -> Self {
        StatsReporter {
            stats: Arc::new(SearchStatsAtomic {
                hashes: AtomicU64::new(0),
                winners: AtomicU64::new(0),
                start_time: Instant::now(),
            }),
            system: System::new_all(),
            components: Components::new_with_refreshed_list(),
            report_interval,
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Creates and returns a channel sender for winner counts
    ///
    /// The reporter listens for these events on a background thread.
    pub fn winner_sender(&self) -> Sender<u64> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.start_listener(rx, Counter::Winners);
        tx
    }

    /// Creates and returns a channel sender for hash counts
    ///
    /// The returned sender can be used to report completed hashes.
    /// The reporter listens for these events on a background thread.
    pub fn hash_sender(&self) -> Sender<u64> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.start_listener(rx, Counter::Hashes);
        tx
    }

    /// Gets the current search statistics
    ///
    /// # Returns
    /// A snapshot of the current search statistics
    pub fn get_stats(&self) -> SearchStats {
        let elapsed_secs = self.stats.start_time.elapsed().as_secs_f64();
        let hashes = self.stats.hashes.load(Ordering::Relaxed);

        SearchStats {
            hashes_total: hashes,
            winners: self.stats.winners.load(Ordering::Relaxed),
            avg_hashrate: hashes as f64 / elapsed_secs.max(f64::EPSILON),
            elapsed_secs,
        }
    }

    /// Gets the current hardware statistics
    ///
    /// This refreshes system information before returning the stats.
    ///
    /// # Returns
    /// A snapshot of the current hardware statistics
    pub fn get_hardware_stats(&mut self) -> HardwareStats {
        self.system.refresh_cpu_all();
        self.system.refresh_memory();
        self.components.refresh(true);

        let cpus = self.system.cpus();
        let cpu_usage = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
        };

        let temperature = self
            .components
            .iter()
            .find(|c| c.label().contains("CPU"))
            .and_then(|c| c.temperature())
            .unwrap_or(0.0);

        HardwareStats {
            cpu_usage,
            memory_used: self.system.used_memory(),
            temperature,
        }
    }

    /// Starts the periodic reporting of statistics
    ///
    /// This spawns a background thread that logs stats at the configured
    /// interval until [`StatsReporter::stop`] is called.
    pub fn start_reporting(&self) {
        let mut reporter = self.clone();

        std::thread::spawn(move || {
            loop {
                std::thread::sleep(reporter.report_interval);
                if !reporter.active.load(Ordering::Relaxed) {
                    break;
                }
                let search_stats = reporter.get_stats();
                let hw_stats = reporter.get_hardware_stats();

                log::info!(
                    "Hashrate: {:.2} H/s | Hashes: {} | Winners: {} | CPU: {:.1}% | Temp: {:.1}°C",
                    search_stats.avg_hashrate,
                    search_stats.hashes_total,
                    search_stats.winners,
                    hw_stats.cpu_usage,
                    hw_stats.temperature
                );
            }
        });
    }

    /// Ends periodic reporting after the current interval
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Starts a listener for one counter on a background thread
    fn start_listener(&self, receiver: Receiver<u64>, counter: Counter) {
        let stats = self.stats.clone();

        std::thread::spawn(move || {
            let target = match counter {
                Counter::Hashes => &stats.hashes,
                Counter::Winners => &stats.winners,
            };
            for count in receiver {
                target.fetch_add(count, Ordering::Relaxed);
            }
        });
    }
}

#[derive(Debug, Clone, Copy)]
enum Counter {
    Hashes,
    Winners,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wait_for(reporter: &StatsReporter, hashes: u64, winners: u64) -> SearchStats {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let stats = reporter.get_stats();
            if (stats.hashes_total == hashes && stats.winners == winners)
                || Instant::now() > deadline
            {
                return stats;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn counters_accumulate_from_channels() {
        let reporter = StatsReporter::new(Duration::from_secs(60));
        let hashes = reporter.hash_sender();
        let winners = reporter.winner_sender();
        hashes.send(4096).unwrap();
        hashes.send(904).unwrap();
        winners.send(2).unwrap();

        let stats = wait_for(&reporter, 5000, 2);
        assert_eq!(stats.hashes_total, 5000);
        assert_eq!(stats.winners, 2);
        assert!(stats.avg_hashrate > 0.0);
    }

    #[test]
    fn clones_share_counters() {
        let reporter = StatsReporter::new(Duration::from_secs(60));
        let clone = reporter.clone();
        clone.hash_sender().send(7).unwrap();
        assert_eq!(wait_for(&reporter, 7, 0).hashes_total, 7);
    }
}
