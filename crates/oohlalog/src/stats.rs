// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic process stats push.
//!
//! Independent of the entry buffer and its flush gate: every `stats_interval`
//! the controller takes a snapshot from a [`StatsProvider`] and hands it to the
//! [`Dispatcher`] once. A failed push is logged and forgotten, never queued.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::dispatcher::{DeliveryMetadata, Dispatcher, StatsPayload};

pub const USED_MEMORY_METRIC: &str = "usedMemory";
pub const TOTAL_MEMORY_METRIC: &str = "totalMemory";
pub const CPU_USER_METRIC: &str = "cpuUserMillis";
pub const CPU_SYSTEM_METRIC: &str = "cpuSystemMillis";
pub const TOTAL_SPACE_METRIC: &str = "totalSpace";
pub const FREE_SPACE_METRIC: &str = "freeSpace";
pub const USED_SPACE_METRIC: &str = "usedSpace";

pub trait StatsProvider: Send + Sync {
    /// Metric name to value. An empty map means there is nothing to report.
    fn snapshot(&self) -> BTreeMap<String, f64>;
}

/// Memory and CPU usage of the current process, read from procfs, plus
/// space on the root filesystem.
#[derive(Debug, Clone, Copy)]
pub struct ProcessStatsProvider {
    memory: bool,
    cpu: bool,
    filesystem: bool,
}

impl ProcessStatsProvider {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        ProcessStatsProvider {
            memory: config.memory_stats,
            cpu: config.cpu_stats,
            filesystem: config.filesystem_stats,
        }
    }
}

#[cfg(target_os = "linux")]
mod procfs {
    use nix::sys::statvfs::statvfs;
    use nix::unistd::{sysconf, SysconfVar};
    use std::fs;
    use tracing::debug;

    const STATM_PATH: &str = "/proc/self/statm"; // Sizes in pages: total program size, resident set, ...
    const STAT_PATH: &str = "/proc/self/stat"; // utime and stime are fields 14 and 15, in clock ticks
    const FILESYSTEM_ROOT: &str = "/";

    /// Page size and clock tick rate vary by architecture and kernel build.
    #[allow(clippy::cast_sign_loss)]
    fn sysconf_positive(var: SysconfVar) -> Option<u64> {
        match sysconf(var) {
            Ok(Some(value)) if value > 0 => Some(value as u64),
            _ => {
                debug!("Could not query {var:?} from sysconf");
                None
            }
        }
    }

    /// `(resident bytes, virtual bytes)`.
    pub(super) fn read_memory() -> Option<(u64, u64)> {
        let page_size = sysconf_positive(SysconfVar::PAGE_SIZE)?;
        let memory = fs::read_to_string(STATM_PATH)
            .ok()
            .and_then(|contents| parse_statm(&contents, page_size));
        if memory.is_none() {
            debug!("Could not read memory usage from {STATM_PATH}");
        }
        memory
    }

    /// `(user millis, system millis)`.
    pub(super) fn read_cpu() -> Option<(u64, u64)> {
        let ticks_per_sec = sysconf_positive(SysconfVar::CLK_TCK)?;
        let cpu = fs::read_to_string(STAT_PATH)
            .ok()
            .and_then(|contents| parse_stat_cpu(&contents, ticks_per_sec));
        if cpu.is_none() {
            debug!("Could not read CPU times from {STAT_PATH}");
        }
        cpu
    }

    /// Space on the filesystem holding `/`, in bytes.
    #[allow(clippy::useless_conversion)]
    pub(super) fn read_filesystem() -> Option<FilesystemSpace> {
        match statvfs(FILESYSTEM_ROOT) {
            Ok(stat) => Some(FilesystemSpace::from_blocks(
                u64::from(stat.blocks()),
                u64::from(stat.blocks_free()),
                u64::from(stat.blocks_available()),
                u64::from(stat.fragment_size()),
            )),
            Err(e) => {
                debug!("Could not read filesystem stats for {FILESYSTEM_ROOT}: {e}");
                None
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(super) struct FilesystemSpace {
        pub total: u64,
        /// Available to unprivileged processes, like `df`'s "Avail".
        pub free: u64,
        pub used: u64,
    }

    impl FilesystemSpace {
        pub(super) fn from_blocks(
            blocks: u64,
            blocks_free: u64,
            blocks_available: u64,
            fragment_size: u64,
        ) -> Self {
            FilesystemSpace {
                total: blocks.saturating_mul(fragment_size),
                free: blocks_available.saturating_mul(fragment_size),
                used: blocks
                    .saturating_sub(blocks_free)
                    .saturating_mul(fragment_size),
            }
        }
    }

    pub(super) fn parse_statm(contents: &str, page_size: u64) -> Option<(u64, u64)> {
        let mut fields = contents.split_whitespace();
        let size = fields.next()?.parse::<u64>().ok()?;
        let resident = fields.next()?.parse::<u64>().ok()?;
        Some((
            resident.saturating_mul(page_size),
            size.saturating_mul(page_size),
        ))
    }

    pub(super) fn parse_stat_cpu(contents: &str, ticks_per_sec: u64) -> Option<(u64, u64)> {
        // The command name may contain spaces and parentheses, so skip past
        // the last ')' before splitting. The next field is the state (3).
        let rest = &contents[contents.rfind(')')? + 1..];
        let fields: Vec<&str> = rest.split_whitespace().collect();
        let utime = fields.get(11)?.parse::<u64>().ok()?;
        let stime = fields.get(12)?.parse::<u64>().ok()?;
        let to_millis = |ticks: u64| ticks.saturating_mul(1000).checked_div(ticks_per_sec);
        Some((to_millis(utime)?, to_millis(stime)?))
    }
}

impl StatsProvider for ProcessStatsProvider {
    #[cfg(target_os = "linux")]
    #[allow(clippy::cast_precision_loss)]
    fn snapshot(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        if self.memory {
            if let Some((used, total)) = procfs::read_memory() {
                metrics.insert(USED_MEMORY_METRIC.to_string(), used as f64);
                metrics.insert(TOTAL_MEMORY_METRIC.to_string(), total as f64);
            }
        }
        if self.cpu {
            if let Some((user, system)) = procfs::read_cpu() {
                metrics.insert(CPU_USER_METRIC.to_string(), user as f64);
                metrics.insert(CPU_SYSTEM_METRIC.to_string(), system as f64);
            }
        }
        if self.filesystem {
            if let Some(space) = procfs::read_filesystem() {
                metrics.insert(TOTAL_SPACE_METRIC.to_string(), space.total as f64);
                metrics.insert(FREE_SPACE_METRIC.to_string(), space.free as f64);
                metrics.insert(USED_SPACE_METRIC.to_string(), space.used as f64);
            }
        }
        metrics
    }

    #[cfg(not(target_os = "linux"))]
    fn snapshot(&self) -> BTreeMap<String, f64> {
        BTreeMap::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsOutcome {
    Sent(usize),
    /// Stats are disabled or the provider had nothing to report.
    Skipped,
    Failed,
}

struct StatsCore {
    dispatcher: Arc<dyn Dispatcher>,
    provider: Arc<dyn StatsProvider>,
    metadata: DeliveryMetadata,
    host_name: String,
    enabled: bool,
    interval: Duration,
}

impl StatsCore {
    async fn push(&self) -> StatsOutcome {
        if !self.enabled {
            return StatsOutcome::Skipped;
        }
        let metrics = self.provider.snapshot();
        if metrics.is_empty() {
            debug!("No stats to report");
            return StatsOutcome::Skipped;
        }

        let count = metrics.len();
        let payload = StatsPayload {
            metrics,
            host: self.host_name.clone(),
            metadata: self.metadata.clone(),
        };
        match self.dispatcher.deliver_stats(&payload).await {
            Ok(()) => {
                debug!("Sent {count} stats");
                StatsOutcome::Sent(count)
            }
            Err(e) => {
                warn!("Failed to send stats: {e}");
                StatsOutcome::Failed
            }
        }
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.push().await;
        }
        debug!("Stats loop stopped");
    }
}

pub struct StatsController {
    core: Arc<StatsCore>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StatsController {
    #[must_use]
    pub fn new(
        config: &Config,
        dispatcher: Arc<dyn Dispatcher>,
        provider: Arc<dyn StatsProvider>,
    ) -> Self {
        StatsController {
            core: Arc::new(StatsCore {
                dispatcher,
                provider,
                metadata: DeliveryMetadata::from_config(config),
                host_name: config.resolved_host_name(),
                enabled: config.stats_enabled,
                interval: config.stats_interval,
            }),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Spawns the stats loop unless stats are disabled or it already runs.
    pub fn start(&self) {
        if !self.core.enabled {
            debug!("Stats disabled, not starting stats loop");
            return;
        }
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() || self.cancel.is_cancelled() {
            return;
        }
        *task = Some(tokio::spawn(
            Arc::clone(&self.core).run(self.cancel.clone()),
        ));
        debug!(
            "Stats loop started, interval {} ms",
            self.core.interval.as_millis()
        );
    }

    /// Takes and sends one snapshot right away.
    pub async fn push_now(&self) -> StatsOutcome {
        self.core.push().await
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Stats loop ended abnormally: {e}");
            }
        }
    }
}

impl Drop for StatsController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::BatchPayload;
    use crate::errors::DeliveryError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::sleep;

    #[derive(Default)]
    struct RecordingDispatcher {
        fail: AtomicBool,
        sent: Mutex<Vec<StatsPayload>>,
    }

    impl RecordingDispatcher {
        fn sent(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Dispatcher for RecordingDispatcher {
        async fn deliver(&self, _batch: &BatchPayload) -> Result<(), DeliveryError> {
            Ok(())
        }

        async fn deliver_stats(&self, stats: &StatsPayload) -> Result<(), DeliveryError> {
            self.sent.lock().unwrap().push(stats.clone());
            if self.fail.load(Ordering::SeqCst) {
                Err(DeliveryError::Url("unreachable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct FixedStats(BTreeMap<String, f64>);

    impl StatsProvider for FixedStats {
        fn snapshot(&self) -> BTreeMap<String, f64> {
            self.0.clone()
        }
    }

    fn fixed() -> Arc<FixedStats> {
        Arc::new(FixedStats(BTreeMap::from([(
            USED_MEMORY_METRIC.to_string(),
            1024.0,
        )])))
    }

    fn config(enabled: bool) -> Config {
        Config {
            auth_token: Some("token".to_string()),
            host_name: Some("web-1".to_string()),
            stats_enabled: enabled,
            stats_interval: Duration::from_secs(60),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pushes_every_interval() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let controller = StatsController::new(&config(true), dispatcher.clone(), fixed());
        controller.start();

        sleep(Duration::from_secs(59)).await;
        assert_eq!(dispatcher.sent(), 0);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(dispatcher.sent(), 1);
        sleep(Duration::from_secs(60)).await;
        assert_eq!(dispatcher.sent(), 2);

        let sent = dispatcher.sent.lock().unwrap()[0].clone();
        assert_eq!(sent.host, "web-1");
        assert_eq!(sent.metrics.get(USED_MEMORY_METRIC), Some(&1024.0));

        controller.shutdown().await;
        sleep(Duration::from_secs(300)).await;
        assert_eq!(dispatcher.sent(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_never_pushes() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let controller = StatsController::new(&config(false), dispatcher.clone(), fixed());
        controller.start();

        sleep(Duration::from_secs(300)).await;
        assert_eq!(controller.push_now().await, StatsOutcome::Skipped);
        assert_eq!(dispatcher.sent(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_snapshot_is_skipped() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let controller = StatsController::new(
            &config(true),
            dispatcher.clone(),
            Arc::new(FixedStats(BTreeMap::new())),
        );
        assert_eq!(controller.push_now().await, StatsOutcome::Skipped);
        assert_eq!(dispatcher.sent(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_not_retried() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        dispatcher.fail.store(true, Ordering::SeqCst);
        let controller = StatsController::new(&config(true), dispatcher.clone(), fixed());
        controller.start();

        sleep(Duration::from_secs(61)).await;
        assert_eq!(dispatcher.sent(), 1);
        sleep(Duration::from_secs(58)).await;
        assert_eq!(dispatcher.sent(), 1);

        dispatcher.fail.store(false, Ordering::SeqCst);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(dispatcher.sent(), 2);

        controller.shutdown().await;
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_parse_statm() {
        assert_eq!(
            procfs::parse_statm("2000 500 300 10 0 400 0\n", 4096),
            Some((500 * 4096, 2000 * 4096))
        );
        assert_eq!(procfs::parse_statm("", 4096), None);
        assert_eq!(procfs::parse_statm("12 abc", 4096), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_parse_statm_scales_by_page_size() {
        // 64 KiB pages, as on many aarch64 and ppc64le kernels.
        assert_eq!(
            procfs::parse_statm("2000 500 300 10 0 400 0\n", 65536),
            Some((500 * 65536, 2000 * 65536))
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_parse_stat_cpu_handles_odd_command_names() {
        let stat = "4242 (my (weird) app) S 1 4242 4242 0 -1 4194304 120 0 0 0 250 75 0 0 20 0 4 0 100 1000 250";
        assert_eq!(procfs::parse_stat_cpu(stat, 100), Some((2500, 750)));
        assert_eq!(procfs::parse_stat_cpu("4242 (short) S 1", 100), None);
        assert_eq!(procfs::parse_stat_cpu("no parens", 100), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_parse_stat_cpu_uses_tick_rate() {
        let stat = "7 (app) R 1 7 7 0 -1 0 0 0 0 0 250 75 0 0 20 0 1 0 100 1000 250";
        assert_eq!(procfs::parse_stat_cpu(stat, 250), Some((1000, 300)));
        assert_eq!(procfs::parse_stat_cpu(stat, 1000), Some((250, 75)));
        assert_eq!(procfs::parse_stat_cpu(stat, 0), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_filesystem_space_from_blocks() {
        let space = procfs::FilesystemSpace::from_blocks(1000, 300, 250, 4096);
        assert_eq!(space.total, 1000 * 4096);
        assert_eq!(space.free, 250 * 4096);
        assert_eq!(space.used, 700 * 4096);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_process_stats_respect_toggles() {
        let all = ProcessStatsProvider {
            memory: true,
            cpu: true,
            filesystem: true,
        }
        .snapshot();
        assert!(all.contains_key(USED_MEMORY_METRIC));
        assert!(all.contains_key(CPU_USER_METRIC));
        assert!(all.contains_key(TOTAL_SPACE_METRIC));
        assert!(all[TOTAL_SPACE_METRIC] >= all[FREE_SPACE_METRIC]);

        let memory_only = ProcessStatsProvider {
            memory: true,
            cpu: false,
            filesystem: false,
        }
        .snapshot();
        assert!(memory_only.contains_key(TOTAL_MEMORY_METRIC));
        assert!(!memory_only.contains_key(CPU_SYSTEM_METRIC));
        assert!(!memory_only.contains_key(USED_SPACE_METRIC));

        let filesystem_only = ProcessStatsProvider {
            memory: false,
            cpu: false,
            filesystem: true,
        }
        .snapshot();
        assert!(filesystem_only.contains_key(FREE_SPACE_METRIC));
        assert!(filesystem_only.contains_key(USED_SPACE_METRIC));
        assert!(!filesystem_only.contains_key(USED_MEMORY_METRIC));

        let none = ProcessStatsProvider {
            memory: false,
            cpu: false,
            filesystem: false,
        }
        .snapshot();
        assert!(none.is_empty());
    }

    #[test]
    fn test_new_reads_toggles_from_config() {
        let provider = ProcessStatsProvider::new(&Config {
            cpu_stats: false,
            filesystem_stats: false,
            ..Default::default()
        });
        assert!(provider.memory);
        assert!(!provider.cpu);
        assert!(!provider.filesystem);
    }
}
