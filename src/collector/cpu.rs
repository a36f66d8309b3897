use std::path::Path;

use event::{Metric, tags};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Error;
use crate::config::default_true;

// Kernel counters in /proc/stat are expressed in USER_HZ ticks.
const USER_HZ: f64 = 100.0;

// An idle counter falling by at least this much means the counters were
// reset, not that a sample raced a wrapping field.
const JUMP_BACK_SECONDS: f64 = 3.0;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CpuConfig {
    /// Report guest counters too. They are already included in the user
    /// and nice counters.
    #[serde(default = "default_true")]
    pub guest: bool,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self { guest: true }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct CpuStat {
    user: f64,
    nice: f64,
    system: f64,
    idle: f64,
    iowait: f64,
    irq: f64,
    softirq: f64,
    steal: f64,
    guest: f64,
    guest_nice: f64,
}

/// Parse the per-cpu lines of /proc/stat, converting ticks to seconds. The
/// aggregate "cpu" line is skipped. Fields a kernel does not know yet stay
/// zero.
fn load_cpu_stats<P: AsRef<Path>>(path: P) -> Result<Vec<CpuStat>, Error> {
    let content = std::fs::read_to_string(path)?;
    let mut stats = Vec::new();

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let Some(label) = parts.next() else {
            continue;
        };

        if !label.starts_with("cpu") || label == "cpu" {
            continue;
        }

        let mut stat = CpuStat::default();
        for (index, part) in parts.enumerate() {
            let value = part.parse::<f64>()? / USER_HZ;

            match index {
                0 => stat.user = value,
                1 => stat.nice = value,
                2 => stat.system = value,
                3 => stat.idle = value,
                4 => stat.iowait = value,
                5 => stat.irq = value,
                6 => stat.softirq = value,
                7 => stat.steal = value,
                8 => stat.guest = value,
                9 => stat.guest_nice = value,
                _ => break,
            }
        }

        stats.push(stat);
    }

    Ok(stats)
}

fn merge_counter(old: &mut f64, new: f64, cpu: usize, field: &'static str) {
    if new >= *old {
        *old = new;
    } else {
        debug!(
            message = "cpu counter went backwards, keeping previous value",
            cpu,
            field,
            old = *old,
            new,
        );
    }
}

pub struct Cpu {
    guest: bool,

    // Counters last reported per cpu. Online/offline cycles reset the
    // kernel counters, this cache keeps the exposed values monotonic.
    stats: Mutex<Vec<CpuStat>>,
}

impl Cpu {
    pub fn new(conf: CpuConfig) -> Self {
        Self {
            guest: conf.guest,
            stats: Mutex::new(Vec::new()),
        }
    }

    pub async fn gather(&self, proc_path: &Path) -> Result<Vec<Metric>, Error> {
        let stats = load_cpu_stats(proc_path.join("stat"))?;

        let mut metrics = Vec::with_capacity(stats.len() * 10);
        let mut cached = self.stats.lock();
        self.update(&mut cached, stats);

        for (index, stat) in cached.iter().enumerate() {
            let cpu = index.to_string();

            for (mode, value) in [
                ("user", stat.user),
                ("nice", stat.nice),
                ("system", stat.system),
                ("idle", stat.idle),
                ("iowait", stat.iowait),
                ("irq", stat.irq),
                ("softirq", stat.softirq),
                ("steal", stat.steal),
            ] {
                metrics.push(Metric::sum_with_tags(
                    "node_cpu_seconds_total",
                    "Seconds the CPUs spent in each mode.",
                    value,
                    tags!(
                        "cpu" => cpu,
                        "mode" => mode,
                    ),
                ));
            }

            if self.guest {
                metrics.push(Metric::sum_with_tags(
                    "node_cpu_guest_seconds_total",
                    "Seconds the CPUs spent in guests (VMs) for each mode.",
                    stat.guest,
                    tags!(
                        "cpu" => cpu,
                        "mode" => "user",
                    ),
                ));
                metrics.push(Metric::sum_with_tags(
                    "node_cpu_guest_seconds_total",
                    "Seconds the CPUs spent in guests (VMs) for each mode.",
                    stat.guest_nice,
                    tags!(
                        "cpu" => cpu,
                        "mode" => "nice",
                    ),
                ));
            }
        }

        Ok(metrics)
    }

    fn update(&self, cached: &mut Vec<CpuStat>, stats: Vec<CpuStat>) {
        // hotplug changed the topology, start over
        if cached.len() != stats.len() {
            *cached = vec![CpuStat::default(); stats.len()];
        }

        for (index, new) in stats.into_iter().enumerate() {
            let old = &mut cached[index];

            // an offline/online cycle resets the kernel counters
            if old.idle - new.idle >= JUMP_BACK_SECONDS {
                debug!(
                    message = "cpu counters jumped backwards, resetting",
                    cpu = index,
                    old = old.idle,
                    new = new.idle,
                );
                *old = CpuStat::default();
            }

            merge_counter(&mut old.user, new.user, index, "user");
            merge_counter(&mut old.nice, new.nice, index, "nice");
            merge_counter(&mut old.system, new.system, index, "system");
            merge_counter(&mut old.idle, new.idle, index, "idle");
            merge_counter(&mut old.iowait, new.iowait, index, "iowait");
            merge_counter(&mut old.irq, new.irq, index, "irq");
            merge_counter(&mut old.softirq, new.softirq, index, "softirq");
            merge_counter(&mut old.steal, new.steal, index, "steal");

            if self.guest {
                merge_counter(&mut old.guest, new.guest, index, "guest");
                merge_counter(&mut old.guest_nice, new.guest_nice, index, "guest_nice");
            }
        }
    }
}
