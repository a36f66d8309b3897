pub mod cpu;
mod error;
pub mod nfs;
pub mod nfsd;
pub mod pressure;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use event::Metric;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use cpu::CpuConfig;
pub use error::{Error, ParseError};
pub use nfsd::NfsdConfig;

use crate::config::default_true;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Collectors {
    pub cpu: Option<CpuConfig>,

    #[serde(default = "default_true")]
    pub nfs: bool,

    pub nfsd: Option<NfsdConfig>,

    #[serde(default = "default_true")]
    pub pressure: bool,
}

impl Default for Collectors {
    fn default() -> Self {
        Self {
            cpu: Some(CpuConfig::default()),
            nfs: true,
            nfsd: Some(NfsdConfig::default()),
            pressure: true,
        }
    }
}

/// parse_u64s converts whitespace-split tokens into integers, and requires
/// at least `min` tokens for self-describing lines.
fn parse_u64s(parts: &[&str], min: usize) -> Result<Vec<u64>, Error> {
    if parts.len() < min {
        return Err(Error::TooFewFields {
            got: parts.len(),
            min,
        });
    }

    parts
        .iter()
        .map(|part| part.parse::<u64>().map_err(Error::from))
        .collect()
}

/// CallTable holds a self-describing per-procedure counter line: the leading
/// value declares how many of the following counters are meaningful.
#[derive(Debug, Default, PartialEq)]
pub struct CallTable {
    fields: u64,
    values: Vec<u64>,
}

impl CallTable {
    /// Decode a call table whose declared count must reach the protocol
    /// minimum. Trailing values beyond the declared count are accepted.
    fn decode(record: &'static str, mut values: Vec<u64>, min: u64) -> Result<CallTable, Error> {
        let declared = values[0];
        if declared < min || ((values.len() - 1) as u64) < declared {
            return Err(Error::Decode { record, values });
        }

        let values = values.split_off(1);
        Ok(CallTable {
            fields: declared,
            values,
        })
    }

    /// Decode a call table whose declared count must match `want` exactly.
    fn decode_exact(
        record: &'static str,
        mut values: Vec<u64>,
        want: u64,
    ) -> Result<CallTable, Error> {
        let declared = values[0];
        if declared != want || ((values.len() - 1) as u64) < declared {
            return Err(Error::Decode { record, values });
        }

        let values = values.split_off(1);
        Ok(CallTable {
            fields: declared,
            values,
        })
    }

    /// Iterate `(procedure, count)` pairs in kernel order. At most the
    /// declared count is exposed, clamped to the known schema size.
    pub fn procedures(
        &self,
        names: &'static [&'static str],
    ) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        let known = (self.fields as usize).min(names.len());

        names[..known]
            .iter()
            .copied()
            .zip(self.values.iter().copied())
    }
}

pub struct Agent {
    proc_path: Arc<PathBuf>,

    cpu: Option<Arc<cpu::Cpu>>,
    nfs: bool,
    nfsd: Option<Arc<NfsdConfig>>,
    pressure: bool,
}

impl Agent {
    pub fn new(proc_path: impl Into<PathBuf>, collectors: &Collectors) -> Self {
        Self {
            proc_path: Arc::new(proc_path.into()),
            cpu: collectors
                .cpu
                .clone()
                .map(|conf| Arc::new(cpu::Cpu::new(conf))),
            nfs: collectors.nfs,
            nfsd: collectors.nfsd.clone().map(Arc::new),
            pressure: collectors.pressure,
        }
    }

    /// Run one collection cycle, every enabled group concurrently, and stamp
    /// all gathered metrics with a single timestamp. A group that cannot
    /// read its source contributes nothing; the cycle never fails.
    pub async fn gather(&self) -> Vec<Metric> {
        let mut tasks = Vec::with_capacity(4);

        if let Some(ref conf) = self.cpu {
            let conf = conf.clone();
            let proc_path = self.proc_path.clone();

            tasks.push(tokio::spawn(async move {
                ("cpu", conf.gather(proc_path.as_ref()).await)
            }));
        }

        if self.nfs {
            let proc_path = self.proc_path.clone();

            tasks.push(tokio::spawn(async move {
                ("nfs", nfs::gather(proc_path.as_ref()).await)
            }));
        }

        if let Some(ref conf) = self.nfsd {
            let conf = conf.clone();
            let proc_path = self.proc_path.clone();

            tasks.push(tokio::spawn(async move {
                ("nfsd", nfsd::gather(conf.as_ref(), proc_path.as_ref()).await)
            }));
        }

        if self.pressure {
            let proc_path = self.proc_path.clone();

            tasks.push(tokio::spawn(async move {
                ("pressure", pressure::gather(proc_path.as_ref()).await)
            }));
        }

        let mut metrics = Vec::new();
        for task in futures::future::join_all(tasks).await {
            let Ok((collector, result)) = task else {
                continue;
            };

            match result {
                Ok(partial) => metrics.extend(partial),
                Err(err) if err.is_not_found() || matches!(err, Error::NoData) => {
                    debug!(message = "no data for this cycle", collector);
                }
                Err(err) => {
                    warn!(message = "collect failed", collector, %err);
                }
            }
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let now = now.as_millis() as i64;
        for metric in &mut metrics {
            metric.timestamp = now;
        }

        metrics
    }
}
