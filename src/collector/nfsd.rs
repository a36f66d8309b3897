use std::path::Path;

use event::{Metric, tags};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::nfs::{V2_PROCEDURES, V3_PROCEDURES};
use super::{CallTable, Error, parse_u64s};
use crate::config::default_true;

// Procedure labels for the NFSv4 server call table.
pub static V4_SERVER_PROCEDURES: [&str; 2] = ["Null", "Compound"];

// Operation labels for the NFSv4 server operations table, indexed by
// operation number. Numbering starts at 3, so the head of the table is
// padding.
pub static V4_OPERATIONS: [&str; 76] = [
    "Unused0",
    "Unused1",
    "Unused2",
    "Access",
    "Close",
    "Commit",
    "Create",
    "DelegPurge",
    "DelegReturn",
    "GetAttr",
    "GetFH",
    "Link",
    "Lock",
    "LockT",
    "LockU",
    "Lookup",
    "LookupP",
    "Nverify",
    "Open",
    "OpenAttr",
    "OpenConfirm",
    "OpenDowngrade",
    "PutFH",
    "PutPubFH",
    "PutRootFH",
    "Read",
    "ReadDir",
    "ReadLink",
    "Remove",
    "Rename",
    "Renew",
    "RestoreFH",
    "SaveFH",
    "SecInfo",
    "SetAttr",
    "SetClientId",
    "SetClientIdConfirm",
    "Verify",
    "Write",
    "ReleaseLockOwner",
    "BackChannelCtl",
    "BindConnToSession",
    "ExchangeId",
    "CreateSession",
    "DestroySession",
    "FreeStateId",
    "GetDirDelegation",
    "GetDeviceInfo",
    "GetDeviceList",
    "LayoutCommit",
    "LayoutGet",
    "LayoutReturn",
    "SecInfoNoName",
    "Sequence",
    "SetSSV",
    "TestStateId",
    "WantDelegation",
    "DestroyClientId",
    "ReclaimComplete",
    "Allocate",
    "Copy",
    "CopyNotify",
    "DeAllocate",
    "IoAdvise",
    "LayoutError",
    "LayoutStats",
    "OffloadCancel",
    "OffloadStatus",
    "ReadPlus",
    "Seek",
    "WriteSame",
    "Clone",
    "GetXattr",
    "SetXattr",
    "ListXattrs",
    "RemoveXattr",
];

static POOL_STATUS: [&str; 4] = ["arrived", "enqueued", "woken", "timedout"];

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NfsdConfig {
    #[serde(default = "default_true")]
    pub v2: bool,

    #[serde(default = "default_true")]
    pub v3: bool,

    #[serde(default = "default_true")]
    pub v4: bool,

    #[serde(default = "default_true")]
    pub v4_ops: bool,

    /// Collect per-pool thread counters from fs/nfsd/pool_stats.
    #[serde(default = "default_true")]
    pub thread_pool: bool,
}

impl Default for NfsdConfig {
    fn default() -> Self {
        Self {
            v2: true,
            v3: true,
            v4: true,
            v4_ops: true,
            thread_pool: true,
        }
    }
}

// ReplyCache models the "rc" line.
#[derive(Debug, Default, PartialEq)]
pub struct ReplyCache {
    pub hits: u64,
    pub misses: u64,
    pub no_cache: u64,
}

impl TryFrom<Vec<u64>> for ReplyCache {
    type Error = Error;

    fn try_from(v: Vec<u64>) -> Result<Self, Self::Error> {
        if v.len() != 3 {
            return Err(format!("invalid ReplyCache line {v:?}").into());
        }

        Ok(Self {
            hits: v[0],
            misses: v[1],
            no_cache: v[2],
        })
    }
}

// FileHandles models the "fh" line. Only "stale" is still maintained by the
// kernel, the remaining counters are hardwired to zero.
#[derive(Debug, Default, PartialEq)]
pub struct FileHandles {
    pub stale: u64,
    pub total_lookups: u64,
    pub anon_lookups: u64,
    pub dir_no_cache: u64,
    pub no_dir_no_cache: u64,
}

// InputOutput models the "io" line.
#[derive(Debug, Default, PartialEq)]
pub struct InputOutput {
    pub read: u64,
    pub write: u64,
}

impl TryFrom<Vec<u64>> for InputOutput {
    type Error = Error;

    fn try_from(v: Vec<u64>) -> Result<Self, Self::Error> {
        if v.len() != 2 {
            return Err(format!("invalid InputOutput line {v:?}").into());
        }

        Ok(Self {
            read: v[0],
            write: v[1],
        })
    }
}

// Threads models the "th" line. The ten utilization histogram buckets of
// old kernels were dropped, and full_cnt no longer counts.
#[derive(Debug, Default, PartialEq)]
pub struct Threads {
    pub threads: u64,
    pub full_cnt: u64,
}

// Network models the "net" line.
#[derive(Debug, Default, PartialEq)]
pub struct Network {
    pub net_count: u64,
    pub udp_count: u64,
    pub tcp_count: u64,
    pub tcp_connect: u64,
}

impl TryFrom<Vec<u64>> for Network {
    type Error = Error;

    fn try_from(v: Vec<u64>) -> Result<Self, Self::Error> {
        if v.len() != 4 {
            return Err(format!("invalid Network line {v:?}").into());
        }

        Ok(Self {
            net_count: v[0],
            udp_count: v[1],
            tcp_count: v[2],
            tcp_connect: v[3],
        })
    }
}

// ServerRPC models the "rpc" line.
#[derive(Debug, Default, PartialEq)]
pub struct ServerRPC {
    pub rpc_count: u64,
    pub bad_cnt: u64,
    pub bad_fmt: u64,
    pub bad_auth: u64,
    pub bad_clnt: u64,
}

impl TryFrom<Vec<u64>> for ServerRPC {
    type Error = Error;

    fn try_from(v: Vec<u64>) -> Result<Self, Self::Error> {
        if v.len() != 5 {
            return Err(format!("invalid ServerRPC line {v:?}").into());
        }

        Ok(Self {
            rpc_count: v[0],
            bad_cnt: v[1],
            bad_fmt: v[2],
            bad_auth: v[3],
            bad_clnt: v[4],
        })
    }
}

/// V4Ops models the "proc4ops" line. Unlike the procedure tables its
/// counters are indexed by NFSv4 operation number.
#[derive(Debug, Default, PartialEq)]
pub struct V4Ops {
    fields: u64,
    values: Vec<u64>,
}

impl V4Ops {
    fn decode(mut values: Vec<u64>) -> Result<Self, Error> {
        let declared = values[0];
        if declared < 40 || ((values.len() - 1) as u64) < declared {
            return Err(Error::Decode {
                record: "proc4ops",
                values,
            });
        }

        let values = values.split_off(1);
        Ok(Self {
            fields: declared,
            values,
        })
    }

    /// Iterate `(operation, count)` pairs, skipping the two padding slots
    /// at the head of the table.
    pub fn operations(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        let known = (self.fields as usize).min(V4_OPERATIONS.len());

        V4_OPERATIONS
            .get(2..known)
            .unwrap_or(&[])
            .iter()
            .copied()
            .zip(self.values.get(2..).unwrap_or(&[]).iter().copied())
    }
}

/// ServerRPCStats models all stats from /proc/net/rpc/nfsd.
#[derive(Debug, Default, PartialEq)]
pub struct ServerRPCStats {
    pub reply_cache: ReplyCache,
    pub file_handles: FileHandles,
    pub input_output: InputOutput,
    pub threads: Threads,
    pub network: Network,
    pub server_rpc: ServerRPC,
    pub v2_stats: CallTable,
    pub v3_stats: CallTable,
    pub server_v4_stats: CallTable,
    pub v4_ops: V4Ops,
}

fn load_server_rpc_stats<P: AsRef<Path>>(path: P) -> Result<ServerRPCStats, Error> {
    let content = std::fs::read_to_string(path)?;
    let mut stats = ServerRPCStats::default();

    for line in content.lines() {
        let parts = line.split_whitespace().collect::<Vec<_>>();
        if parts.len() < 2 {
            return Err(format!("invalid NFSd metric line {line:?}").into());
        }

        match parts[0] {
            "rc" => stats.reply_cache = parse_u64s(&parts[1..], 0)?.try_into()?,
            // only the first value is a live counter, the tail is a relic
            // and not necessarily numeric
            "fh" => {
                if parts.len() < 3 {
                    return Err(format!("invalid NFSd fh line {line:?}").into());
                }

                stats.file_handles = FileHandles {
                    stale: parts[1].parse()?,
                    ..Default::default()
                };
            }
            "io" => stats.input_output = parse_u64s(&parts[1..], 0)?.try_into()?,
            "th" => {
                if parts.len() < 3 {
                    return Err(format!("invalid NFSd th line {line:?}").into());
                }

                stats.threads = Threads {
                    threads: parts[1].parse()?,
                    full_cnt: 0,
                };
            }
            // the readahead cache is gone from modern kernels
            "ra" => continue,
            "net" => stats.network = parse_u64s(&parts[1..], 0)?.try_into()?,
            "rpc" => stats.server_rpc = parse_u64s(&parts[1..], 0)?.try_into()?,
            "proc2" => {
                let values = parse_u64s(&parts[1..], 0)?;
                stats.v2_stats = CallTable::decode("proc2", values, 18)?;
            }
            "proc3" => {
                let values = parse_u64s(&parts[1..], 0)?;
                stats.v3_stats = CallTable::decode("proc3", values, 22)?;
            }
            // the server only has Null and Compound
            "proc4" => {
                let values = parse_u64s(&parts[1..], 0)?;
                stats.server_v4_stats = CallTable::decode_exact("proc4", values, 2)?;
            }
            "proc4ops" => {
                let values = parse_u64s(&parts[1..], 77)?;
                stats.v4_ops = V4Ops::decode(values)?;
            }
            label => return Err(Error::UnknownLabel(label.to_string())),
        }
    }

    Ok(stats)
}

fn collect_pool_stats(content: &str, metrics: &mut Vec<Metric>) {
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts = line.split_whitespace().collect::<Vec<_>>();
        if parts.len() != 5 {
            warn!(message = "invalid line in pool_stats, ignored", line);
            continue;
        }

        let pool = parts[0];
        for (status, part) in POOL_STATUS.iter().copied().zip(parts[1..].iter().copied()) {
            let value = match part.parse::<u64>() {
                Ok(value) => value,
                Err(err) => {
                    warn!(message = "invalid value in pool_stats, ignored", pool, status, %err);
                    continue;
                }
            };

            metrics.push(Metric::sum_with_tags(
                "node_nfsd_thread_status_total",
                "Total number of NFSd thread pool events by pool and status.",
                value,
                tags!(
                    "pool" => pool,
                    "status" => status,
                ),
            ));
        }
    }
}

pub async fn gather(conf: &NfsdConfig, proc_path: &Path) -> Result<Vec<Metric>, Error> {
    let stats = load_server_rpc_stats(proc_path.join("net/rpc/nfsd"))?;

    let mut metrics = vec![
        Metric::sum(
            "node_nfsd_reply_cache_hits_total",
            "Total number of NFSd Reply Cache hits (client lost server response).",
            stats.reply_cache.hits,
        ),
        Metric::sum(
            "node_nfsd_reply_cache_misses_total",
            "Total number of NFSd Reply Cache an operation that requires caching (idempotent).",
            stats.reply_cache.misses,
        ),
        Metric::sum(
            "node_nfsd_reply_cache_nocache_total",
            "Total number of NFSd Reply Cache non-idempotent operations (rename/delete/...).",
            stats.reply_cache.no_cache,
        ),
        Metric::sum(
            "node_nfsd_file_handles_stale_total",
            "Total number of NFSd stale file handles.",
            stats.file_handles.stale,
        ),
        Metric::sum(
            "node_nfsd_disk_bytes_read_total",
            "Total NFSd bytes read.",
            stats.input_output.read,
        ),
        Metric::sum(
            "node_nfsd_disk_bytes_written_total",
            "Total NFSd bytes written.",
            stats.input_output.write,
        ),
        Metric::gauge(
            "node_nfsd_server_threads",
            "Total number of NFSd kernel threads that are running.",
            stats.threads.threads,
        ),
        Metric::sum_with_tags(
            "node_nfsd_packets_total",
            "Total NFSd network packets (sent+received) by protocol type.",
            stats.network.udp_count,
            tags!("proto" => "udp"),
        ),
        Metric::sum_with_tags(
            "node_nfsd_packets_total",
            "Total NFSd network packets (sent+received) by protocol type.",
            stats.network.tcp_count,
            tags!("proto" => "tcp"),
        ),
        Metric::sum(
            "node_nfsd_connections_total",
            "Total number of NFSd TCP connections.",
            stats.network.tcp_connect,
        ),
        Metric::sum_with_tags(
            "node_nfsd_rpc_errors_total",
            "Total number of NFSd RPC errors by error type.",
            stats.server_rpc.bad_fmt,
            tags!("error" => "fmt"),
        ),
        Metric::sum_with_tags(
            "node_nfsd_rpc_errors_total",
            "Total number of NFSd RPC errors by error type.",
            stats.server_rpc.bad_auth,
            tags!("error" => "auth"),
        ),
        Metric::sum_with_tags(
            "node_nfsd_rpc_errors_total",
            "Total number of NFSd RPC errors by error type.",
            stats.server_rpc.bad_clnt,
            tags!("error" => "client"),
        ),
        Metric::sum(
            "node_nfsd_server_rpcs_total",
            "Total number of NFSd RPCs.",
            stats.server_rpc.rpc_count,
        ),
    ];

    if conf.v2 {
        for (method, count) in stats.v2_stats.procedures(&V2_PROCEDURES) {
            metrics.push(Metric::sum_with_tags(
                "node_nfsd_requests_total",
                "Total number NFSd Requests by method and protocol.",
                count,
                tags!(
                    "proto" => "2",
                    "method" => method,
                ),
            ));
        }
    }

    if conf.v3 {
        for (method, count) in stats.v3_stats.procedures(&V3_PROCEDURES) {
            metrics.push(Metric::sum_with_tags(
                "node_nfsd_requests_total",
                "Total number NFSd Requests by method and protocol.",
                count,
                tags!(
                    "proto" => "3",
                    "method" => method,
                ),
            ));
        }
    }

    if conf.v4 {
        for (method, count) in stats.server_v4_stats.procedures(&V4_SERVER_PROCEDURES) {
            metrics.push(Metric::sum_with_tags(
                "node_nfsd_requests_total",
                "Total number NFSd Requests by method and protocol.",
                count,
                tags!(
                    "proto" => "4",
                    "method" => method,
                ),
            ));
        }
    }

    if conf.v4_ops {
        for (method, count) in stats.v4_ops.operations() {
            metrics.push(Metric::sum_with_tags(
                "node_nfsd_v4_operations_total",
                "Total number of NFSd v4 operations.",
                count,
                tags!("method" => method),
            ));
        }
    }

    if conf.thread_pool {
        match std::fs::read_to_string(proc_path.join("fs/nfsd/pool_stats")) {
            Ok(content) => collect_pool_stats(&content, &mut metrics),
            Err(err) => debug!(message = "read nfsd thread pool stats failed", %err),
        }
    }

    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use testify::temp_file;

    use super::*;

    #[test]
    fn parse_server_rpc_stats() {
        let tests = [
            (
                // name
                "reply cache",
                // content
                "rc 10 2 1\n",
                // valid
                true,
                ServerRPCStats {
                    reply_cache: ReplyCache {
                        hits: 10,
                        misses: 2,
                        no_cache: 1,
                    },
                    ..Default::default()
                },
            ),
            (
                "threads",
                "th 8 0\n",
                true,
                ServerRPCStats {
                    threads: Threads {
                        threads: 8,
                        full_cnt: 0,
                    },
                    ..Default::default()
                },
            ),
            (
                "threads with histogram",
                "th 8 0 0.000 0.000 0.000 0.000 0.000 0.000 0.000 0.000 0.000 0.000\n",
                true,
                ServerRPCStats {
                    threads: Threads {
                        threads: 8,
                        full_cnt: 0,
                    },
                    ..Default::default()
                },
            ),
            (
                "threads too short",
                "th 8\n",
                false,
                ServerRPCStats::default(),
            ),
            (
                "file handles",
                "fh 145 0 0 0 0\n",
                true,
                ServerRPCStats {
                    file_handles: FileHandles {
                        stale: 145,
                        ..Default::default()
                    },
                    ..Default::default()
                },
            ),
            (
                "file handles ignore legacy fields",
                "fh 145 a b c d\n",
                true,
                ServerRPCStats {
                    file_handles: FileHandles {
                        stale: 145,
                        ..Default::default()
                    },
                    ..Default::default()
                },
            ),
            (
                "input output",
                "io 9 5\n",
                true,
                ServerRPCStats {
                    input_output: InputOutput { read: 9, write: 5 },
                    ..Default::default()
                },
            ),
            (
                "input output with extra field",
                "io 9 5 1\n",
                false,
                ServerRPCStats::default(),
            ),
            (
                "network",
                "net 18628 6 18618 6\n",
                true,
                ServerRPCStats {
                    network: Network {
                        net_count: 18628,
                        udp_count: 6,
                        tcp_count: 18618,
                        tcp_connect: 6,
                    },
                    ..Default::default()
                },
            ),
            (
                "server rpc",
                "rpc 18628 1 2 3 4\n",
                true,
                ServerRPCStats {
                    server_rpc: ServerRPC {
                        rpc_count: 18628,
                        bad_cnt: 1,
                        bad_fmt: 2,
                        bad_auth: 3,
                        bad_clnt: 4,
                    },
                    ..Default::default()
                },
            ),
            (
                "readahead skipped",
                "ra 32 0 0 0 0 0 0 0 0 0 0 0\nrc 1 2 3\n",
                true,
                ServerRPCStats {
                    reply_cache: ReplyCache {
                        hits: 1,
                        misses: 2,
                        no_cache: 3,
                    },
                    ..Default::default()
                },
            ),
            (
                "server procedures",
                "proc4 2 49 394\n",
                true,
                ServerRPCStats {
                    server_v4_stats: CallTable {
                        fields: 2,
                        values: vec![49, 394],
                    },
                    ..Default::default()
                },
            ),
            (
                "server procedures wrong count",
                "proc4 3 49 394 0\n",
                false,
                ServerRPCStats::default(),
            ),
            (
                "unknown label",
                "wdeleg_getattr 16\n",
                false,
                ServerRPCStats::default(),
            ),
            ("short line", "th\n", false, ServerRPCStats::default()),
        ];

        for (name, content, valid, wanted) in tests {
            let path = temp_file();
            std::fs::write(&path, content).unwrap();

            match load_server_rpc_stats(&path) {
                Ok(stats) => {
                    assert!(valid, "case {name}");
                    assert_eq!(stats, wanted, "case {name}");
                }
                Err(err) => assert!(!valid, "case {name}: {err}"),
            }
        }
    }

    fn proc4ops_line(declared: u64) -> String {
        let mut line = format!("proc4ops {declared}");
        for value in 1..=76u64 {
            line.push_str(&format!(" {value}"));
        }
        line.push('\n');
        line
    }

    #[test]
    fn parse_v4_operations() {
        let path = temp_file();
        std::fs::write(&path, proc4ops_line(76)).unwrap();

        let stats = load_server_rpc_stats(&path).unwrap();
        let ops = stats.v4_ops.operations().collect::<Vec<_>>();
        assert_eq!(ops.len(), 74);
        assert_eq!(ops[0], ("Unused2", 3));
        assert_eq!(ops[1], ("Access", 4));
        assert_eq!(ops[73], ("RemoveXattr", 76));
    }

    #[test]
    fn parse_v4_operations_clamped() {
        let path = temp_file();
        std::fs::write(&path, proc4ops_line(40)).unwrap();

        let stats = load_server_rpc_stats(&path).unwrap();
        let ops = stats.v4_ops.operations().collect::<Vec<_>>();
        assert_eq!(ops.len(), 38);
        assert_eq!(ops[0], ("Unused2", 3));
        assert_eq!(ops[37], ("ReleaseLockOwner", 40));
    }

    #[test]
    fn parse_v4_operations_declared_too_low() {
        let path = temp_file();
        std::fs::write(&path, proc4ops_line(39)).unwrap();

        let err = load_server_rpc_stats(&path).unwrap_err();
        assert!(matches!(
            err,
            Error::Decode {
                record: "proc4ops",
                ..
            }
        ));
    }

    #[test]
    fn pool_stats() {
        let content = "# pool packets-arrived sockets-enqueued threads-woken threads-timedout
0 638071 375330 638053 30
1 2 3
2 1 bad 3 4
";

        let mut metrics = Vec::new();
        collect_pool_stats(content, &mut metrics);

        // four counters from pool 0, three from pool 2 with the bad field
        // dropped, nothing from the short line
        assert_eq!(metrics.len(), 7);

        let found = metrics
            .iter()
            .find(|m| {
                m.tags.get("pool").map(String::as_str) == Some("0")
                    && m.tags.get("status").map(String::as_str) == Some("arrived")
            })
            .unwrap();
        assert_eq!(found.value, event::MetricValue::Sum(638071.0));

        assert!(!metrics.iter().any(|m| {
            m.tags.get("pool").map(String::as_str) == Some("2")
                && m.tags.get("status").map(String::as_str) == Some("enqueued")
        }));
    }

    #[tokio::test]
    async fn gather_metrics() {
        let dir = testify::temp_dir();
        std::fs::create_dir_all(dir.join("net/rpc")).unwrap();
        std::fs::create_dir_all(dir.join("fs/nfsd")).unwrap();

        let mut content = String::from(
            "rc 0 62622884 0
fh 0 0 0 0 0
io 2419795243 12362294747
th 8 0
ra 32 0 0 0 0 0 0 0 0 0 0 0
net 18628 6 18618 6
rpc 18628 0 0 0 0
proc2 18 2 69 0 0 4410 0 0 0 0 0 0 0 0 0 0 0 99 2
proc3 22 2 112 0 2719 111 0 0 0 0 0 0 0 0 0 0 0 27 216 0 2 1 0
proc4 2 2 10853
",
        );
        content.push_str(&proc4ops_line(76));
        std::fs::write(dir.join("net/rpc/nfsd"), content).unwrap();
        std::fs::write(
            dir.join("fs/nfsd/pool_stats"),
            "# pool packets-arrived sockets-enqueued threads-woken threads-timedout\n0 638071 375330 638053 30\n",
        )
        .unwrap();

        let conf = NfsdConfig::default();
        let metrics = gather(&conf, &dir).await.unwrap();

        // 14 scalar metrics, 18 + 22 + 2 procedures, 74 v4 operations and
        // one pool with 4 counters
        assert_eq!(metrics.len(), 14 + 18 + 22 + 2 + 74 + 4);

        let found = metrics
            .iter()
            .find(|m| m.name == "node_nfsd_server_threads")
            .unwrap();
        assert_eq!(found.value, event::MetricValue::Gauge(8.0));

        let found = metrics
            .iter()
            .find(|m| {
                m.name == "node_nfsd_requests_total"
                    && m.tags.get("proto").map(String::as_str) == Some("4")
                    && m.tags.get("method").map(String::as_str) == Some("Compound")
            })
            .unwrap();
        assert_eq!(found.value, event::MetricValue::Sum(10853.0));
    }

    #[tokio::test]
    async fn gather_respects_config() {
        let dir = testify::temp_dir();
        std::fs::create_dir_all(dir.join("net/rpc")).unwrap();

        let mut content = String::from("rc 0 62622884 0\nproc2 18 2 69 0 0 4410 0 0 0 0 0 0 0 0 0 0 0 99 2\n");
        content.push_str(&proc4ops_line(76));
        std::fs::write(dir.join("net/rpc/nfsd"), content).unwrap();

        let conf = NfsdConfig {
            v2: false,
            v4_ops: false,
            thread_pool: false,
            ..Default::default()
        };
        let metrics = gather(&conf, &dir).await.unwrap();

        assert!(!metrics.iter().any(|m| m.name == "node_nfsd_requests_total"));
        assert!(
            !metrics
                .iter()
                .any(|m| m.name == "node_nfsd_v4_operations_total")
        );
        assert!(
            !metrics
                .iter()
                .any(|m| m.name == "node_nfsd_thread_status_total")
        );
    }
}
