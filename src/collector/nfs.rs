use std::path::Path;

use event::{Metric, tags};

use super::{CallTable, Error, parse_u64s};

// Procedure labels for the NFSv2 call table, in kernel slot order.
pub static V2_PROCEDURES: [&str; 18] = [
    "Null", "GetAttr", "SetAttr", "Root", "Lookup", "ReadLink", "Read", "WrCache", "Write",
    "Create", "Remove", "Rename", "Link", "SymLink", "MkDir", "RmDir", "ReadDir", "FsStat",
];

// Procedure labels for the NFSv3 call table, in kernel slot order.
pub static V3_PROCEDURES: [&str; 22] = [
    "Null",
    "GetAttr",
    "SetAttr",
    "Lookup",
    "Access",
    "ReadLink",
    "Read",
    "Write",
    "Create",
    "MkDir",
    "SymLink",
    "MkNod",
    "Remove",
    "RmDir",
    "Rename",
    "Link",
    "ReadDir",
    "ReadDirPlus",
    "FsStat",
    "FsInfo",
    "PathConf",
    "Commit",
];

// Procedure labels for the NFSv4 client call table, in kernel slot order.
// The table grew with kernel releases, so slots past the declared count of
// an older kernel simply never show up.
pub static V4_PROCEDURES: [&str; 69] = [
    "Null",
    "Read",
    "Write",
    "Commit",
    "Open",
    "OpenConfirm",
    "OpenNoAttr",
    "OpenDowngrade",
    "Close",
    "SetAttr",
    "FsInfo",
    "Renew",
    "SetClientId",
    "SetClientIdConfirm",
    "Lock",
    "LockT",
    "LockU",
    "Access",
    "GetAttr",
    "Lookup",
    "LookupRoot",
    "Remove",
    "Rename",
    "Link",
    "Symlink",
    "Create",
    "Pathconf",
    "StatFs",
    "ReadLink",
    "ReadDir",
    "ServerCaps",
    "DelegReturn",
    "GetACL",
    "SetACL",
    "FsLocations",
    "ReleaseLockOwner",
    "SecInfo",
    "FsIdPresent",
    "ExchangeId",
    "CreateSession",
    "DestroySession",
    "Sequence",
    "GetLeaseTime",
    "ReclaimComplete",
    "LayoutGet",
    "GetDeviceInfo",
    "LayoutCommit",
    "LayoutReturn",
    "SecInfoNoName",
    "TestStateId",
    "FreeStateId",
    "GetDeviceList",
    "BindConnToSession",
    "DestroyClientId",
    "Seek",
    "Allocate",
    "DeAllocate",
    "LayoutStats",
    "Clone",
    "Copy",
    "OffloadCancel",
    "LookupP",
    "LayoutError",
    "CopyNotify",
    "GetXattr",
    "SetXattr",
    "ListXattrs",
    "RemoveXattr",
    "ReadPlus",
];

// ClientRPC models the "rpc" line.
#[derive(Debug, Default, PartialEq)]
pub struct ClientRPC {
    pub rpc_count: u64,
    pub retransmissions: u64,
    pub auth_refreshes: u64,
}

impl TryFrom<Vec<u64>> for ClientRPC {
    type Error = Error;

    fn try_from(v: Vec<u64>) -> Result<Self, Self::Error> {
        if v.len() != 3 {
            return Err(format!("invalid RPC line {v:?}").into());
        }

        Ok(Self {
            rpc_count: v[0],
            retransmissions: v[1],
            auth_refreshes: v[2],
        })
    }
}

/// ClientRPCStats models all stats from /proc/net/rpc/nfs.
#[derive(Debug, Default, PartialEq)]
pub struct ClientRPCStats {
    pub client_rpc: ClientRPC,
    pub v2_stats: CallTable,
    pub v3_stats: CallTable,
    pub client_v4_stats: CallTable,
}

fn load_client_rpc_stats<P: AsRef<Path>>(path: P) -> Result<ClientRPCStats, Error> {
    let content = std::fs::read_to_string(path)?;
    let mut stats = ClientRPCStats::default();

    for line in content.lines() {
        let parts = line.split_whitespace().collect::<Vec<_>>();
        if parts.len() < 2 {
            return Err(format!("invalid NFS metric line {line:?}").into());
        }

        match parts[0] {
            // interface-level packet counters, not collected
            "net" => continue,
            "rpc" => stats.client_rpc = parse_u64s(&parts[1..], 0)?.try_into()?,
            "proc2" => {
                let values = parse_u64s(&parts[1..], 0)?;
                stats.v2_stats = CallTable::decode("proc2", values, 18)?;
            }
            "proc3" => {
                let values = parse_u64s(&parts[1..], 0)?;
                stats.v3_stats = CallTable::decode("proc3", values, 22)?;
            }
            "proc4" => {
                // modern kernels emit all 69 slots no matter what they
                // declare, older ones declared as few as 38
                let values = parse_u64s(&parts[1..], 70)?;
                stats.client_v4_stats = CallTable::decode("proc4", values, 38)?;
            }
            label => return Err(Error::UnknownLabel(label.to_string())),
        }
    }

    Ok(stats)
}

pub async fn gather(proc_path: &Path) -> Result<Vec<Metric>, Error> {
    let stats = load_client_rpc_stats(proc_path.join("net/rpc/nfs"))?;

    let mut metrics = vec![
        Metric::sum(
            "node_nfs_rpcs_total",
            "Total number of RPCs performed.",
            stats.client_rpc.rpc_count,
        ),
        Metric::sum(
            "node_nfs_rpc_retransmissions_total",
            "Number of RPC transmissions performed.",
            stats.client_rpc.retransmissions,
        ),
        Metric::sum(
            "node_nfs_rpc_authentication_refreshes_total",
            "Number of RPC authentication refreshes performed.",
            stats.client_rpc.auth_refreshes,
        ),
    ];

    let groups: [(&str, &CallTable, &'static [&'static str]); 3] = [
        ("2", &stats.v2_stats, &V2_PROCEDURES),
        ("3", &stats.v3_stats, &V3_PROCEDURES),
        ("4", &stats.client_v4_stats, &V4_PROCEDURES),
    ];

    for (proto, table, names) in groups {
        for (method, count) in table.procedures(names) {
            metrics.push(Metric::sum_with_tags(
                "node_nfs_requests_total",
                "Number of NFS procedures invoked.",
                count,
                tags!(
                    "proto" => proto,
                    "method" => method,
                ),
            ));
        }
    }

    Ok(metrics)
}
