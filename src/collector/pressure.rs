use std::io::ErrorKind;
use std::path::Path;

use event::Metric;

use super::Error;

/// PSIStats holds the total stall times of one pressure resource, in
/// microseconds. The cpu resource has no meaningful "full" line.
#[derive(Debug, Default, PartialEq)]
pub struct PSIStats {
    pub some: i64,
    pub full: i64,
}

fn load_pressure_stats<P: AsRef<Path>>(path: P) -> Result<PSIStats, Error> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        // kernels booted with psi=0 answer reads with ENOTSUP
        Err(err) if err.kind() == ErrorKind::Unsupported => return Err(Error::NoData),
        Err(err) => return Err(err.into()),
    };

    let mut stats = PSIStats::default();
    for line in content.lines() {
        // the total counter comes last, e.g.
        // some avg10=0.00 avg60=0.00 avg300=0.00 total=8537362
        let Some(pos) = line.rfind('=') else {
            continue;
        };

        let value = line[pos + 1..].parse::<i64>()?;
        if line.starts_with("some ") {
            stats.some = value;
        } else if line.starts_with("full ") {
            stats.full = value;
        }
    }

    Ok(stats)
}

pub async fn gather(proc_path: &Path) -> Result<Vec<Metric>, Error> {
    let base = proc_path.join("pressure");

    let cpu = load_pressure_stats(base.join("cpu"))?;
    let io = load_pressure_stats(base.join("io"))?;
    let memory = load_pressure_stats(base.join("memory"))?;

    Ok(vec![
        Metric::sum(
            "node_psi_cpu_some_us",
            "Total time some tasks spent stalled on cpu, in microseconds.",
            cpu.some,
        ),
        Metric::sum(
            "node_psi_io_some_us",
            "Total time some tasks spent stalled on io, in microseconds.",
            io.some,
        ),
        Metric::sum(
            "node_psi_io_full_us",
            "Total time all tasks spent stalled on io, in microseconds.",
            io.full,
        ),
        Metric::sum(
            "node_psi_memory_some_us",
            "Total time some tasks spent stalled on memory, in microseconds.",
            memory.some,
        ),
        Metric::sum(
            "node_psi_memory_full_us",
            "Total time all tasks spent stalled on memory, in microseconds.",
            memory.full,
        ),
    ])
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use testify::{temp_dir, temp_file};

    use super::*;

    #[test]
    fn parse_pressure_stats() {
        let tests = [
            (
                // name
                "some and full",
                // content
                "some avg10=0.00 avg60=0.00 avg300=0.00 total=8537362\nfull avg10=0.00 avg60=0.00 avg300=0.00 total=8183134\n",
                // valid
                true,
                PSIStats {
                    some: 8537362,
                    full: 8183134,
                },
            ),
            (
                "some only",
                "some avg10=2.04 avg60=0.75 avg300=0.40 total=157622151\n",
                true,
                PSIStats {
                    some: 157622151,
                    full: 0,
                },
            ),
            (
                "unknown lines ignored",
                "nonsense total=5\nwithout an equal sign\n",
                true,
                PSIStats::default(),
            ),
            (
                "malformed total",
                "some avg10=0.00 avg60=0.00 avg300=0.00 total=abc\n",
                false,
                PSIStats::default(),
            ),
            ("empty", "", true, PSIStats::default()),
        ];

        for (name, content, valid, wanted) in tests {
            let path = temp_file();
            std::fs::write(&path, content).unwrap();

            match load_pressure_stats(&path) {
                Ok(stats) => {
                    assert!(valid, "case {name}");
                    assert_eq!(stats, wanted, "case {name}");
                }
                Err(err) => assert!(!valid, "case {name}: {err}"),
            }
        }
    }

    #[test]
    fn missing_file() {
        let err = load_pressure_stats(temp_file()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn gather_metrics() {
        let dir = temp_dir();
        std::fs::create_dir_all(dir.join("pressure")).unwrap();
        std::fs::write(
            dir.join("pressure/cpu"),
            "some avg10=0.00 avg60=0.00 avg300=0.00 total=14388509\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("pressure/io"),
            "some avg10=0.00 avg60=0.00 avg300=0.00 total=8537362\nfull avg10=0.00 avg60=0.00 avg300=0.00 total=8183134\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("pressure/memory"),
            "some avg10=0.00 avg60=0.00 avg300=0.00 total=31438\nfull avg10=0.00 avg60=0.00 avg300=0.00 total=30630\n",
        )
        .unwrap();

        let metrics = gather(&dir).await.unwrap();
        assert_eq!(metrics.len(), 5);
        assert_eq!(metrics[0].name, "node_psi_cpu_some_us");
        assert_eq!(metrics[0].value, event::MetricValue::Sum(14388509.0));
        assert_eq!(metrics[2].name, "node_psi_io_full_us");
        assert_eq!(metrics[2].value, event::MetricValue::Sum(8183134.0));
    }

    #[tokio::test]
    async fn gather_missing_resource() {
        let dir = temp_dir();
        std::fs::create_dir_all(dir.join("pressure")).unwrap();
        std::fs::write(
            dir.join("pressure/cpu"),
            "some avg10=0.00 avg60=0.00 avg300=0.00 total=14388509\n",
        )
        .unwrap();

        // io and memory are absent, the whole group yields nothing
        let err = gather(&dir).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
