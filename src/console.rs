use std::fmt::Write as _;
use std::io;

use event::Metric;
use tokio::io::{AsyncWriteExt, Stdout};

fn encode(metrics: &[Metric]) -> String {
    let mut buf = String::with_capacity(metrics.len() * 64);
    for metric in metrics {
        let _ = writeln!(buf, "{metric}");
    }

    buf
}

/// Console writes gathered metrics to stdout, one sample per line in the
/// text exposition format.
pub struct Console {
    writer: Stdout,
}

impl Console {
    pub fn new() -> Self {
        Self {
            writer: tokio::io::stdout(),
        }
    }

    pub async fn write(&mut self, metrics: &[Metric]) -> io::Result<()> {
        if metrics.is_empty() {
            return Ok(());
        }

        let buf = encode(metrics);
        self.writer.write_all(buf.as_bytes()).await?;
        self.writer.flush().await
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}
