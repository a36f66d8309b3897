mod macros;
mod metric;

pub use metric::{IntoF64, Metric, MetricValue};
