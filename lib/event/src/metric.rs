use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Write};

use serde::{Deserialize, Serialize};

pub trait IntoF64 {
    fn into_f64(self) -> f64;
}

macro_rules! impl_intof64 {
    ($typ:ident) => {
        impl IntoF64 for $typ {
            #[inline]
            fn into_f64(self) -> f64 {
                self as f64
            }
        }
    };
}

impl_intof64!(usize);
impl_intof64!(i64);
impl_intof64!(u64);
impl_intof64!(f64);
impl_intof64!(u32);
impl_intof64!(i32);

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricValue {
    /// A monotonically increasing accumulation.
    Sum(f64),
    /// A point-in-time value that can go up and down.
    Gauge(f64),
}

#[derive(Clone, Debug, Deserialize, PartialEq, PartialOrd, Serialize)]
pub struct Metric {
    pub name: String,

    pub description: Option<String>,

    pub tags: BTreeMap<String, String>,

    /// Milliseconds since the Unix epoch, 0 when not stamped yet.
    pub timestamp: i64,

    pub value: MetricValue,
}

impl Metric {
    pub fn gauge<N, D, V>(name: N, desc: D, value: V) -> Metric
    where
        N: Into<String>,
        D: Into<String>,
        V: IntoF64,
    {
        Self {
            name: name.into(),
            description: Some(desc.into()),
            tags: Default::default(),
            timestamp: 0,
            value: MetricValue::Gauge(value.into_f64()),
        }
    }

    pub fn gauge_with_tags<N, D, V>(
        name: N,
        desc: D,
        value: V,
        tags: BTreeMap<String, String>,
    ) -> Metric
    where
        N: Into<String>,
        D: Into<String>,
        V: IntoF64,
    {
        Self {
            name: name.into(),
            description: Some(desc.into()),
            tags,
            timestamp: 0,
            value: MetricValue::Gauge(value.into_f64()),
        }
    }

    pub fn sum<N, D, V>(name: N, desc: D, value: V) -> Metric
    where
        N: Into<String>,
        D: Into<String>,
        V: IntoF64,
    {
        Self {
            name: name.into(),
            description: Some(desc.into()),
            tags: Default::default(),
            timestamp: 0,
            value: MetricValue::Sum(value.into_f64()),
        }
    }

    pub fn sum_with_tags<N, D, V>(
        name: N,
        desc: D,
        value: V,
        tags: BTreeMap<String, String>,
    ) -> Metric
    where
        N: Into<String>,
        D: Into<String>,
        V: IntoF64,
    {
        Self {
            name: name.into(),
            description: Some(desc.into()),
            tags,
            timestamp: 0,
            value: MetricValue::Sum(value.into_f64()),
        }
    }
}

impl Display for Metric {
    /// Render the metric in a Prometheus text-like form
    ///
    /// ```text
    /// NAME{TAGS} VALUE TIMESTAMP
    /// ```
    ///
    /// The timestamp (milliseconds) is omitted when the metric has not been
    /// stamped yet.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;

        if !self.tags.is_empty() {
            f.write_char('{')?;

            let mut n = 0;
            for (k, v) in &self.tags {
                n += 1;
                write!(f, "{}=\"{}\"", k, v)?;
                if n != self.tags.len() {
                    f.write_char(',')?;
                }
            }

            f.write_char('}')?;
        }

        match self.value {
            MetricValue::Sum(v) | MetricValue::Gauge(v) => write!(f, " {}", v)?,
        }

        if self.timestamp != 0 {
            write!(f, " {}", self.timestamp)?;
        }

        Ok(())
    }
}
