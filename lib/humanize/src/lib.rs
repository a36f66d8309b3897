pub mod duration;

pub use duration::{ParseDurationError, format_duration, parse_duration};
