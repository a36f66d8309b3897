use std::path::PathBuf;

use crate::random_string;

pub fn temp_file() -> PathBuf {
    std::env::temp_dir().join(random_string(16))
}

/// Create and return a fresh directory under the system temp root.
pub fn temp_dir() -> PathBuf {
    let path = std::env::temp_dir().join(random_string(16));
    std::fs::create_dir_all(&path).expect("create temp dir");
    path
}
