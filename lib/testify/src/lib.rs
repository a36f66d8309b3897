mod random;
mod temp;

pub use random::random_string;
pub use temp::{temp_dir, temp_file};
