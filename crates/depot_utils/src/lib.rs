pub mod indicatif;
pub mod reqwest;

mod atomic_write;
pub use atomic_write::{persist_temp_file, temp_file_for};
