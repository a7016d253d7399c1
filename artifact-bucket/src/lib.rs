pub mod cli;
pub mod load_config;
pub mod s3_store;

pub use cli::{run, Cli, Commands};
