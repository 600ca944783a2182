pub mod args;
pub mod config;

pub use args::{parse_args, Invocation};
pub use config::Config;
