//! Command line interface of the `local_merger` binary.

pub mod args;
pub mod commands;

pub use args::LocalMergerArgs;
pub use commands::{execute_command, run_local_merge};
