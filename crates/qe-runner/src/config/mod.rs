pub mod cli;
pub mod cluster;
pub mod commands;

pub use cli::*;
pub use cluster::*;
pub use commands::*;
