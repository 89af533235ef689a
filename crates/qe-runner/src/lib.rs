pub mod app;
pub mod app_builder;
pub mod config;
pub mod scenario;

pub use app::Runner;
pub use app_builder::RunnerBuilder;
