pub mod auth;
pub mod cli;
pub mod commands;
pub mod config;
pub mod copy;
pub mod entry;
pub mod relay;
pub mod repo;
pub mod resolver;
pub mod session;
pub mod ssh;
pub mod tunnel;
pub mod utils;

pub use cli::Cli;
pub use config::Settings;
pub use entry::Entry;
pub use session::Orchestrator;
