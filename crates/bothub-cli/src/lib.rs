pub mod api;
pub mod config;
pub mod console;
pub mod deploy;
pub mod error;
pub mod package;
pub mod render;
pub mod settings;
pub mod template;
pub mod testing;
pub mod version_check;
pub mod workspace;

pub use error::{CliError, Result};
