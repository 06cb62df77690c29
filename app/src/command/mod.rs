//! Static strategy pattern for CLI commands.
//!
//! Each command is a separate strategy with its own input type, dispatched
//! statically from `main`.

use std::path::Path;

use parley_config::Configuration;

mod chat;
mod info;
mod init;
mod version;

pub use chat::{ChatInput, ChatStrategy};
pub use info::InfoStrategy;
pub use init::InitStrategy;
pub use version::VersionStrategy;

/// Core trait defining the contract for all command strategies.
///
/// # Design Principles
/// - **Static dispatch**: All calls are monomorphized at compile time
/// - **Type safety**: Each strategy defines its own input type via associated type
///
/// # Example
/// ```rust,ignore
/// struct MyStrategy;
///
/// impl CommandStrategy for MyStrategy {
///     type Input = MyInput;
///
///     async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
///         Ok(())
///     }
/// }
/// ```
pub trait CommandStrategy: Send + Sync + 'static {
    /// The input type this strategy accepts.
    type Input;

    /// Execute the command with the given input.
    ///
    /// # Errors
    /// Returns an error if command execution fails.
    async fn execute(&self, input: Self::Input) -> anyhow::Result<()>;
}

/// Load from an explicit path, or from the default location.
fn load_config(path: Option<&Path>) -> anyhow::Result<Configuration> {
    match path {
        Some(path) => Ok(Configuration::load_from(path)?),
        None => Configuration::load(),
    }
}
