use parley_config::Configuration;

/// Strategy for initializing the configuration.
///
/// Writes the template to `~/parley/config.json`; an existing file is left
/// alone and reported as an error.
#[derive(Debug, Clone, Copy)]
pub struct InitStrategy;

impl super::CommandStrategy for InitStrategy {
    type Input = ();

    async fn execute(&self, _input: Self::Input) -> anyhow::Result<()> {
        let path = Configuration::create_config()?;
        println!("Created config file at {}", path.display());
        println!("Set \"apiKey\" before running 'parley chat'.");
        Ok(())
    }
}
