use std::path::PathBuf;

use super::load_config;

/// Strategy for displaying the loaded configuration.
///
/// The API key is masked; everything else is printed as resolved, defaults
/// included.
#[derive(Debug, Clone, Copy)]
pub struct InfoStrategy;

impl super::CommandStrategy for InfoStrategy {
    type Input = Option<PathBuf>;

    async fn execute(&self, config_path: Self::Input) -> anyhow::Result<()> {
        let config = load_config(config_path.as_deref())?;

        println!("=== parley Configuration ===\n");

        println!("API Key: {}", mask_key(config.api_key()));
        println!("Endpoint: {}", config.endpoint());
        println!();

        println!("Model:");
        println!("  Name: {}", config.model());
        println!("  Temperature: {}", config.temperature());
        if !config.system_prompt().is_empty() {
            println!("  System Prompt: {}", truncate(config.system_prompt(), 60));
        }
        println!();

        println!("History:");
        println!(
            "  Max Context Characters: {}",
            config.max_context_characters()
        );
        println!("  Max History Items: {}", config.max_history_items());
        println!(
            "  Request Timeout: {}s",
            config.request_timeout().as_secs_f64()
        );
        println!();

        let retry = config.retry_policy();
        println!("Retry:");
        println!("  Max Attempts: {}", retry.max_attempts());
        println!("  Base Delay: {}s", retry.base_delay().as_secs_f64());
        println!("  Max Delay: {}s", retry.max_delay().as_secs_f64());
        println!("  Backoff Multiplier: {}", retry.backoff_multiplier());
        println!("  Jitter Ratio: {}", retry.jitter_ratio());
        let codes: Vec<String> = retry
            .retryable_status_codes()
            .iter()
            .map(ToString::to_string)
            .collect();
        println!("  Retryable Status Codes: {}", codes.join(", "));

        Ok(())
    }
}

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.is_empty() {
        "(not set)".to_string()
    } else if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    } else {
        "***".to_string()
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}
