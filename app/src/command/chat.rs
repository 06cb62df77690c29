//! Multi-turn conversation command.
//!
//! History lives in the client for the lifetime of the process; nothing is
//! persisted between runs.

use std::io::Write;
use std::path::PathBuf;

use futures_util::StreamExt;
use parley_core::Role;
use parley_providers::ResponsesClient;
use tracing::info;

use super::load_config;

/// Input parameters for the Chat command strategy.
#[derive(Debug, Clone)]
pub struct ChatInput {
    /// Optional single message to send (non-interactive mode)
    pub message: Option<String>,
    /// Print deltas as they arrive instead of waiting for the full reply
    pub stream: bool,
    /// Optional model override
    pub model: Option<String>,
    /// Per-turn instructions appended to the system prompt
    pub instructions: Option<String>,
    pub config_path: Option<PathBuf>,
}

/// Strategy for executing the Chat command.
///
/// With `--message` a single turn is sent and the reply printed. Otherwise an
/// interactive loop reads lines from stdin until `exit` or `quit`. Ctrl+C
/// abandons the turn in flight, which leaves history as it was.
#[derive(Debug, Clone, Copy)]
pub struct ChatStrategy;

impl super::CommandStrategy for ChatStrategy {
    type Input = ChatInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let mut config = load_config(input.config_path.as_deref())?;
        if let Some(model) = input.model {
            config = config.with_model(model);
        }

        let session = ChatSession {
            client: ResponsesClient::new(config),
            stream: input.stream,
            instructions: input.instructions,
        };

        if let Some(msg) = input.message {
            session.turn(&msg).await
        } else {
            session.run_interactive().await
        }
    }
}

struct ChatSession {
    client: ResponsesClient,
    stream: bool,
    instructions: Option<String>,
}

impl ChatSession {
    async fn turn(&self, text: &str) -> anyhow::Result<()> {
        let instructions = self.instructions.as_deref();

        if !self.stream {
            let reply = self.client.send(text, instructions).await?;
            println!("{reply}");
            return Ok(());
        }

        let mut deltas = Box::pin(self.client.stream(text, instructions));
        let mut stdout = std::io::stdout();
        while let Some(delta) = deltas.next().await {
            let delta = match delta {
                Ok(delta) => delta,
                Err(e) => {
                    println!();
                    return Err(e.into());
                }
            };
            write!(stdout, "{delta}")?;
            stdout.flush()?;
        }
        println!();
        Ok(())
    }

    async fn run_interactive(&self) -> anyhow::Result<()> {
        println!("=== parley chat ({}) ===", self.client.configuration().await.model());
        println!("Type 'exit' or 'quit' to end, '/clear' to forget, '/history' to review.\n");

        loop {
            print!("> ");
            std::io::stdout().flush()?;

            let mut input = String::new();
            if std::io::stdin().read_line(&mut input)? == 0 {
                break;
            }
            let input = input.trim();

            match input {
                "" => continue,
                "exit" | "quit" => break,
                "/clear" => {
                    self.client.clear_history().await;
                    println!("History cleared.\n");
                    continue;
                }
                "/history" => {
                    self.print_history().await;
                    continue;
                }
                _ => {}
            }

            let outcome = tokio::select! {
                result = self.turn(input) => result,
                _ = tokio::signal::ctrl_c() => {
                    println!("\n(interrupted)");
                    Ok(())
                }
            };
            if let Err(e) = outcome {
                eprintln!("Error: {e}");
            }
            println!();
        }

        let stats = self.client.history_stats().await;
        info!("Conversation ended: {} messages in history", stats.total_messages);
        println!("Session ended. Turns in history: {}", stats.user_messages);
        Ok(())
    }

    async fn print_history(&self) {
        let history = self.client.conversation_history().await;
        if history.is_empty() {
            println!("(empty)\n");
            return;
        }

        for message in &history {
            println!("[{}] {}", role_label(message.role), message.content);
        }
        let stats = self.client.history_stats().await;
        println!(
            "\n{} messages, {} chars (~{} tokens)\n",
            stats.total_messages, stats.total_characters, stats.estimated_tokens
        );
    }
}

const fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Developer => "developer",
        Role::Tool => "tool",
    }
}
