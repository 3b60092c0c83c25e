mod app;
mod handler;
mod logging;
mod tui;
mod ui;

use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use chatterbox_core::{
    build_backend, ChatRole, ChatSession, Config, FileStore, OllamaClient, Provider, ReplyMode,
    TurnOutcome,
};
use tracing::{info, warn};

use app::App;
use tui::EventHandler;

#[derive(Parser)]
#[command(name = "chatterbox")]
#[command(about = "Terminal chat with hosted and local language models", version)]
struct Cli {
    /// Provider to talk to: huggingface, openai or ollama
    #[arg(short, long, global = true)]
    provider: Option<String>,
    /// Model name (defaults to the saved or provider default)
    #[arg(short, long, global = true)]
    model: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message and print the reply
    Ask {
        /// Your message
        text: String,
        /// Wait for the whole reply instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },
    /// Print the saved conversation
    History,
    /// Forget the saved conversation
    Clear,
    /// List models for the selected provider
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The TUI owns the terminal, so it logs to a file next to the transcript
    let store = FileStore::open_default()?;
    match cli.command {
        None => logging::init_file(&store.dir().join("chatterbox.log"))?,
        Some(_) => logging::init_stderr(),
    }

    let config = match Config::get_config_path() {
        Ok(path) => load_config_or_default(&path),
        Err(e) => {
            warn!(error = %e, "no config directory; using default settings");
            Config::new()
        }
    };
    let provider = match cli.provider.as_deref() {
        Some(name) => Provider::from_str(name).ok_or_else(|| anyhow!("Unknown provider '{}'", name))?,
        None => config.provider(),
    };
    let model = cli.model.unwrap_or_else(|| config.model_for(provider));

    match cli.command {
        None => run_tui(config, store, provider, model).await,
        Some(Commands::Ask { text, no_stream }) => {
            ask(&config, store, provider, &model, &text, no_stream).await
        }
        Some(Commands::History) => print_history(&config, store),
        Some(Commands::Clear) => clear_history(&config, store),
        Some(Commands::Models) => list_models(&config, provider, &model).await,
    }
}

/// Settings from `path`; an unreadable or malformed file is logged and replaced by defaults.
fn load_config_or_default(path: &Path) -> Config {
    Config::load_from(path).unwrap_or_else(|e| {
        warn!(error = %format!("{e:#}"), "could not load config; using default settings");
        Config::new()
    })
}

async fn run_tui(config: Config, store: FileStore, provider: Provider, model: String) -> Result<()> {
    info!(provider = provider.as_str(), %model, "starting chatterbox");

    let mut events = EventHandler::new();
    let mut app = App::new(config, store, provider, model, events.sender())?;

    tui::install_panic_hook();
    let mut terminal = tui::init()?;

    let result = async {
        while !app.should_quit {
            terminal.draw(|frame| ui::render(&mut app, frame))?;

            let Some(event) = events.next().await else { break };
            handler::handle_event(&mut app, event).await?;
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    tui::restore()?;
    if let Some(task) = app.reply_task.take() {
        task.abort();
    }
    result
}

async fn ask(
    config: &Config,
    store: FileStore,
    provider: Provider,
    model: &str,
    text: &str,
    no_stream: bool,
) -> Result<()> {
    let backend = build_backend(provider, model, config)?;
    let mut session = ChatSession::open(store, config.session_options());
    let mode = if no_stream { ReplyMode::Batch } else { config.reply_mode() };

    // Print only what each update adds
    let mut printed = 0;
    let mut stdout = std::io::stdout();
    let outcome = session
        .send(backend.as_ref(), text, mode, |buffer| {
            if mode == ReplyMode::Streaming && buffer.len() > printed {
                let _ = write!(stdout, "{}", &buffer[printed..]);
                let _ = stdout.flush();
                printed = buffer.len();
            }
        })
        .await?;

    match outcome {
        TurnOutcome::Replied => {
            if printed == 0 {
                if let Some(reply) = session.transcript().last() {
                    print!("{}", reply.content);
                }
            }
            println!();
            Ok(())
        }
        TurnOutcome::Failed(cause) => {
            if printed > 0 {
                println!();
            }
            bail!(cause)
        }
        TurnOutcome::Discarded => Ok(()),
    }
}

fn print_history(config: &Config, store: FileStore) -> Result<()> {
    let session = ChatSession::open(store, config.session_options());
    if session.messages().is_empty() {
        println!("No saved conversation.");
        return Ok(());
    }
    for message in session.messages() {
        let label = match message.role {
            ChatRole::User => "You",
            ChatRole::Assistant => "AI",
        };
        println!("{}: {}\n", label, message.content);
    }
    Ok(())
}

fn clear_history(config: &Config, store: FileStore) -> Result<()> {
    let mut session = ChatSession::open(store, config.session_options());
    let turns = session.messages().len();
    session.clear();
    println!("Cleared {} messages.", turns);
    Ok(())
}

async fn list_models(config: &Config, provider: Provider, model: &str) -> Result<()> {
    let models = match provider {
        Provider::Ollama => OllamaClient::new(config.ollama_url(), model)?
            .list_models()
            .await
            .map_err(|e| {
                warn!(error = %e, "could not reach Ollama");
                e
            })?,
        other => App::models_for_provider(other),
    };

    println!("{} models:", provider.display_name());
    for name in models {
        let marker = if name == model { "*" } else { " " };
        println!("{} {}", marker, name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_malformed_config_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(load_config_or_default(&path), Config::new());
    }

    #[test]
    fn test_valid_config_is_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"provider":"ollama","streaming":false}"#).unwrap();
        let config = load_config_or_default(&path);
        assert_eq!(config.provider(), Provider::Ollama);
        assert_eq!(config.reply_mode(), ReplyMode::Batch);
    }
}
