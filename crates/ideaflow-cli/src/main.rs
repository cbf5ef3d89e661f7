//! ideaflow - streaming GLM chat with web search

mod commands;
mod config;
mod utils;

use clap::Parser;
use ideaflow_ai::{GlmProvider, ReasoningRecovery, SearchMode, models};
use ideaflow_chat::{Chat, ChatConfig, ChatEngine, ChatEvent, ExchangeConfig, ExchangeHandle};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use utils::{ReplyDelta, reply_delta};

/// ideaflow - chat with GLM models, with optional web search
#[derive(Parser, Debug)]
#[command(name = "ideaflow")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use (default: glm-4.6)
    #[arg(short, long)]
    model: Option<String>,

    /// Run in non-interactive mode with a single prompt
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Search the web before every message
    #[arg(long, conflicts_with = "no_search")]
    search: bool,

    /// Never search the web
    #[arg(long)]
    no_search: bool,

    /// Check that the API key is accepted and exit
    #[arg(long)]
    check_key: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    let filter = if args.verbose {
        EnvFilter::new("ideaflow=debug,ideaflow_ai=debug,ideaflow_chat=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    // Load config file
    let cfg = config::Config::load();

    // Merge config with CLI args (CLI takes precedence)
    let model_id = args
        .model
        .or(cfg.model.clone())
        .unwrap_or_else(|| models::default_model().id);
    let model = models::resolve_model(&model_id, cfg.base_url.as_deref());

    let search_mode = if args.search {
        SearchMode::On
    } else if args.no_search {
        SearchMode::Off
    } else {
        cfg.search.mode
    };

    let Some(api_key) = cfg.api_key() else {
        eprintln!("Error: No API key found");
        eprintln!();
        eprintln!(
            "Set your API key with: export {}=your-key",
            ideaflow_ai::providers::glm::API_KEY_ENV
        );
        eprintln!("Or add it to config file: ideaflow --init-config");
        std::process::exit(1);
    };

    let mut provider = GlmProvider::new(api_key);
    if let Some(ref base_url) = cfg.base_url {
        provider = provider.with_base_url(base_url.as_str());
    }

    if args.check_key {
        if provider.validate_api_key(&model).await? {
            println!("API key is valid ({})", model.id);
            return Ok(());
        }
        eprintln!("{}", ideaflow_ai::Error::InvalidApiKey.user_message());
        std::process::exit(1);
    }

    let exchange = ExchangeConfig {
        params: cfg.params(),
        search: cfg.search.options(),
        ..ExchangeConfig::new(model.clone())
    };
    let provider = Arc::new(provider);
    let engine = ChatEngine::new(provider.clone(), exchange)
        .with_search(provider)
        .with_trigger(Arc::new(cfg.search.trigger()))
        .with_recovery(ReasoningRecovery::new(cfg.recovery.clone()));

    let mut chat = Chat::new(
        Arc::new(engine),
        ChatConfig {
            system_prompt: cfg.system_prompt.clone(),
            history_limit: cfg.history_limit(),
            search_mode,
        },
    );

    spawn_interrupt_handler(chat.handle());

    tracing::debug!(model = %model.id, search = %search_mode, "starting");

    if let Some(command) = args.command {
        run_command(&mut chat, &command).await
    } else {
        run_interactive(&mut chat, &model_id).await
    }
}

/// Ctrl-C stops the running exchange, or exits when idle.
fn spawn_interrupt_handler(handle: ExchangeHandle) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if handle.is_running() {
                handle.cancel();
            } else {
                std::process::exit(130);
            }
        }
    });
}

/// Print one exchange's events until it ends.
fn spawn_printer(mut receiver: broadcast::Receiver<ChatEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut printed = String::new();
        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "printer lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let terminal = event.is_terminal();

            match event {
                ChatEvent::ExchangeStart { .. } => printed.clear(),
                ChatEvent::SearchResults { bundle, .. } => {
                    println!("[Searched: {}]", bundle.query);
                    println!("{}", bundle.formatted_text);
                    println!();
                }
                ChatEvent::ReplyUpdate { content, .. } => {
                    print_reply(&mut printed, &content);
                }
                ChatEvent::ReplyEnd {
                    content,
                    recovered_by,
                    ..
                } => {
                    print_reply(&mut printed, &content);
                    println!();
                    if let Some(stage) = recovered_by {
                        eprintln!("[reply recovered from reasoning: {}]", stage);
                    }
                }
                ChatEvent::Error { message, .. } => {
                    if !printed.is_empty() {
                        println!();
                    }
                    if message == printed {
                        eprintln!("[stopped]");
                    } else {
                        eprintln!("{}", message);
                    }
                }
            }

            if terminal {
                break;
            }
        }
    })
}

fn print_reply(printed: &mut String, content: &str) {
    match reply_delta(printed, content) {
        ReplyDelta::Append(rest) => print!("{}", rest),
        ReplyDelta::Replace(text) => print!("\n{}", text),
    }
    let _ = std::io::stdout().flush();
    printed.clear();
    printed.push_str(content);
}

/// Send one message and wait until its events are printed. `input` must not
/// be blank, since a blank message emits no events.
async fn exchange(chat: &mut Chat, input: &str) -> ideaflow_chat::Result<()> {
    let printer = spawn_printer(chat.subscribe());
    let result = chat.send(input).await;
    if let Err(e) = printer.await {
        tracing::warn!("printer task failed: {}", e);
    }
    result.map(|_| ())
}

async fn run_command(chat: &mut Chat, command: &str) -> anyhow::Result<()> {
    if command.trim().is_empty() {
        anyhow::bail!("Message is empty");
    }
    println!("ideaflow> {}", command);
    println!();

    exchange(chat, command).await?;
    Ok(())
}

async fn run_interactive(chat: &mut Chat, model_id: &str) -> anyhow::Result<()> {
    use std::io;

    // Show minimal startup info (only if TTY)
    if io::IsTerminal::is_terminal(&io::stderr()) {
        eprintln!("ideaflow ({}) search: {}", model_id, chat.search_mode());
        eprintln!("Type /help for commands.");
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        // Handle slash commands
        if let Some(result) = commands::execute_command(input, chat) {
            match result {
                commands::CommandResult::NewSession => {
                    let previous = chat.new_session();
                    println!("Started a new chat (previous: {}).", previous.title);
                }
                commands::CommandResult::SetSearch(mode) => {
                    chat.set_search_mode(mode);
                    println!("Web search set to: {}", mode);
                }
                commands::CommandResult::Message(msg) => {
                    println!("{}", msg);
                }
                commands::CommandResult::Exit => {
                    break;
                }
                commands::CommandResult::Unknown(cmd) => {
                    println!("Unknown command: /{}", cmd);
                    println!("Type /help for available commands.");
                }
            }
            continue;
        }

        // Failures were already printed by the event printer
        if let Err(e) = exchange(chat, input).await {
            tracing::debug!("exchange failed: {}", e);
        }
        println!();
    }

    Ok(())
}
