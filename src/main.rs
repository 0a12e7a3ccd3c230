//! Threadkeeper - Entry Point
//!
//! Reads gateway events from stdin, one JSON object per line, and answers
//! through Discord using Claude.

use std::sync::Arc;
use std::time::Duration;

use threadkeeper::{ClaudeClient, Config, ConversationOrchestrator, DiscordClient, DiscordConfig, Relay};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    let json_logs = std::env::var("THREADKEEPER_LOG_JSON")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    // stdin carries events, so logs always go to stderr
    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Threadkeeper v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    if config.bot_user_id.is_empty() {
        anyhow::bail!("DISCORD_BOT_USER_ID must be set");
    }

    let claude = ClaudeClient::from_config(&config);
    if !claude.is_available() {
        warn!("ANTHROPIC_API_KEY not set - every completion will fail");
    }

    let discord = Arc::new(DiscordClient::new(DiscordConfig::from_env()?));
    let request_timeout = Duration::from_secs(config.request_timeout_secs);

    let orchestrator = Arc::new(ConversationOrchestrator::new(
        config,
        Arc::new(claude),
        discord.clone(),
        discord,
    )?);

    let relay = Relay::new(orchestrator, request_timeout);

    let shutdown = relay.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, canceling in-flight requests");
            shutdown.cancel();
        }
    });

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let handled = relay.run(stdin).await?;

    info!("Handled {} events", handled);
    Ok(())
}

fn print_help() {
    println!("Threadkeeper v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: threadkeeper < events.jsonl");
    println!();
    println!("Reads one JSON event per line from stdin:");
    println!("  {{\"type\":\"new\",\"conversation_id\",\"prompt\",\"model\"?,\"user_name\"}}");
    println!("  {{\"type\":\"message\",\"conversation_id\",\"message_id\",\"content\",\"user_name\"}}");
    println!();
    println!("Environment variables:");
    println!("  ANTHROPIC_API_KEY                   Claude API key");
    println!("  DISCORD_BOT_TOKEN                   Discord bot token");
    println!("  DISCORD_BOT_USER_ID                 Bot's own user ID");
    println!("  DISCORD_BOT_NAME                    Bot display name");
    println!("  DISCORD_GUILD_ID                    Guild for nickname lookups");
    println!("  THREADKEEPER_CACHE_CAPACITY         Conversations cached (default: 100)");
    println!("  THREADKEEPER_NEGATIVE_CAPACITY      Unmanaged IDs remembered (default: 1000)");
    println!("  THREADKEEPER_PAGE_SIZE              History page size (default: 100)");
    println!("  THREADKEEPER_DEFAULT_MODEL          Default model (default: sonnet)");
    println!("  THREADKEEPER_MODELS                 Allowed models, comma-separated");
    println!("  THREADKEEPER_UNKNOWN_USER           Placeholder anchor author (default: User)");
    println!("  THREADKEEPER_TITLES                 Generate thread titles (default: true)");
    println!("  THREADKEEPER_REQUEST_TIMEOUT_SECS   Per-request deadline (default: 120)");
    println!("  THREADKEEPER_LOG_JSON               JSON logs on stderr");
}
