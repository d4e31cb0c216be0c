//! setup-bot — First-time setup for the whale watcher.
//!
//! Validates a Telegram bot token with `getMe`, optionally discovers the
//! chat id by waiting for a message to the bot, sends a test message and
//! writes both into the config file (created if missing).
//!
//! By default, reads the bot token interactively (hidden input) to avoid
//! leaking it into shell history. Use `--bot-token` only for scripted/CI use.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;

use polymarket_whale_watcher::config::{AppConfig, CONFIG_PATH};
use polymarket_whale_watcher::telegram::TelegramClient;

/// Long-poll rounds while waiting for a message to the bot.
const DETECT_ROUNDS: u32 = 4;
const DETECT_POLL_SECS: u64 = 15;

#[derive(Parser)]
#[command(
    name = "setup-bot",
    about = "Validate a Telegram bot token and save it with the chat id to config.toml"
)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Bot token from @BotFather.
    /// If omitted, reads interactively with hidden input (recommended).
    #[arg(long)]
    bot_token: Option<String>,

    /// Chat id that receives alerts and may send commands
    #[arg(long, conflicts_with = "detect_chat")]
    chat_id: Option<String>,

    /// Wait for a message to the bot and use its chat id
    #[arg(long)]
    detect_chat: bool,
}

async fn detect_chat_id(client: &TelegramClient) -> Result<Option<String>> {
    let mut offset = 0;
    for _ in 0..DETECT_ROUNDS {
        let updates = client
            .get_updates(offset, DETECT_POLL_SECS)
            .await
            .context("failed to fetch updates")?;
        for update in updates {
            offset = offset.max(update.update_id + 1);
            if let Some(message) = update.message {
                // Acknowledge so the watcher does not see it again.
                let _ = client.get_updates(offset, 0).await;
                return Ok(Some(message.chat.id.to_string()));
            }
        }
    }
    Ok(None)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_path();

    let mut app_config = if config_path.exists() {
        AppConfig::load(config_path)?
    } else {
        println!("{} not found, a new one will be created", config_path.display());
        AppConfig::default()
    };

    println!("=== Polymarket Whale Watcher — Bot Setup ===\n");

    // ── Step 1: Read bot token ─────────────────────────────────────
    let bot_token = match cli.bot_token {
        Some(token) => token.trim().to_string(),
        None => {
            let token = rpassword::prompt_password("Enter bot token: ")
                .context("failed to read bot token")?;
            token.trim().to_string()
        }
    };
    if bot_token.is_empty() {
        bail!("bot token cannot be empty");
    }

    // ── Step 2: Validate token ─────────────────────────────────────
    println!("Validating bot token...");
    let client = TelegramClient::new(&app_config.settings.telegram_api_base, bot_token.clone())?;
    let bot = client
        .get_me()
        .await
        .context("token rejected by Telegram — check the value from @BotFather")?;
    let handle = bot.username.clone().unwrap_or_else(|| bot.first_name.clone());
    println!("  Bot: @{handle} (id {})", bot.id);
    println!();

    // ── Step 3: Resolve chat id ────────────────────────────────────
    let chat_id = if let Some(id) = cli.chat_id {
        id.trim().to_string()
    } else if cli.detect_chat {
        println!("Send any message to @{handle} from the chat that should receive alerts...");
        match detect_chat_id(&client).await? {
            Some(id) => {
                println!("  Detected chat id: {id}");
                id
            }
            None => bail!(
                "no message received within {}s",
                u64::from(DETECT_ROUNDS) * DETECT_POLL_SECS
            ),
        }
    } else {
        app_config.telegram.chat_id.clone()
    };
    if chat_id.is_empty() {
        bail!("no chat id configured — pass --chat-id or --detect-chat");
    }
    println!();

    // ── Step 4: Send test message ──────────────────────────────────
    println!("Sending test message to chat {chat_id}...");
    client
        .send_message(&chat_id, "✅ Whale watcher connected. Send /help for commands.")
        .await
        .context("failed to message the chat — has it started a conversation with the bot?")?;
    println!("  Test message delivered");
    println!();

    // ── Step 5: Save config ────────────────────────────────────────
    println!("Updating {}...", config_path.display());
    app_config.telegram.bot_token = bot_token;
    app_config.telegram.chat_id = chat_id.clone();
    app_config.save(config_path)?;
    println!("  Config updated successfully");
    println!();

    // ── Summary ────────────────────────────────────────────────────
    println!("=== Setup Complete ===");
    println!();
    println!("  Bot:  @{handle}");
    println!("  Chat: {chat_id}");
    println!();
    println!("Next steps:");
    println!("  cargo run --bin whale-watcher");
    println!("  then send /addwhale <address> to the bot");

    Ok(())
}
