//! CLI entry point for the psyas chat client

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::{Input, Password};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use psyas_core::auth::AuthStore;
use psyas_core::config::{Config, ConfigLoader};
use psyas_core::conversation::{
    ConversationController, ConversationSummary, Delivery, Message, Role, SendOutcome,
};
use psyas_core::http::ApiClient;
use psyas_core::logging::init_logging;
use psyas_core::token::TokenStore;

#[derive(Parser)]
#[command(name = "psyas")]
#[command(about = "Terminal client for the psyas counseling chat service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration directory
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and persist the session token
    Login {
        /// Username (prompted when omitted)
        #[arg(short, long)]
        username: Option<String>,
    },
    /// Create a new account
    Register,
    /// Start an interactive chat session
    Chat {
        /// Continue an existing session id
        #[arg(short, long)]
        session: Option<String>,
    },
    /// List recent conversations
    History {
        /// How many conversations to list
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },
    /// Check backend service health
    Status,
    /// Show the logged-in user
    Whoami,
    /// Clear the persisted session
    Logout,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Errors surface here so the logging guard inside run() has already
    // flushed by the time the process ends.
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("{} {}", style("✗").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let loader = match &cli.config_dir {
        Some(dir) => ConfigLoader::with_dir(dir),
        None => ConfigLoader::new(),
    };
    let config = loader.load()?;
    let _log_guard = init_logging(&config.logging);

    let api = Arc::new(ApiClient::new(
        &config.server.base_url,
        Duration::from_secs(config.server.timeout_secs),
    )?);
    let tokens = TokenStore::with_dir(loader.config_dir());
    let mut auth = AuthStore::new(api.clone(), tokens);
    auth.restore();

    match cli.command {
        Commands::Login { username } => cmd_login(&mut auth, username).await,
        Commands::Register => cmd_register(&mut auth).await,
        Commands::Chat { session } => cmd_chat(&mut auth, api, &config, session).await,
        Commands::History { limit } => cmd_history(&mut auth, api, limit).await,
        Commands::Status => cmd_status(api).await,
        Commands::Whoami => cmd_whoami(&mut auth).await,
        Commands::Logout => {
            auth.logout();
            println!("{} Logged out.", style("✓").green().bold());
            Ok(())
        }
    }
}

async fn cmd_login(auth: &mut AuthStore, username: Option<String>) -> Result<()> {
    let username = match username {
        Some(username) => username,
        None => {
            let mut prompt = Input::<String>::new().with_prompt("Username");
            let remembered = auth.session().username.clone();
            if !remembered.is_empty() {
                prompt = prompt.default(remembered);
            }
            prompt.interact_text()?
        }
    };
    let password = Password::new().with_prompt("Password").interact()?;

    let session = auth.login(&username, &password).await?;
    println!(
        "{} Logged in as {}",
        style("✓").green().bold(),
        style(&session.username).bold()
    );
    Ok(())
}

async fn cmd_register(auth: &mut AuthStore) -> Result<()> {
    let username: String = Input::new().with_prompt("Username").interact_text()?;
    let password = Password::new()
        .with_prompt("Password")
        .with_confirmation("Confirm password", "Passwords do not match")
        .interact()?;
    let email: String = Input::new()
        .with_prompt("Email (optional)")
        .allow_empty(true)
        .interact_text()?;
    let email = if email.trim().is_empty() {
        None
    } else {
        Some(email)
    };

    let registered = auth
        .register(&username, &password, email.as_deref())
        .await?;
    println!(
        "{} Account {} created. Log in with {}.",
        style("✓").green().bold(),
        style(&registered).bold(),
        style("psyas login").cyan()
    );
    Ok(())
}

async fn cmd_chat(
    auth: &mut AuthStore,
    api: Arc<ApiClient>,
    config: &Config,
    session: Option<String>,
) -> Result<()> {
    ensure_identity(auth).await?;
    let mut conversation = ConversationController::new(api);
    if !auth.session().user_id.is_empty() {
        conversation.set_user(auth.session().user_id.clone());
    }

    // The web UI's sidebar: list what's there, then start chatting.
    if conversation
        .load_history(config.chat.history_limit)
        .await
        .is_ok()
        && !conversation.history().is_empty()
    {
        print_history(conversation.history());
        println!();
    }

    match session {
        Some(session_id) => {
            conversation.select_history(&ConversationSummary {
                session_id: session_id.clone(),
                title: None,
                created_at: None,
            });
            println!(
                "Continuing session {}. Earlier turns are not shown.",
                style(&session_id).bold()
            );
        }
        None => println!("{}", style(&config.chat.greeting).cyan()),
    }
    println!(
        "{}",
        style("Type /new for a fresh conversation, /quit to leave.").dim()
    );

    loop {
        let line: String = Input::new()
            .with_prompt("you")
            .allow_empty(true)
            .interact_text()?;
        match line.trim() {
            "/quit" | "/exit" => break,
            "/new" => {
                conversation.new_chat();
                println!("{}", style(&config.chat.greeting).cyan());
                continue;
            }
            _ => {}
        }

        let seen = conversation.messages().len();
        let outcome = conversation.send_message(&line).await;
        for message in &conversation.messages()[seen..] {
            render_message(message);
        }
        // A rejected token ends the loop; retrying without one would
        // fail the same way forever.
        if outcome == SendOutcome::Unauthorized {
            auth.logout();
            anyhow::bail!("session expired, run `psyas login` again");
        }
    }

    Ok(())
}

async fn cmd_history(auth: &mut AuthStore, api: Arc<ApiClient>, limit: u32) -> Result<()> {
    ensure_identity(auth).await?;
    let mut conversation = ConversationController::new(api);
    if !auth.session().user_id.is_empty() {
        conversation.set_user(auth.session().user_id.clone());
    }

    match conversation.load_history(limit).await {
        Ok(0) => {
            println!("{}", style("No conversations yet.").dim());
            Ok(())
        }
        Ok(_) => {
            print_history(conversation.history());
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!("could not fetch history: {}", e)),
    }
}

async fn cmd_status(api: Arc<ApiClient>) -> Result<()> {
    match api.status().await {
        Ok(payload) => {
            println!("{}", style("Service is reachable.").green());
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!("service unreachable: {}", e)),
    }
}

async fn cmd_whoami(auth: &mut AuthStore) -> Result<()> {
    if auth.session().token.is_empty() {
        anyhow::bail!("not logged in");
    }
    let profile = auth.fetch_current_user().await?;
    println!("{} ({})", style(&profile.username).bold(), profile.id);
    if let Some(email) = &profile.email {
        println!("  {}", email);
    }
    Ok(())
}

/// Confirm the restored token before an authenticated command
///
/// A rejected token ends the command with a login hint; a network
/// failure degrades to chatting without a confirmed identity.
async fn ensure_identity(auth: &mut AuthStore) -> Result<()> {
    if auth.session().token.is_empty() {
        anyhow::bail!("not logged in, run `psyas login` first");
    }
    match auth.fetch_current_user().await {
        Ok(_) => Ok(()),
        Err(e) if e.is_unauthorized() => {
            anyhow::bail!("session expired, run `psyas login` again");
        }
        Err(e) => {
            warn!("could not confirm identity: {}", e);
            Ok(())
        }
    }
}

fn print_history(items: &[ConversationSummary]) {
    println!("{}", style("Recent conversations").bold());
    for (index, item) in items.iter().enumerate() {
        let title = item.title.as_deref().unwrap_or("(untitled)");
        let created = item.created_at.as_deref().unwrap_or("-");
        println!(
            "  {}. {} {} {}",
            index + 1,
            style(title).bold(),
            style(created).dim(),
            style(format!("[{}]", item.session_id)).dim()
        );
    }
}

fn render_message(message: &Message) {
    match message.role {
        Role::User => {
            // The user already sees their own line; only failures need a mark.
            if message.delivery == Delivery::Failed {
                println!("{}", style("(not delivered)").red().dim());
            }
        }
        Role::Assistant => {
            println!("{} {}", style("assistant>").cyan().bold(), message.text);
        }
    }
}
