//! cipherchat client
//!
//! A line-oriented terminal front end: every line typed on stdin is sent to
//! the room, every line the server relays is printed.
//!
//! Usage:
//!   cipherchat [--server 127.0.0.1:27101] [--username alice]
//!
//! Type `/quit` to leave.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cipherchat::crypto::keystore;
use cipherchat::{ChatClient, ClientConfig, ClientEvent, Keypair};
use tokio::io::{AsyncBufReadExt, BufReader};

/// cipherchat: encrypted multi-user chat
#[derive(Parser)]
#[command(name = "cipherchat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address, host:port (overrides the config file)
    #[arg(short, long)]
    server: Option<String>,

    /// Display name (prompted for if neither given nor configured)
    #[arg(short, long)]
    username: Option<String>,

    /// Shared chat password (prompted for if omitted)
    #[arg(long, env = "CIPHERCHAT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Modulus size when a new identity is generated
    #[arg(long)]
    key_bits: Option<usize>,

    /// Path to identity file (default: ~/.cipherchat/client.pem)
    #[arg(short, long)]
    identity: Option<PathBuf>,

    /// Generate a throwaway identity for this run
    #[arg(long)]
    ephemeral_key: bool,
}

const QUIT_COMMAND: &str = "/quit";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("cipherchat=warn".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let keypair = Arc::new(load_identity(&cli, config.key_bits)?);

    let password = match &cli.password {
        Some(p) => p.clone(),
        None => prompt_password("Password: ")?,
    };

    println!("Connecting to {}...", config.server_addr);
    let mut client = ChatClient::connect(&config, keypair, &password)
        .await
        .context("could not join the chat")?;
    println!("Connected. Type {} to leave.", QUIT_COMMAND);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut typing = true;

    loop {
        tokio::select! {
            line = stdin.next_line(), if typing => match line? {
                Some(line) => {
                    let line = line.trim_end();
                    if line == QUIT_COMMAND {
                        client.disconnect();
                        typing = false;
                    } else if !line.is_empty() {
                        client.send(line)?;
                    }
                }
                None => {
                    client.disconnect();
                    typing = false;
                }
            },
            event = client.next_event() => match event {
                Some(ClientEvent::Disconnected(reason)) => {
                    if typing {
                        println!("[SYSTEM] Disconnected from server: {}", reason);
                    }
                    break;
                }
                Some(event) => render(&event),
                None => break,
            }
        }
    }

    println!("Goodbye!");
    Ok(())
}

fn render(event: &ClientEvent) {
    match event {
        ClientEvent::Message(envelope) if envelope.is_server() => {
            println!("[SERVER] {}", envelope.body())
        }
        ClientEvent::Message(envelope) => println!("{}", envelope),
        ClientEvent::System(text) => println!("[SYSTEM] {}", text),
        ClientEvent::UserCount(n) => println!("-- {} user{} online --", n, if *n == 1 { "" } else { "s" }),
        ClientEvent::Disconnected(reason) => println!("[SYSTEM] Disconnected: {}", reason),
    }
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_json_file(path)?,
        None => ClientConfig::default(),
    };

    if let Some(server) = &cli.server {
        config.server_addr = server.clone();
    }
    if let Some(bits) = cli.key_bits {
        config.key_bits = bits;
    }
    if let Some(username) = &cli.username {
        config.username = username.clone();
    }
    if config.username.trim().is_empty() {
        config.username = prompt("Enter your username: ")?;
    }

    config.validate()?;
    Ok(config)
}

fn load_identity(cli: &Cli, bits: usize) -> Result<Keypair> {
    if cli.ephemeral_key {
        println!("Generating a {}-bit key, this can take a moment...", bits);
        return Ok(Keypair::generate(bits)?);
    }

    let path = match &cli.identity {
        Some(path) => path.clone(),
        None => dirs::home_dir()
            .context("Could not find home directory; pass --identity")?
            .join(".cipherchat")
            .join("client.pem"),
    };
    if !path.exists() {
        println!("Generating a {}-bit key, this can take a moment...", bits);
    }
    keystore::load_or_generate(&path, bits)
        .with_context(|| format!("loading identity from {}", path.display()))
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Read a password without echoing it
fn prompt_password(label: &str) -> Result<String> {
    rpassword::prompt_password(label).context("Failed to read password")
}
