//! cipherchat server
//!
//! Accepts chat clients over TCP, checks the shared password and relays
//! every chat line to everyone connected.
//!
//! Usage:
//!   cipherchat-server [--port 27101] [--host 0.0.0.0] [--password-hash <salt$digest>]
//!   cipherchat-server hash-password

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cipherchat::crypto::keystore;
use cipherchat::{ChatServer, Credential, CredentialCheck, Keypair, ServerConfig};
use tracing::info;

/// cipherchat relay server
#[derive(Parser)]
#[command(name = "cipherchat-server")]
#[command(author, version, about = "Encrypted multi-user chat relay", long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Modulus size when a new server key is generated
    #[arg(long)]
    key_bits: Option<usize>,

    /// Server key file (default: ~/.cipherchat/server.pem)
    #[arg(short, long)]
    key_file: Option<PathBuf>,

    /// Generate a fresh key for this run instead of using a key file
    #[arg(long)]
    ephemeral_key: bool,

    /// Shared chat password
    #[arg(long, env = "CIPHERCHAT_PASSWORD", hide_env_values = true, conflicts_with = "password_hash")]
    password: Option<String>,

    /// Stored credential in `<salt-hex>$<digest-hex>` form
    #[arg(long, env = "CIPHERCHAT_PASSWORD_HASH", hide_env_values = true)]
    password_hash: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the stored form of a password for --password-hash
    HashPassword {
        /// Password to hash (prompted for if omitted)
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cipherchat=info".parse()?)
                .add_directive("cipherchat_server=info".parse()?),
        )
        .init();

    let args = Args::parse();

    if let Some(Commands::HashPassword { password }) = &args.command {
        let password = match password {
            Some(p) => p.clone(),
            None => prompt_password("Password: ")?,
        };
        println!("{}", Credential::from_password(&password).to_encoded());
        return Ok(());
    }

    let config = load_config(&args)?;
    let keypair = Arc::new(load_keypair(&args, config.key_bits)?);
    let credentials = load_credentials(&args)?;

    let server = ChatServer::new(config, keypair, credentials);
    let listener = server.bind().await?;
    info!("Users must know the shared password to join");

    server
        .serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}

fn load_config(args: &Args) -> Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::from_json_file(path)?,
        None => ServerConfig::default(),
    };

    if args.host.is_some() || args.port.is_some() {
        let (default_host, default_port) = config
            .bind_addr
            .rsplit_once(':')
            .map(|(h, p)| (h.to_string(), p.to_string()))
            .unwrap_or_else(|| ("0.0.0.0".to_string(), cipherchat::config::DEFAULT_PORT.to_string()));
        let host = args.host.clone().unwrap_or(default_host);
        let port = args.port.map(|p| p.to_string()).unwrap_or(default_port);
        config.bind_addr = format!("{}:{}", host, port);
    }
    if let Some(bits) = args.key_bits {
        config.key_bits = bits;
    }

    config.validate()?;
    Ok(config)
}

fn load_keypair(args: &Args, bits: usize) -> Result<Keypair> {
    if args.ephemeral_key {
        info!("Generating an ephemeral {}-bit server key", bits);
        return Ok(Keypair::generate(bits)?);
    }

    let path = match &args.key_file {
        Some(path) => path.clone(),
        None => dirs::home_dir()
            .context("Could not find home directory; pass --key-file")?
            .join(".cipherchat")
            .join("server.pem"),
    };
    keystore::load_or_generate(&path, bits)
        .with_context(|| format!("loading server key from {}", path.display()))
}

fn load_credentials(args: &Args) -> Result<Arc<dyn CredentialCheck>> {
    let credential = if let Some(encoded) = &args.password_hash {
        Credential::from_encoded(encoded).context("parsing --password-hash")?
    } else {
        let password = match &args.password {
            Some(p) => p.clone(),
            None => prompt_password("Set chat password: ")?,
        };
        if password.is_empty() {
            bail!("the chat password must not be empty");
        }
        Credential::from_password(&password)
    };
    Ok(Arc::new(credential))
}

/// Read a password without echoing it
fn prompt_password(label: &str) -> Result<String> {
    rpassword::prompt_password(label).context("Failed to read password")
}
