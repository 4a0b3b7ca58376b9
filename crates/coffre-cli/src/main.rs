//! coffre: encrypted vault file client
//!
//! Commands:
//!   push <local> [--name <n>]   - encrypt and upload a local file
//!   pull <name> [<dest>]        - download and decrypt a stored file
//!   ls                          - list stored files
//!   rm <name>                   - delete a stored file
//!   status                      - check storage connectivity
//!   config show                 - display the active configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use coffre_core::config::{CoffreConfig, LogConfig};
use coffre_core::FileInfo;
use coffre_store::health::check_health;
use coffre_store::remote::{delete_file, list_files};
use coffre_transfer::{ProgressFn, StaticPassword, TransferError, Transferor};

// ── CLI structure ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "coffre",
    version,
    about = "coffre encrypted vault client",
    long_about = "coffre: store files in an untrusted object store, encrypted client-side"
)]
struct Cli {
    /// Path to coffre.toml configuration file
    #[arg(long, short = 'c', env = "COFFRE_CONFIG", default_value = "coffre.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt and upload a local file to the vault
    ///
    /// Credentials are read from AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY
    /// (or COFFRE_ACCESS_KEY_ID / COFFRE_SECRET_ACCESS_KEY). The master
    /// password comes from COFFRE_PASSWORD or an interactive prompt.
    Push {
        /// Local file to upload
        local: PathBuf,
        /// Name to store the file under (default: the file's base name)
        #[arg(long, short = 'n')]
        name: Option<String>,
        /// Replace an existing remote file of the same name
        #[arg(long)]
        force: bool,
    },

    /// Download and decrypt a stored file
    Pull {
        /// Stored file name
        name: String,
        /// Local destination path (default: the name in the current dir)
        dest: Option<PathBuf>,
        /// Replace an existing local file at the destination
        #[arg(long)]
        force: bool,
    },

    /// List stored files
    Ls,

    /// Delete a stored file
    Rm {
        /// Stored file name
        name: String,
    },

    /// Check storage connectivity
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CoffreConfig::load(&cli.config)?;
    init_tracing(&config.log);

    match cli.command {
        Commands::Push { local, name, force } => cmd_push(&config, local, name, force).await,
        Commands::Pull { name, dest, force } => cmd_pull(&config, name, dest, force).await,
        Commands::Ls => cmd_ls(&config).await,
        Commands::Rm { name } => cmd_rm(&config, name).await,
        Commands::Status => cmd_status(&config).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

// ── Shared helpers ─────────────────────────────────────────────────────────

fn s3_credentials() -> Result<(String, String)> {
    let access_key = std::env::var("AWS_ACCESS_KEY_ID")
        .or_else(|_| std::env::var("COFFRE_ACCESS_KEY_ID"))
        .context("S3 credentials not set: export AWS_ACCESS_KEY_ID")?;
    let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .or_else(|_| std::env::var("COFFRE_SECRET_ACCESS_KEY"))
        .context("AWS_SECRET_ACCESS_KEY not set")?;
    Ok((access_key, secret_key))
}

fn build_operator(config: &CoffreConfig) -> Result<opendal::Operator> {
    let (access_key, secret_key) = s3_credentials()?;
    coffre_store::build_operator(&config.storage, &access_key, &secret_key)
}

fn master_password() -> Result<SecretString> {
    if let Ok(password) = std::env::var("COFFRE_PASSWORD") {
        return Ok(SecretString::from(password));
    }
    let password =
        rpassword::prompt_password("Master password: ").context("reading master password")?;
    Ok(SecretString::from(password))
}

fn build_transferor(config: &CoffreConfig) -> Result<(Transferor<StaticPassword>, CancellationToken)> {
    let op = build_operator(config)?;
    let keys = Arc::new(StaticPassword::new(master_password()?));

    // Ctrl-C cancels the in-flight transfer; the pipeline rolls back the
    // destination before the command returns.
    let cancel = CancellationToken::new();
    let ctrlc = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrlc.cancel();
        }
    });

    let vault = Transferor::new(
        op,
        config.storage.prefix.clone(),
        config.transfer.chunk_size,
        keys,
        CancellationToken::new(),
    );
    Ok((vault, cancel))
}

fn transfer_bar() -> (ProgressBar, ProgressFn) {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
            .expect("progress template"),
    );
    let tick = bar.clone();
    let progress: ProgressFn = Box::new(move |done, total| {
        if tick.length() != Some(total) {
            tick.set_length(total);
        }
        tick.set_position(done);
    });
    (bar, progress)
}

fn report_transfer(result: Result<(), TransferError>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(TransferError::Interrupted) => {
            eprintln!("transfer cancelled, destination rolled back");
            std::process::exit(130);
        }
        Err(e) => Err(e.into()),
    }
}

// ── Commands ───────────────────────────────────────────────────────────────

async fn cmd_push(
    config: &CoffreConfig,
    local: PathBuf,
    name: Option<String>,
    force: bool,
) -> Result<()> {
    let name = match name {
        Some(name) => name,
        None => local
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| format!("cannot derive a name from: {}", local.display()))?,
    };

    let (vault, cancel) = build_transferor(config)?;
    let (bar, progress) = transfer_bar();

    let result = vault
        .upload_file(&FileInfo::new(&name, &local), Some(progress), cancel, force)
        .await;
    bar.finish_and_clear();

    report_transfer(result)?;
    println!("pushed {} as {name}", local.display());
    Ok(())
}

async fn cmd_pull(
    config: &CoffreConfig,
    name: String,
    dest: Option<PathBuf>,
    force: bool,
) -> Result<()> {
    let dest = dest.unwrap_or_else(|| PathBuf::from(&name));

    let (vault, cancel) = build_transferor(config)?;
    let (bar, progress) = transfer_bar();

    let result = vault
        .download_file(&FileInfo::new(&name, &dest), Some(progress), cancel, force)
        .await;
    bar.finish_and_clear();

    report_transfer(result)?;
    println!("pulled {name} to {}", dest.display());
    Ok(())
}

async fn cmd_ls(config: &CoffreConfig) -> Result<()> {
    let op = build_operator(config)?;
    let manifests = list_files(&op, &config.storage.prefix).await?;

    if manifests.is_empty() {
        println!("vault is empty");
        return Ok(());
    }
    println!("{:<40} {:>12} {:>8}", "NAME", "STORED BYTES", "CHUNKS");
    for m in manifests {
        println!("{:<40} {:>12} {:>8}", m.name, m.size, m.chunks.len());
    }
    Ok(())
}

async fn cmd_rm(config: &CoffreConfig, name: String) -> Result<()> {
    let op = build_operator(config)?;
    delete_file(&op, &config.storage.prefix, &name).await?;
    println!("deleted {name}");
    Ok(())
}

async fn cmd_status(config: &CoffreConfig) -> Result<()> {
    let op = build_operator(config)?;
    match check_health(&op).await {
        Ok(()) => {
            println!("storage: connected ({})", config.storage.endpoint);
            Ok(())
        }
        Err(e) => {
            println!("storage: unreachable ({})", config.storage.endpoint);
            Err(e)
        }
    }
}

fn cmd_config_show(config: &CoffreConfig) -> Result<()> {
    print!("{}", toml::to_string(config).context("serializing config")?);
    Ok(())
}
