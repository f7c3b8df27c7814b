use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::info;

use tl_crypto::diceware;
use tl_proto::RecordKind;
use tl_store::{paths, FileStore, VaultController, VaultEvent, VaultSettings, VaultStatus};

#[derive(Parser)]
#[command(name = "tl-cli")]
#[command(about = "Terminal List encrypted vault", long_about = None)]
struct Cli {
    /// Directory holding settings.json and the vault store
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Vault(VaultCommand),

    /// Generate a Diceware passphrase
    Genpass {
        /// EFF-style wordlist
        #[arg(short, long)]
        wordlist: Option<PathBuf>,
        #[arg(short = 'n', long, default_value_t = diceware::DEFAULT_WORDS)]
        words: usize,
        #[arg(short, long, default_value = diceware::DEFAULT_SEPARATOR)]
        separator: String,
    },
}

#[derive(Subcommand)]
enum VaultCommand {
    /// Show whether a passphrase is set and the vault is locked
    Status,

    /// Set or change the vault passphrase
    SetPass,

    /// Unlock and print a collection
    Show {
        /// item, note or message
        #[arg(default_value = "item")]
        kind: RecordKind,
    },

    /// Seal one record for out-of-band transfer
    Share {
        /// item, note or message
        kind: RecordKind,
        /// Record id or 1-based position
        reference: String,
        /// Write the envelope here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import a shared record
    Receive {
        /// Envelope file; reads stdin when omitted
        input: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => paths::data_dir()?,
    };

    let command = match cli.command {
        Commands::Vault(command) => command,
        Commands::Genpass {
            wordlist,
            words,
            separator,
        } => {
            let path = wordlist.unwrap_or_else(|| data_dir.join("wordlist.txt"));
            let text =
                fs::read_to_string(&path).with_context(|| format!("reading wordlist {}", path.display()))?;
            let list = diceware::parse_wordlist(&text)?;
            println!("{}", diceware::generate(&list, words, &separator)?);
            return Ok(());
        }
    };

    let settings = VaultSettings::load(&paths::settings_path(&data_dir))?;
    let store = Arc::new(FileStore::open(paths::store_dir(&data_dir))?);
    let vault = VaultController::open(store, settings)?;
    info!("vault opened from {}", data_dir.display());

    let result = run(&vault, command).await;
    vault.shutdown();
    result
}

async fn run(vault: &VaultController, command: VaultCommand) -> Result<()> {
    match command {
        VaultCommand::Status => {
            let status = serde_json::json!({
                "status": vault.status(),
                "kdf": vault.settings().vault_kdf.name(),
                "autoLockSecs": vault.settings().auto_lock_secs,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        VaultCommand::SetPass => {
            if vault.is_locked() {
                unlock(vault).await?;
            }
            let mut events = vault.subscribe();
            let passphrase = prompt_twice("New vault passphrase: ", "TL_NEW_PASSPHRASE")?;
            vault.set_passphrase(&passphrase).await?;
            ensure_saved(&mut events)?;
            println!("passphrase set");
        }
        VaultCommand::Show { kind } => {
            if vault.is_locked() {
                unlock(vault).await?;
            }
            let state = vault.state()?;
            println!("{}", serde_json::to_string_pretty(state.collection(kind))?);
        }
        VaultCommand::Share {
            kind,
            reference,
            output,
        } => {
            if vault.is_locked() {
                unlock(vault).await?;
            }
            let passphrase = prompt_twice("Share passphrase: ", "TL_SHARE_PASSPHRASE")?;
            let envelope = vault.share(kind, &reference, &passphrase).await?;
            let text = envelope.to_json()?;
            match output {
                Some(path) => {
                    fs::write(&path, text)?;
                    println!("wrote {}", path.display());
                }
                None => println!("{text}"),
            }
        }
        VaultCommand::Receive { input } => {
            let text = match input {
                Some(path) => fs::read_to_string(&path)?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            match vault.status() {
                VaultStatus::Locked => unlock(vault).await?,
                VaultStatus::NoPassphrase => bail!("set a vault passphrase before importing"),
                VaultStatus::Unlocked => {}
            }
            let mut events = vault.subscribe();
            let passphrase = prompt_once("Share passphrase: ", "TL_SHARE_PASSPHRASE")?;
            let (kind, id) = vault.receive_share(&text, &passphrase).await?;
            ensure_saved(&mut events)?;
            println!("imported {} {id}", kind.as_str());
        }
    }
    Ok(())
}

async fn unlock(vault: &VaultController) -> Result<()> {
    let passphrase = prompt_once("Vault passphrase: ", "TL_VAULT_PASSPHRASE")?;
    vault.unlock(&passphrase).await?;
    Ok(())
}

/// Saves are reported on the event channel rather than returned.
fn ensure_saved(events: &mut broadcast::Receiver<VaultEvent>) -> Result<()> {
    while let Ok(event) = events.try_recv() {
        if let VaultEvent::SaveFailed { reason, .. } = event {
            bail!("vault could not be saved: {reason}");
        }
    }
    Ok(())
}

fn prompt_once(prompt: &str, env_var: &str) -> Result<String> {
    if let Ok(value) = std::env::var(env_var) {
        if !value.is_empty() {
            return Ok(value);
        }
    }
    rpassword::prompt_password(prompt).map_err(|e| anyhow!("passphrase prompt: {e}"))
}

fn prompt_twice(prompt: &str, env_var: &str) -> Result<String> {
    if let Ok(value) = std::env::var(env_var) {
        if !value.is_empty() {
            return Ok(value);
        }
    }
    let first = rpassword::prompt_password(prompt).map_err(|e| anyhow!("passphrase prompt: {e}"))?;
    let second = rpassword::prompt_password("Confirm: ").map_err(|e| anyhow!("passphrase prompt: {e}"))?;
    if first != second {
        bail!("passphrases do not match");
    }
    Ok(first)
}
