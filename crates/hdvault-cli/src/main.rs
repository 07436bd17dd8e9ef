//! hdvault: command-line front end for the seed vault
//!
//! Keeps seeds and software wrapping keys in one JSON file. Gated seeds ask for
//! confirmation on the terminal in place of a device prompt.
//!
//! # Usage
//!
//! ```bash
//! hdvault create --level BIOMETRIC
//! echo "abandon ... about" | hdvault import --level OPEN
//! hdvault sign-message 0x1234... "hello"
//! ```

mod config;
mod prompt;

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use hdvault_keystore::{
    AuthPrompt, FileKeyValueStore, HdVault, ProtectionLevel, SoftwareKeyProvisioner,
};
use zeroize::Zeroizing;

use crate::config::CliConfig;
use crate::prompt::TerminalPrompt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Has,
    List,
    Create { level: Option<ProtectionLevel> },
    Import { level: Option<ProtectionLevel> },
    Delete { label: String },
    Level { label: String },
    ValidateMnemonic,
    Derive { label: String, path: Option<String> },
    SignTransaction { label: String, payload_hex: String, path: Option<String> },
    SignMessage { label: String, message: String, path: Option<String> },
    SignJwt { label: String, signing_input: String, path: Option<String> },
    Reveal { label: String },
}

fn main() -> Result<()> {
    // Keep seed material out of core files
    hdvault_core::memory::disable_core_dumps();

    // Parse CLI args
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut config_path = PathBuf::from("hdvault.toml");
    let mut validate_only = false;
    let mut level: Option<ProtectionLevel> = None;
    let mut path: Option<String> = None;
    let mut positional: Vec<String> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                let value = args.get(i).context("--config requires a path argument")?;
                config_path = PathBuf::from(value);
            }
            "--level" | "-l" => {
                i += 1;
                let value = args.get(i).context("--level requires a value")?;
                level = Some(value.parse().map_err(anyhow::Error::msg)?);
            }
            "--path" | "-p" => {
                i += 1;
                path = Some(args.get(i).context("--path requires a value")?.clone());
            }
            "--validate" => {
                validate_only = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--version" | "-V" => {
                println!("hdvault {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            other if other.starts_with('-') => {
                anyhow::bail!("Unknown argument: {}", other);
            }
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    // Load config
    let mut cli_config = CliConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    // Apply env overrides
    let ignored_overrides = cli_config.apply_env_overrides();

    // Validate
    cli_config
        .validate()
        .context("Configuration validation failed")?;

    // Init logger
    env_logger::Builder::new()
        .parse_filters(&cli_config.vault.log_level)
        .init();
    for warning in &ignored_overrides {
        log::warn!("{}", warning);
    }

    if validate_only {
        println!("Configuration is valid.");
        println!("  Store:          {}", cli_config.vault.store_path.display());
        println!("  Default level:  {}", cli_config.protection.default_level);
        println!(
            "  Unlock window:  {} secs",
            cli_config.protection.lockscreen_validity_secs
        );
        println!("  Root path:      {}", cli_config.derivation.root_path);
        println!("  Default path:   {}", cli_config.derivation.default_path);
        return Ok(());
    }

    let command = parse_command(&positional, level, path)?;

    let store = Arc::new(
        FileKeyValueStore::open(&cli_config.vault.store_path).with_context(|| {
            format!(
                "Failed to open store {}",
                cli_config.vault.store_path.display()
            )
        })?,
    );
    let keys = Arc::new(SoftwareKeyProvisioner::persistent(store.clone()));
    let surface = Arc::new(TerminalPrompt::new(keys.clone()));
    let vault = HdVault::new(keys, surface, store, cli_config.vault_options())
        .context("Failed to initialize vault")?;
    log::debug!("Using store {}", cli_config.vault.store_path.display());

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    rt.block_on(run(&vault, &cli_config, command))
}

fn parse_command(
    positional: &[String],
    level: Option<ProtectionLevel>,
    path: Option<String>,
) -> Result<Command> {
    let (name, rest) = positional
        .split_first()
        .context("No command given (see --help)")?;
    let arg = |n: usize, what: &str| -> Result<String> {
        rest.get(n)
            .cloned()
            .with_context(|| format!("{} requires <{}>", name, what))
    };

    let command = match name.as_str() {
        "has" => Command::Has,
        "list" => Command::List,
        "create" => Command::Create { level },
        "import" => Command::Import { level },
        "delete" => Command::Delete {
            label: arg(0, "label")?,
        },
        "level" => Command::Level {
            label: arg(0, "label")?,
        },
        "validate-mnemonic" => Command::ValidateMnemonic,
        "derive" => Command::Derive {
            label: arg(0, "label")?,
            path,
        },
        "sign-tx" => Command::SignTransaction {
            label: arg(0, "label")?,
            payload_hex: arg(1, "hex payload")?,
            path,
        },
        "sign-message" => Command::SignMessage {
            label: arg(0, "label")?,
            message: arg(1, "message")?,
            path,
        },
        "sign-jwt" => Command::SignJwt {
            label: arg(0, "label")?,
            signing_input: arg(1, "signing input")?,
            path,
        },
        "reveal" => Command::Reveal {
            label: arg(0, "label")?,
        },
        other => anyhow::bail!("Unknown command: {}", other),
    };
    Ok(command)
}

fn read_phrase() -> Result<Zeroizing<String>> {
    let mut line = Zeroizing::new(String::new());
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read mnemonic from stdin")?;
    Ok(line)
}

async fn run(vault: &HdVault, config: &CliConfig, command: Command) -> Result<()> {
    let default_level = config.protection.default_level;
    let account_path = |path: Option<String>| {
        path.unwrap_or_else(|| config.derivation.default_path.clone())
    };

    match command {
        Command::Has => println!("{}", vault.has_seed().await?),
        Command::List => {
            for label in vault.list_seeds().await? {
                println!("{}", label);
            }
        }
        Command::Create { level } => {
            let identity = vault
                .create_seed(level.unwrap_or(default_level))
                .await
                .context("Failed to create seed")?;
            println!("{}", serde_json::to_string_pretty(&identity)?);
        }
        Command::Import { level } => {
            let phrase = read_phrase()?;
            let identity = vault
                .import_seed(level.unwrap_or(default_level), &phrase)
                .await
                .context("Failed to import seed")?;
            println!("{}", serde_json::to_string_pretty(&identity)?);
        }
        Command::Delete { label } => {
            vault.delete_seed(&label).await?;
            println!("Deleted {}", label);
        }
        Command::Level { label } => println!("{}", vault.protection_level(&label).await?),
        Command::ValidateMnemonic => {
            let phrase = read_phrase()?;
            println!("{}", vault.validate_mnemonic(&phrase));
        }
        Command::Derive { label, path } => {
            let account = vault
                .derive_address(&label, &account_path(path), "Derive address".into())
                .await?;
            println!("{}", serde_json::to_string_pretty(&account)?);
        }
        Command::SignTransaction {
            label,
            payload_hex,
            path,
        } => {
            let payload = hex::decode(payload_hex.trim_start_matches("0x"))
                .context("Transaction payload is not hex")?;
            let signature = vault
                .sign_transaction(&label, &account_path(path), &payload, "Sign transaction".into())
                .await?;
            println!("{}", signature.to_hex());
        }
        Command::SignMessage {
            label,
            message,
            path,
        } => {
            let signature = vault
                .sign_message(
                    &label,
                    &account_path(path),
                    message.as_bytes(),
                    AuthPrompt::from("Sign message"),
                )
                .await?;
            println!("{}", signature.to_hex());
        }
        Command::SignJwt {
            label,
            signing_input,
            path,
        } => {
            let signature = vault
                .sign_jwt(
                    &label,
                    &account_path(path),
                    signing_input.as_bytes(),
                    "Sign in".into(),
                )
                .await?;
            println!("{}.{}", signing_input, signature.to_jose());
        }
        Command::Reveal { label } => {
            let phrase = vault
                .reveal_seed_phrase(&label, "Show recovery phrase".into())
                .await?;
            println!("{}", phrase.as_str());
        }
    }
    Ok(())
}

fn print_help() {
    println!(
        r#"hdvault: HD seed vault

USAGE:
    hdvault [OPTIONS] <COMMAND> [ARGS]

COMMANDS:
    has                              Whether any seed is stored
    list                             List seed labels
    create                           Generate and store a new 12-word seed
    import                           Store the mnemonic read from stdin
    delete <label>                   Delete a seed
    level <label>                    Show a seed's protection level
    validate-mnemonic                Check the mnemonic read from stdin
    derive <label>                   Show the address at --path
    sign-tx <label> <hex>            Sign a raw transaction payload
    sign-message <label> <message>   Sign an EIP-191 personal message
    sign-jwt <label> <input>         Sign a JWT signing input (ES256K-R)
    reveal <label>                   Show the recovery phrase

OPTIONS:
    -c, --config <PATH>   Config file path (default: hdvault.toml)
    -l, --level <LEVEL>   OPEN, LOCKSCREEN or BIOMETRIC (create/import)
    -p, --path <PATH>     Derivation path (derive/sign-*)
    --validate            Validate config and exit
    -h, --help            Show this help message
    -V, --version         Show version

ENVIRONMENT VARIABLES (override config file):
    HDVAULT_STORE_PATH            Store file path
    HDVAULT_LOG_LEVEL             Log level (error/warn/info/debug/trace)
    HDVAULT_DEFAULT_LEVEL         Protection level for create/import
    HDVAULT_LOCKSCREEN_VALIDITY   Lock-screen unlock window in seconds
    HDVAULT_DEFAULT_PATH          Derivation path for derive/sign-*
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command(&args(&["list"]), None, None).unwrap(), Command::List);
        assert_eq!(
            parse_command(&args(&["create"]), Some(ProtectionLevel::Open), None).unwrap(),
            Command::Create {
                level: Some(ProtectionLevel::Open)
            }
        );
        assert_eq!(
            parse_command(
                &args(&["sign-message", "0xabc", "hello"]),
                None,
                Some("m/0".into())
            )
            .unwrap(),
            Command::SignMessage {
                label: "0xabc".into(),
                message: "hello".into(),
                path: Some("m/0".into()),
            }
        );
    }

    #[test]
    fn test_parse_command_errors() {
        assert!(parse_command(&[], None, None).is_err());
        assert!(parse_command(&args(&["sign-tx", "0xabc"]), None, None).is_err());
        assert!(parse_command(&args(&["frobnicate"]), None, None).is_err());
    }
}
