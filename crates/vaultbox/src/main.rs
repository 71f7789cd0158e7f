//! vaultbox - Versioned secret store
//!
//! Commands:
//! - init: Create the store and its git audit log
//! - ls: List secret names
//! - get <NAME>: Decrypt and print the newest version
//! - set <NAME>: Encrypt stdin (up to EOF) as a new version
//! - gen [--length N]: Print a random secret
//! - versions <NAME>: List a secret's version ids
//! - log [-n N]: Show recent audit entries

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vaultbox::{codec, generator, Config, InitOutcome, Vault};

#[derive(Parser)]
#[command(name = "vaultbox")]
#[command(about = "Versioned secret store - every write kept, encrypted, and committed to git")]
#[command(version)]
#[command(after_help = r#"LAYOUT:
    <dir>/<name>/<UTC timestamp>   one encrypted file per version
    <dir>/.git                     audit trail, one commit per write

CONFIG (~/.config/vaultbox/config.toml):
    dir = "~/Dropbox/vaultbox"
    key = "age1..."                recipient (gpg key id with codec = "gpg")
    codec = "age"                  or "gpg"

LEAKS:
    Names, version counts, approximate sizes and timestamps are visible
    without the key."#)]
struct Cli {
    /// Config file (default: ~/.config/vaultbox/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store directory and audit log
    Init,

    /// List stored secret names
    #[command(alias = "list")]
    Ls {
        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Decrypt and print the newest version of a secret
    #[command(alias = "read")]
    Get {
        /// Don't print trailing newline (useful for piping)
        #[arg(short = 'n')]
        no_newline: bool,
        /// Secret name
        name: String,
    },

    /// Store stdin (read up to EOF) as a new version of a secret
    #[command(alias = "write")]
    Set {
        /// Secret name
        name: String,
    },

    /// Print a random secret from [A-Za-z0-9_]
    #[command(alias = "generate")]
    Gen {
        /// Number of characters
        #[arg(short, long, default_value_t = generator::DEFAULT_LENGTH)]
        length: usize,
    },

    /// List every version id of a secret, oldest first
    Versions {
        /// Secret name
        name: String,
    },

    /// Show recent audit log entries
    Log {
        /// Number of entries
        #[arg(short = 'n', default_value_t = 20)]
        count: usize,
    },

    /// Anything else falls back to listing
    #[command(external_subcommand)]
    Unknown(Vec<String>),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let vault = Vault::from_config(&config);

    run(
        cli.command,
        &vault,
        &config,
        &mut io::stdout().lock(),
        &mut io::stderr(),
    )
}

/// Dispatch one command, writing results to `out` and notices to `err`
fn run(
    command: Option<Commands>,
    vault: &Vault,
    config: &Config,
    out: &mut impl Write,
    err: &mut impl Write,
) -> Result<()> {
    match command {
        Some(Commands::Init) => cmd_init(vault, out, err),
        Some(Commands::Ls { json }) => cmd_ls(vault, json, out),
        Some(Commands::Get { no_newline, name }) => {
            cmd_get(vault, config, &name, no_newline, out, err)
        }
        Some(Commands::Set { name }) => cmd_set(vault, config, &name, out, err),
        Some(Commands::Gen { length }) => cmd_gen(length, out),
        Some(Commands::Versions { name }) => cmd_versions(vault, &name, out),
        Some(Commands::Log { count }) => cmd_log(vault, count, out),
        Some(Commands::Unknown(_)) | None => {
            // Default to listing secrets
            let result = cmd_ls(vault, false, out);
            writeln!(err, "{}", USAGE)?;
            result
        }
    }
}

const USAGE: &str = "vaultbox [init|ls|get|set|gen|versions|log] [name]";

/// Initialize the store
fn cmd_init(vault: &Vault, out: &mut impl Write, err: &mut impl Write) -> Result<()> {
    match vault.init()? {
        InitOutcome::AlreadyExists => {
            writeln!(err, "{} already exists", vault.root().display())?;
        }
        InitOutcome::AuditLogCreated => {
            writeln!(
                err,
                "{} already exists; created its missing audit log",
                vault.root().display()
            )?;
        }
        InitOutcome::Created => {
            writeln!(out, "success: Store initialized at {}", vault.root().display())?;
        }
    }

    Ok(())
}

/// List all secret names
fn cmd_ls(vault: &Vault, json: bool, out: &mut impl Write) -> Result<()> {
    let mut names = vault.list()?;
    names.sort();

    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&names)?)?;
        return Ok(());
    }

    if !names.is_empty() {
        writeln!(out, "{}", names.join("\n"))?;
    }

    Ok(())
}

/// Decrypt and print a secret
fn cmd_get(
    vault: &Vault,
    config: &Config,
    name: &str,
    no_newline: bool,
    out: &mut impl Write,
    err: &mut impl Write,
) -> Result<()> {
    let path = vault.latest_path(name)?;
    writeln!(err, "Reading {}...", path.display())?;

    let codec = codec::from_config(config)?;
    let plaintext = vault.read_version(&path, codec.as_ref())?;

    out.write_all(&plaintext)?;
    if !no_newline && !plaintext.ends_with(b"\n") {
        out.write_all(b"\n")?;
    }
    out.flush()?;

    Ok(())
}

/// Store stdin as a new version
fn cmd_set(
    vault: &Vault,
    config: &Config,
    name: &str,
    out: &mut impl Write,
    err: &mut impl Write,
) -> Result<()> {
    let codec = codec::from_config(config)?;

    writeln!(err, "Reading data up to EOF...")?;
    let mut plaintext = vec![];
    io::stdin()
        .read_to_end(&mut plaintext)
        .context("Failed to read secret from stdin")?;

    vault.write(name, &plaintext, codec.as_ref())?;
    writeln!(out, "Stored as {}", name)?;

    Ok(())
}

/// Print a random secret
fn cmd_gen(length: usize, out: &mut impl Write) -> Result<()> {
    writeln!(out, "{}", generator::generate(length)?)?;
    Ok(())
}

/// List a secret's versions
fn cmd_versions(vault: &Vault, name: &str, out: &mut impl Write) -> Result<()> {
    for version in vault.versions(name)? {
        writeln!(out, "{}", version)?;
    }
    Ok(())
}

/// Show the audit trail
fn cmd_log(vault: &Vault, count: usize, out: &mut impl Write) -> Result<()> {
    for entry in vault.history(count)? {
        writeln!(out, "{}", entry)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Config pointing at a store with two secrets, one of them versioned twice
    fn test_store(tmp: &TempDir) -> Config {
        let root = tmp.path().join("store");
        for (name, version) in [
            ("email", "2024-05-01T12:00:00Z"),
            ("email", "2024-05-02T12:00:00Z"),
            ("bank", "2024-05-01T12:00:00Z"),
        ] {
            fs::create_dir_all(root.join(name)).unwrap();
            fs::write(root.join(name).join(version), b"ciphertext").unwrap();
        }
        fs::create_dir(root.join(".git")).unwrap();

        Config {
            dir: root,
            ..Config::default()
        }
    }

    fn run_args(args: &[&str], config: &Config) -> (Result<()>, String, String) {
        let cli = Cli::try_parse_from(args).unwrap();
        let vault = Vault::from_config(config);
        let mut out = vec![];
        let mut err = vec![];
        let result = run(cli.command, &vault, config, &mut out, &mut err);
        (
            result,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn test_cli_parse() {
        let cli = Cli::try_parse_from(["vaultbox", "init"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Init)));

        let cli = Cli::try_parse_from(["vaultbox", "set", "email"]).unwrap();
        if let Some(Commands::Set { name }) = cli.command {
            assert_eq!(name, "email");
        } else {
            panic!("Expected Set command");
        }

        let cli = Cli::try_parse_from(["vaultbox", "get", "-n", "email"]).unwrap();
        if let Some(Commands::Get { name, no_newline }) = cli.command {
            assert_eq!(name, "email");
            assert!(no_newline);
        } else {
            panic!("Expected Get command");
        }

        let cli = Cli::try_parse_from(["vaultbox"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_aliases() {
        let cli = Cli::try_parse_from(["vaultbox", "read", "email"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Get { .. })));

        let cli = Cli::try_parse_from(["vaultbox", "write", "email"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Set { .. })));

        let cli = Cli::try_parse_from(["vaultbox", "list"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Ls { json: false })));
    }

    #[test]
    fn test_cli_gen_length() {
        let cli = Cli::try_parse_from(["vaultbox", "gen"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Gen { length: 12 })));

        let cli = Cli::try_parse_from(["vaultbox", "gen", "--length", "32"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Gen { length: 32 })));
    }

    #[test]
    fn test_cli_global_config() {
        let cli = Cli::try_parse_from(["vaultbox", "ls", "--config", "/tmp/vb.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/vb.toml")));
    }

    #[test]
    fn test_unknown_verb_keeps_config() {
        let cli =
            Cli::try_parse_from(["vaultbox", "--config", "/tmp/vb.toml", "frobnicate"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/vb.toml")));
        assert!(matches!(cli.command, Some(Commands::Unknown(ref args)) if args[0] == "frobnicate"));
    }

    #[test]
    fn test_unknown_verb_lists_and_prints_usage() {
        let tmp = TempDir::new().unwrap();
        let config = test_store(&tmp);

        let (result, out, err) = run_args(&["vaultbox", "frobnicate"], &config);
        result.unwrap();
        assert_eq!(out, "bank\nemail\n");
        assert_eq!(err, format!("{}\n", USAGE));
    }

    #[test]
    fn test_missing_verb_lists_and_prints_usage() {
        let tmp = TempDir::new().unwrap();
        let config = test_store(&tmp);

        let (result, out, err) = run_args(&["vaultbox"], &config);
        result.unwrap();
        assert_eq!(out, "bank\nemail\n");
        assert_eq!(err.lines().count(), 1);
    }

    #[test]
    fn test_ls_json_and_versions() {
        let tmp = TempDir::new().unwrap();
        let config = test_store(&tmp);

        let (result, out, _) = run_args(&["vaultbox", "ls", "--json"], &config);
        result.unwrap();
        let names: Vec<String> = serde_json::from_str(&out).unwrap();
        assert_eq!(names, vec!["bank", "email"]);

        let (result, out, _) = run_args(&["vaultbox", "versions", "email"], &config);
        result.unwrap();
        assert_eq!(out, "2024-05-01T12:00:00Z\n2024-05-02T12:00:00Z\n");
    }

    #[test]
    fn test_init_existing_store_reports() {
        let tmp = TempDir::new().unwrap();
        let config = test_store(&tmp);

        let (result, out, err) = run_args(&["vaultbox", "init"], &config);
        result.unwrap();
        assert!(out.is_empty());
        assert!(err.ends_with("already exists\n"));
    }

    #[test]
    fn test_gen_prints_secret() {
        let tmp = TempDir::new().unwrap();
        let config = test_store(&tmp);

        let (result, out, _) = run_args(&["vaultbox", "gen", "-l", "20"], &config);
        result.unwrap();
        assert_eq!(out.trim_end().len(), 20);
    }
}
