//! urlseal -- mint and check tamper-evident, self-expiring URLs.
//!
//! Results go to stdout, logs to stderr.  `verify` and `check` exit with
//! status 1 when the URL is rejected, so the tool can gate shell scripts.

use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::info;

use urlseal::config::{load_config, Config, LoggingConfig, Salt};
use urlseal::{UrlExpirer, UrlSigner};

/// Command-line arguments for urlseal.
#[derive(Parser, Debug)]
#[command(
    name = "urlseal",
    version,
    about = "Mint and check tamper-evident, self-expiring URLs"
)]
struct Cli {
    /// Path to a YAML configuration file.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the configured salt.
    #[arg(long)]
    salt: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append a hash parameter to a URL.
    Protect { url: String },

    /// Check a URL's hash parameter.
    Verify { url: String },

    /// Stamp a URL with its issue time, then protect it.
    Expire {
        url: String,

        /// Issue time (RFC 3339); defaults to now.
        #[arg(long)]
        issued_at: Option<String>,
    },

    /// Check whether a stamped URL is still valid.
    Check {
        url: String,

        /// Validity window in seconds; defaults to `expiry.valid_for_seconds`.
        #[arg(long)]
        valid_for: Option<u64>,

        /// Evaluate at this time (RFC 3339) instead of now.
        #[arg(long)]
        now: Option<String>,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print a new random salt.
    GenerateSalt,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    init_tracing(&config.logging);
    urlseal::metrics::describe_metrics();

    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path);
    }
    if let Some(salt) = cli.salt {
        config.signer.salt = Salt::new(salt)?;
    }

    run(cli.command, &config)
}

/// Execute one subcommand.  Only the commands that sign or check URLs
/// need a salt.
fn run(command: Command, config: &Config) -> anyhow::Result<ExitCode> {
    match command {
        Command::GenerateSalt => {
            println!("{}", Salt::generate().expose());
            Ok(ExitCode::SUCCESS)
        }
        Command::Protect { url } => {
            let signer = UrlSigner::from_config(&config.signer)?;
            println!("{}", signer.protect(&url)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify { url } => {
            let signer = UrlSigner::from_config(&config.signer)?;
            let valid = signer.verify(&url)?;
            println!("{}", if valid { "valid" } else { "invalid" });
            Ok(exit_code(valid))
        }
        Command::Expire { url, issued_at } => {
            let issued_at = match issued_at {
                Some(raw) => parse_time("--issued-at", &raw)?,
                None => Utc::now(),
            };
            let signer = UrlSigner::from_config(&config.signer)?;
            let expirer = UrlExpirer::from_config(&signer, &config.expiry)?;
            println!("{}", expirer.expire_at(&url, issued_at)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Check {
            url,
            valid_for,
            now,
            json,
        } => {
            let valid_for = valid_for.unwrap_or(config.expiry.valid_for_seconds);
            let now = match now {
                Some(raw) => parse_time("--now", &raw)?,
                None => Utc::now(),
            };
            let signer = UrlSigner::from_config(&config.signer)?;
            let expirer = UrlExpirer::from_config(&signer, &config.expiry)?;
            let status = expirer.check_at(&url, valid_for, now)?;
            info!(status = status.as_str(), "Checked {}", url);

            if json {
                let issued_at = expirer.issued_at(&url)?.map(|t| t.to_rfc3339());
                let report = serde_json::json!({
                    "url": url,
                    "status": status.as_str(),
                    "expired": status.is_expired(),
                    "valid_for_seconds": valid_for,
                    "issued_at": issued_at,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", status.as_str());
            }
            Ok(exit_code(!status.is_expired()))
        }
    }
}

/// Initialize tracing / logging on stderr.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn parse_time(flag: &str, raw: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| anyhow::anyhow!("invalid {flag} '{raw}': {e}"))
}

fn exit_code(accepted: bool) -> ExitCode {
    if accepted {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}
