//! TouristIdentity CLI: the `tid` command.
//!
//! Runs the expiry reconciler (scheduled or one-shot), submits
//! registrations, inspects records on the ledger, and manages the signer
//! keystore.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use tourist_identity::config::ENV_KEYSTORE_PASSPHRASE;
use tourist_identity::storage::{read_signer_address, save_signer};
use tourist_identity::time::{now_secs, secs_to_rfc3339};
use tourist_identity::{
    classify, is_trackable, parse_duration, EngineConfig, EnumerationStrategy, IdentityRecord,
    Registration, Scheduler, SignerKeyPair, StakeholderRole, SubmissionReceipt, TouristId,
};

// ── Passphrase helper ─────────────────────────────────────────────────────────

fn read_passphrase(prompt: &str) -> Result<String> {
    if let Ok(passphrase) = std::env::var(ENV_KEYSTORE_PASSPHRASE) {
        return Ok(passphrase);
    }
    eprint!("{prompt}");
    let mut passphrase = String::new();
    std::io::stdin()
        .read_line(&mut passphrase)
        .context("failed to read passphrase")?;
    Ok(passphrase.trim().to_string())
}

// ── Argument parsing helpers ──────────────────────────────────────────────────

fn duration_arg(s: &str) -> std::result::Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

// ── CLI structure ─────────────────────────────────────────────────────────────

/// TouristIdentity CLI: reconcile expired tourist identities on the ledger.
#[derive(Parser, Debug)]
#[command(
    name = "tid",
    about = "TouristIdentity reconciler CLI",
    version,
    long_about = "tid: TouristIdentity reconciler CLI\n\nInactivates expired tourist digital identities on the ledger on a fixed\ncadence, registers new identities, and manages the signer keystore."
)]
struct Cli {
    /// JSON configuration file
    #[arg(long, short, global = true, env = "TID_CONFIG")]
    config: Option<PathBuf>,

    /// Ledger endpoint (http(s):// gateway or file:// snapshot)
    #[arg(long, global = true)]
    ledger_url: Option<String>,

    /// Registry (contract) address
    #[arg(long, global = true)]
    registry: Option<String>,

    /// Signer keystore file
    #[arg(long, global = true)]
    keystore: Option<PathBuf>,

    /// Per-call timeout, e.g. 15s
    #[arg(long, global = true, value_parser = duration_arg)]
    call_timeout: Option<Duration>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the reconciler on a fixed interval until Ctrl-C
    Run {
        /// Interval between cycles, e.g. 5m
        #[arg(long, value_parser = duration_arg)]
        interval: Option<Duration>,

        /// Enumeration strategy: direct or event-replay
        #[arg(long)]
        strategy: Option<EnumerationStrategy>,
    },

    /// Run exactly one reconciliation cycle and print its summary
    Once {
        /// Enumeration strategy: direct or event-replay
        #[arg(long)]
        strategy: Option<EnumerationStrategy>,
    },

    /// Register a new tourist identity
    Register {
        /// Hash of the off-ledger KYC artifact
        #[arg(long)]
        kyc_hash: String,

        /// Validity period, e.g. 7d
        #[arg(long, default_value = "7d", value_parser = duration_arg)]
        duration: Duration,

        /// Identity key (minted when omitted)
        #[arg(long)]
        tourist_id: Option<String>,

        /// Stakeholder role code (0 = tour operator)
        #[arg(long, default_value = "0")]
        stakeholder: u8,
    },

    /// Fetch and display one identity record
    Show {
        /// Identity key
        tourist_id: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List every identity key on the ledger
    List {
        /// Enumeration strategy: direct or event-replay
        #[arg(long)]
        strategy: Option<EnumerationStrategy>,
    },

    /// Create an encrypted signer keystore
    Keygen {
        /// Output path of the keystore
        #[arg(long)]
        out: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the configured signer address
    Address,
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let result = match &cli.command {
        Commands::Run { interval, strategy } => cmd_run(&cli, *interval, *strategy).await,
        Commands::Once { strategy } => cmd_once(&cli, *strategy).await,
        Commands::Register {
            kyc_hash,
            duration,
            tourist_id,
            stakeholder,
        } => {
            cmd_register(
                &cli,
                kyc_hash,
                *duration,
                tourist_id.as_deref(),
                *stakeholder,
            )
            .await
        }
        Commands::Show { tourist_id, json } => cmd_show(&cli, tourist_id, *json).await,
        Commands::List { strategy } => cmd_list(&cli, *strategy).await,
        Commands::Keygen { out, force } => cmd_keygen(out, *force, cli.verbose),
        Commands::Address => cmd_address(&cli),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

/// Resolve configuration: file, then environment, then global flags.
fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = EngineConfig::resolve(cli.config.as_deref())?;
    if let Some(url) = &cli.ledger_url {
        config.ledger_url = Some(url.clone());
    }
    if let Some(registry) = &cli.registry {
        config.registry_address = Some(registry.clone());
    }
    if let Some(keystore) = &cli.keystore {
        config.keystore = Some(keystore.clone());
    }
    if let Some(timeout) = cli.call_timeout {
        config.call_timeout = timeout;
    }
    Ok(config)
}

// ── Command implementations ───────────────────────────────────────────────────

/// `tid run [--interval D] [--strategy S]`
async fn cmd_run(
    cli: &Cli,
    interval: Option<Duration>,
    strategy: Option<EnumerationStrategy>,
) -> Result<()> {
    let mut config = load_config(cli)?;
    if let Some(interval) = interval {
        config.interval = interval;
    }
    if let Some(strategy) = strategy {
        config.strategy = strategy;
    }

    let reconciler = config.reconciler().context("failed to start reconciler")?;
    let client = reconciler.client().clone();
    let scheduler = Scheduler::new(reconciler, config.interval).start();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    log::info!("shutdown requested");

    let state = scheduler.shutdown().await;
    client.shutdown().await;
    log::info!("scheduler {state:?}");
    Ok(())
}

/// `tid once [--strategy S]`
async fn cmd_once(cli: &Cli, strategy: Option<EnumerationStrategy>) -> Result<()> {
    let mut config = load_config(cli)?;
    if let Some(strategy) = strategy {
        config.strategy = strategy;
    }

    let reconciler = config.reconciler().context("failed to start reconciler")?;
    let summary = reconciler.run_once().await;
    reconciler.client().shutdown().await;

    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.has_errors() {
        return Err(anyhow!(
            "cycle recorded {} error(s)",
            summary.errors.len()
        ));
    }
    Ok(())
}

/// `tid register --kyc-hash H [--duration D] [--tourist-id ID] [--stakeholder N]`
async fn cmd_register(
    cli: &Cli,
    kyc_hash: &str,
    duration: Duration,
    tourist_id: Option<&str>,
    stakeholder: u8,
) -> Result<()> {
    if kyc_hash.trim().is_empty() {
        return Err(anyhow!("kyc hash cannot be empty"));
    }
    let config = load_config(cli)?;
    let client = config.connect().context("failed to connect to ledger")?;

    let id = tourist_id.map(TouristId::from).unwrap_or_else(TouristId::generate);
    let mut registration = Registration::new(id.clone(), kyc_hash, duration.as_secs());
    registration.stakeholder = StakeholderRole::from(stakeholder);

    let receipt = client
        .submit_registration(registration)
        .await
        .with_context(|| format!("registration of {id} failed"));
    client.shutdown().await;

    match receipt? {
        SubmissionReceipt::Confirmed { hash, block } => {
            println!("Registered {id}");
            println!("  Block:    {block}");
            println!("  Tx:       {hash}");
            println!("  Duration: {}s", duration.as_secs());
        }
        SubmissionReceipt::AlreadySettled { .. } => {
            println!("{id} already registered");
        }
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ShowOutput<'a> {
    #[serde(flatten)]
    record: &'a IdentityRecord,
    classification: String,
    trackable: bool,
}

/// `tid show ID [--json]`
async fn cmd_show(cli: &Cli, tourist_id: &str, json: bool) -> Result<()> {
    let config = load_config(cli)?;
    let client = config.connect().context("failed to connect to ledger")?;
    let id = TouristId::from(tourist_id);

    let record = client.fetch_record(&id).await;
    client.shutdown().await;
    let record = record.with_context(|| format!("failed to fetch {id}"))?;

    let now = now_secs();
    let classification = classify(&record, now);
    let trackable = is_trackable(&record, now);

    if json {
        let out = ShowOutput {
            record: &record,
            classification: classification.to_string(),
            trackable,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Tourist: {}", record.tourist_id);
    println!("  Status:        {}", record.status);
    println!("  Registered by: {}", record.registered_by);
    println!("  Stakeholder:   {}", record.stakeholder_role);
    println!("  KYC hash:      {}", record.kyc_hash);
    println!("  Valid from:    {}", secs_to_rfc3339(record.start_time));
    println!("  Valid until:   {}", secs_to_rfc3339(record.end_time));
    println!("  Last update:   {}", secs_to_rfc3339(record.last_update_time));
    println!("  Decision:      {classification}");
    println!("  Trackable:     {}", if trackable { "yes" } else { "no" });
    Ok(())
}

/// `tid list [--strategy S]`
async fn cmd_list(cli: &Cli, strategy: Option<EnumerationStrategy>) -> Result<()> {
    let config = load_config(cli)?;
    let client = config.connect().context("failed to connect to ledger")?;
    let mut cursor = client.enumerate_identities(strategy.unwrap_or(config.strategy));

    let mut count = 0usize;
    let outcome = loop {
        match cursor.next().await {
            Ok(Some(id)) => {
                println!("{id}");
                count += 1;
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    client.shutdown().await;
    outcome.context("enumeration failed")?;

    if cli.verbose {
        eprintln!("{count} identit{}", if count == 1 { "y" } else { "ies" });
    }
    Ok(())
}

/// `tid keygen --out PATH [--force]`
fn cmd_keygen(out: &Path, force: bool, verbose: bool) -> Result<()> {
    if out.exists() && !force {
        return Err(anyhow!(
            "{} already exists (use --force to overwrite)",
            out.display()
        ));
    }

    let passphrase = read_passphrase("Enter passphrase for new keystore: ")?;
    if passphrase.is_empty() {
        return Err(anyhow!("passphrase cannot be empty"));
    }
    if std::env::var(ENV_KEYSTORE_PASSPHRASE).is_err() {
        let confirm = read_passphrase("Confirm passphrase: ")?;
        if passphrase != confirm {
            return Err(anyhow!("passphrases do not match"));
        }
    }

    let signer = SignerKeyPair::generate();
    save_signer(&signer, out, &passphrase).context("failed to save keystore")?;

    println!("Created signer keystore");
    println!("  Address: {}", signer.address());
    println!("  File:    {}", out.display());
    if verbose {
        println!("  Key:     {}", hex::encode(signer.verifying_key().as_bytes()));
    }
    Ok(())
}

/// `tid address`
fn cmd_address(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    // The keystore stores its address in the clear; no passphrase needed.
    let address = match (&config.keystore, &config.signing_key) {
        (Some(path), None) => read_signer_address(path).context("failed to read keystore")?,
        _ => config.signer_source()?.load()?.address(),
    };
    println!("{address}");
    Ok(())
}
