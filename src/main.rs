use std::env;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate::hardware::{CameraSource, OnnxProvider};
use facegate::storage::{ProfileRecord, ProfileStore};
use facegate::{config, identity, run_enrollment, run_verification};
use log::{info, warn};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "facegate")]
#[command(
    version,
    about = "Face enrollment and verification gate for attendance marking"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a face profile from the camera
    Enroll {
        /// Subject to enroll (defaults to current user)
        #[arg(short, long)]
        subject: Option<String>,
    },
    /// Verify a live face against the enrolled profile
    Verify {
        /// Subject to verify (defaults to current user)
        #[arg(short, long)]
        subject: Option<String>,
        /// Override the configured match tolerance (lower is stricter)
        #[arg(short, long)]
        tolerance: Option<f64>,
        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the stored profile for a subject
    Show {
        /// Subject to show (defaults to current user)
        #[arg(short, long)]
        subject: Option<String>,
    },
    /// Remove the enrolled profile for a subject
    Purge {
        /// Subject to purge (defaults to current user)
        #[arg(short, long)]
        subject: Option<String>,
    },
    /// Open config file in editor
    Config,
}

#[derive(Serialize)]
struct VerifyReport<'a> {
    subject: &'a str,
    verified: bool,
    tolerance: f64,
    samples: usize,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(None)?;
    let store = ProfileStore::default();

    let resolve = |subject: Option<String>| -> Result<String> {
        let subject = match subject {
            Some(subject) => subject,
            None => identity::default_subject()?,
        };
        identity::validate_subject(&subject)?;
        Ok(subject)
    };

    match cli.command {
        Commands::Enroll { subject } => enroll(&cfg, &store, &resolve(subject)?),
        Commands::Verify {
            subject,
            tolerance,
            json,
        } => verify(&cfg, &store, &resolve(subject)?, tolerance, json),
        Commands::Show { subject } => show(&store, &resolve(subject)?),
        Commands::Purge { subject } => purge(&store, &resolve(subject)?),
        Commands::Config => open_config(),
    }
}

fn enroll(cfg: &config::Config, store: &ProfileStore, subject: &str) -> Result<()> {
    info!("Enrolling subject: {}", subject);
    info!("Opening camera: {}", cfg.camera);

    let mut camera = CameraSource::open(&cfg.camera)?;
    let mut provider = OnnxProvider::from_config(cfg)?;

    info!("Camera opened. Follow the pose instructions.");
    let profile = run_enrollment(&mut camera, &mut provider, &cfg.enrollment_options())
        .context("Enrollment failed")?;

    let record = ProfileRecord::new(subject, profile)?;
    if record.degraded {
        warn!(
            "Only {} samples captured; consider re-enrolling in better conditions",
            record.samples
        );
    }
    let path = store.save(&record).context("Failed to save face profile")?;

    info!("✓ Face enrolled for {} ({})", subject, path.display());
    Ok(())
}

fn verify(
    cfg: &config::Config,
    store: &ProfileStore,
    subject: &str,
    tolerance: Option<f64>,
    json: bool,
) -> Result<()> {
    info!("Verifying subject: {}", subject);

    let record = store
        .load(subject)
        .context("Failed to load face profile")?
        .with_context(|| format!("No enrolled profile for {subject}. Run 'enroll' first."))?;

    let params = cfg.verification_params(tolerance);
    let mut camera = CameraSource::open(&cfg.camera)?;
    let mut provider = OnnxProvider::from_config(cfg)?;

    let verified = run_verification(
        &mut camera,
        &mut provider,
        &record.profile,
        &params,
        cfg.verification_pacing(),
    )?;

    if json {
        let report = VerifyReport {
            subject,
            verified,
            tolerance: params.tolerance,
            samples: record.samples,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if verified {
        info!("✓ Face verified for {}", subject);
        Ok(())
    } else {
        anyhow::bail!("Verification failed: no consistent match for {}", subject)
    }
}

fn show(store: &ProfileStore, subject: &str) -> Result<()> {
    match store.load(subject)? {
        Some(record) => {
            println!("subject:  {}", record.subject);
            println!("id:       {}", record.id);
            println!("samples:  {}", record.samples);
            println!("degraded: {}", record.degraded);
        }
        None => println!("No enrolled profile for {subject}"),
    }
    Ok(())
}

fn purge(store: &ProfileStore, subject: &str) -> Result<()> {
    info!("Purging enrolled profile for: {}", subject);

    if store.purge(subject).context("Failed to purge face profile")? {
        info!("✓ Profile purged for {}", subject);
    } else {
        info!("Nothing stored for {}", subject);
    }
    Ok(())
}

fn open_config() -> Result<()> {
    let config_path = config::CONFIG_PATH.as_os_str();
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
