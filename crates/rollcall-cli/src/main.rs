use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rollcall_core::{
    CancelToken, Contact, EncodingExtractor, Person, PersonStatus, Registry, SessionOutcome,
};
use tracing_subscriber::EnvFilter;

mod config;
mod photos;

use config::Config;
use photos::{PhotoSequence, SidecarExtractor};

#[derive(Parser)]
#[command(name = "rollcall", about = "Face check-in registry and recognition")]
struct Cli {
    /// Registry file (overrides configuration)
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new attendee from one or more photos
    Register {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: Option<String>,
        #[arg(short, long)]
        phone: Option<String>,
        /// Photo with an encoding sidecar (repeatable)
        #[arg(long = "photo", required = true)]
        photos: Vec<PathBuf>,
        /// Encode and approve immediately instead of queueing for approval
        #[arg(long)]
        approve: bool,
    },
    /// Add another photo's encoding to a registered attendee
    AddPhoto { id: u64, photo: PathBuf },
    /// List registrations
    List {
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        #[arg(long)]
        json: bool,
    },
    /// Show one registration
    Show {
        id: u64,
        #[arg(long)]
        json: bool,
    },
    /// Remove a registration
    Remove { id: u64 },
    /// Approve a pending registration
    Approve { id: u64 },
    /// Match a single photo against approved attendees
    Match {
        photo: PathBuf,
        #[arg(long)]
        min_confidence: Option<f32>,
    },
    /// Run a stable recognition session over a sequence of photos
    Session {
        #[arg(required = true)]
        photos: Vec<PathBuf>,
        #[arg(long)]
        min_confidence: Option<f32>,
        #[arg(long)]
        max_attempts: Option<usize>,
        /// Include per-attempt diagnostics
        #[arg(long)]
        verbose: bool,
    },
    /// Write a timestamped registry snapshot to the backup directory
    Backup {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Export the attendee roster (without encodings) as JSON
    Export { path: PathBuf },
    /// Show registry and calibration summary
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Pending,
    Approved,
}

impl From<StatusArg> for PersonStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Pending => PersonStatus::Pending,
            StatusArg::Approved => PersonStatus::Approved,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let registry_path = cli.registry.clone().unwrap_or_else(|| config.registry_path());
    let mut registry = Registry::open_path(&registry_path)
        .with_context(|| format!("opening registry {}", registry_path.display()))?;
    let extractor = SidecarExtractor;

    match cli.command {
        Commands::Register {
            name,
            email,
            phone,
            photos,
            approve,
        } => {
            let contact = Contact { name, email, phone };
            let id = registry.register_pending(contact, photos)?;
            if approve {
                let person = registry.approve(id, &extractor)?;
                println!(
                    "Registered {} (ID: {id}) with {} encoding(s), approved",
                    person.name,
                    person.encodings.len()
                );
            } else {
                println!("Registered {} (ID: {id}), pending approval", registry.get(id)?.name);
            }
        }
        Commands::AddPhoto { id, photo } => {
            let encoding = EncodingExtractor::<std::path::Path>::extract(&extractor, &photo)?
                .with_context(|| format!("no face found in {}", photo.display()))?;
            registry.add_encoding(id, encoding)?;
            println!(
                "Added encoding to ID {id} ({} total)",
                registry.get(id)?.encodings.len()
            );
        }
        Commands::List { status, json } => {
            let people = registry.list(status.map(PersonStatus::from));
            if json {
                println!("{}", serde_json::to_string_pretty(&people)?);
            } else if people.is_empty() {
                println!("No registrations");
            } else {
                for person in people {
                    print_person(person);
                }
            }
        }
        Commands::Show { id, json } => {
            let person = registry.get(id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(person)?);
            } else {
                print_person(person);
                for photo in &person.photos {
                    println!("    photo: {}", photo.display());
                }
            }
        }
        Commands::Remove { id } => {
            let removed = registry.remove(id)?;
            println!("Removed {} (ID: {id})", removed.name);
        }
        Commands::Approve { id } => {
            let person = registry.approve(id, &extractor)?;
            println!(
                "Approved {} (ID: {id}) with {} encoding(s)",
                person.name,
                person.encodings.len()
            );
        }
        Commands::Match {
            photo,
            min_confidence,
        } => {
            let params = config.session_params(min_confidence, None)?;
            let Some(encoding) = EncodingExtractor::<std::path::Path>::extract(&extractor, &photo)?
            else {
                bail!("no face found in {}", photo.display());
            };
            let result =
                registry.match_encoding(&encoding, config.match_params()?, params.min_confidence)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Session {
            photos,
            min_confidence,
            max_attempts,
            verbose,
        } => {
            let cancel = CancelToken::new();
            let session = registry
                .stability_session(
                    config.match_params()?,
                    config.session_params(min_confidence, max_attempts)?,
                )?
                .with_cancel(cancel.clone());
            drop(registry);

            let watcher = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received; cancelling session");
                    watcher.cancel();
                }
            });

            let report = tokio::task::spawn_blocking(move || {
                let mut source = PhotoSequence::new(photos, cancel);
                session.run(&mut source, &extractor)
            })
            .await
            .context("session thread panicked")?;

            let backend = report.outcome.backend_report();
            if verbose {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "result": backend,
                        "attempts": report.attempts,
                    }))?
                );
            } else {
                println!("{}", serde_json::to_string_pretty(&backend)?);
            }
            if matches!(report.outcome, SessionOutcome::Aborted { .. }) {
                std::process::exit(130);
            }
        }
        Commands::Backup { dir } => {
            let dir = dir.unwrap_or_else(|| config.backup_dir());
            let path = registry.backup_to(&dir)?;
            println!("Backup written to {}", path.display());
        }
        Commands::Export { path } => {
            let count = registry.export_roster(&path)?;
            println!("Exported {count} registration(s) to {}", path.display());
        }
        Commands::Status => {
            let pending = registry.list(Some(PersonStatus::Pending)).len();
            let approved = registry.list(Some(PersonStatus::Approved)).len();
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "version": env!("CARGO_PKG_VERSION"),
                    "registry": registry_path.display().to_string(),
                    "pending": pending,
                    "approved": approved,
                    "encoding_dim": registry.dimension(),
                    "accept_threshold": config.accept_threshold,
                    "distance_scale": config.distance_scale,
                    "min_confidence": config.min_confidence,
                    "max_attempts": config.max_attempts,
                }))?
            );
        }
    }

    Ok(())
}

fn print_person(person: &Person) {
    println!(
        "{:>4}  {:<24} {:<9} {} encoding(s)  {}",
        person.id,
        person.name,
        person.status.to_string(),
        person.encodings.len(),
        person.email.as_deref().unwrap_or("-"),
    );
}
