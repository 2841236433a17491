mod app;
mod subject;

use app::{App, RunOptions};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(author, version, about = "Wheel-turning training sessions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a training session
    Run {
        /// Settings file
        #[arg(long, default_value = "whex_settings.json")]
        config: PathBuf,
        /// Folder the session record is written to
        #[arg(long, default_value = "sessions")]
        session_dir: PathBuf,
        /// Session id; defaults to the local start time
        #[arg(long)]
        session_name: Option<String>,
        /// Seed for every random draw of the session
        #[arg(long)]
        seed: Option<u64>,
        /// Override the configured trial count
        #[arg(long)]
        trials: Option<usize>,
        /// Write the last rendered frame to this PNG
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Add the post-session weight to a written session record
    RecordWeight {
        /// Session id the record was written under
        session_name: String,
        /// Weight in grams
        grams: f64,
        #[arg(long, default_value = "sessions")]
        session_dir: PathBuf,
    },
    /// Write a settings file with default values
    InitConfig {
        #[arg(default_value = "whex_settings.json")]
        path: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    Registry::default().with(filter).with(fmt_layer).init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            session_dir,
            session_name,
            seed,
            trials,
            snapshot,
        } => {
            let app = App::new(RunOptions {
                config,
                session_dir,
                session_name,
                seed,
                trials,
                snapshot,
            })?;
            app.run()?;
        }
        Command::RecordWeight {
            session_name,
            grams,
            session_dir,
        } => app::record_weight(&session_dir, &session_name, grams)?,
        Command::InitConfig { path, force } => app::init_config(&path, force)?,
    }

    Ok(())
}
