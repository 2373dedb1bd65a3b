use alexandria::core::config::{Config, DEFAULT_CONFIG_FILE};
use alexandria::core::io::{NativeStorage, Storage};
use alexandria::services::stage::{StageResult, PARAM_SPEAKER};
use alexandria::services::tasks::{PidTaskRegistry, TaskName, TaskRegistry};
use alexandria::services::workflow::WorkflowManager;
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "alexandria")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Turns a book into a multi-voice audiobook, one resumable step at a time", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Step through the pipeline interactively (default)
    Run,

    /// Show the current stage and the actions it offers
    Status {
        /// Output in JSON format
        #[arg(short, long)]
        json: bool,
    },

    /// Delete everything the pipeline produced
    Reset {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Set up the voice of one speaker
    #[command(name = "configure-voice")]
    ConfigureVoice {
        /// Speaker name (prompted for if omitted)
        speaker: Option<String>,
    },

    /// Stop every running task
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    if !cli.config.exists() {
        config.save(&cli.config)?;
        info!("Wrote default configuration to {:?}", cli.config);
    }

    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new(&config.workspace));
    let tasks: Arc<dyn TaskRegistry> =
        Arc::new(PidTaskRegistry::new(storage.clone(), config.run_folder.clone()));
    let manager = WorkflowManager::new(config, storage, tasks);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => manager.run().await?,
        Commands::Status { json } => {
            let result = manager.observe().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_status(&result);
            }
        }
        Commands::Reset { yes } => {
            let confirmed = yes
                || inquire::Confirm::new("Delete the script, voices and audiobook?")
                    .with_default(false)
                    .prompt()?;
            if confirmed {
                manager.reset().await?;
                println!("Workspace reset.");
            }
        }
        Commands::ConfigureVoice { speaker } => {
            let mut params = BTreeMap::new();
            if let Some(speaker) = speaker {
                params.insert(PARAM_SPEAKER.to_string(), speaker);
            }
            manager.run_task(TaskName::ConfigureVoice, &params).await?
        }
        Commands::Stop => manager.stop_all().await?,
    }

    Ok(())
}

fn print_status(result: &StageResult) {
    println!("Stage: {}", result.stage);
    for action in &result.actions {
        let marker = if action.default { "*" } else { "-" };
        println!("  {} {}", marker, action.label);
    }
}
