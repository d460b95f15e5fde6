use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use hatch_core::Config;
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "hatch")]
#[command(about = "Build and hot-reload Python web services", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Variant selection shared by several commands.
#[derive(Args, Clone, Debug, Default)]
pub struct VariantArgs {
    /// Select the variant with a PostgreSQL client
    #[arg(long)]
    database_client: bool,

    /// Select a variant by name, bypassing selection
    #[arg(long, conflicts_with = "database_client")]
    variant: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List build variants
    Variants,

    /// Show the build steps for a variant
    Plan {
        #[command(flatten)]
        variant: VariantArgs,
    },

    /// Print the Dockerfile equivalent of a variant's build
    Dockerfile {
        #[command(flatten)]
        variant: VariantArgs,
    },

    /// Build an image from a project directory
    Build {
        /// Project directory
        #[arg(default_value = ".")]
        context: PathBuf,

        #[command(flatten)]
        variant: VariantArgs,

        /// Do not use cached layers
        #[arg(long)]
        no_cache: bool,
    },

    /// Build (if needed) and run a service with hot reload
    Run {
        /// Project directory
        #[arg(default_value = ".")]
        context: PathBuf,

        #[command(flatten)]
        variant: VariantArgs,

        /// Run the stored image without rebuilding
        #[arg(long)]
        no_build: bool,

        /// Seconds between SIGTERM and SIGKILL
        #[arg(long)]
        grace_period: Option<u64>,

        /// Command to run instead of the image entrypoint
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// List built images
    Images,

    /// Manage the layer cache
    #[command(subcommand)]
    Cache(CacheCommands),
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show cache usage
    Stats,

    /// Remove all cached layers
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load()?;
    let level = if cli.verbose { "debug" } else { config.log_level.as_str() };
    if let Err(e) = hatch_core::init_observability(level) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    tracing::debug!(?config, "Loaded configuration");

    match cli.command {
        Commands::Variants => {
            commands::variants(&config)?;
        }

        Commands::Plan { variant } => {
            commands::plan(&config, &variant)?;
        }

        Commands::Dockerfile { variant } => {
            commands::dockerfile(&config, &variant)?;
        }

        Commands::Build { context, variant, no_cache } => {
            commands::build(&config, &context, &variant, no_cache)?;
        }

        Commands::Run { context, variant, no_build, grace_period, command } => {
            let mut config = config;
            if let Some(secs) = grace_period {
                config.grace_period_secs = secs;
            }
            let code = commands::run(&config, &context, &variant, no_build, command).await?;
            std::process::exit(code);
        }

        Commands::Images => {
            commands::images()?;
        }

        Commands::Cache(cache_cmd) => match cache_cmd {
            CacheCommands::Stats => commands::cache::stats(&config)?,
            CacheCommands::Clear => commands::cache::clear(&config)?,
        },
    }

    Ok(())
}
