//! cda-core CLI - local CA bootstrap and configuration tooling
//!
//! Offline tool for provisioning the local certificate authority used by
//! the client device authentication core, and for validating/inspecting
//! its configuration.

use cda_core::ca_store::CaStore;
use cda_core::config::Config;
use cda_core::runtime_store::FileRuntimeStore;
use cda_core::traits::RuntimeStore;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "cda-core")]
#[command(about = "Client device authentication core: CA bootstrap and configuration tooling", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate (or reuse) the local CA, printing its fingerprint.
    ///
    /// If a CA already exists at the runtime store location and its type
    /// matches configuration, it is reused unchanged. Otherwise a fresh CA
    /// is generated and the old one is superseded.
    Bootstrap {
        /// Directory backing the runtime store.
        #[arg(long, default_value = "./cda-runtime")]
        runtime_dir: PathBuf,
    },

    /// Print the current CA certificate's fingerprint and validity window.
    ShowCa {
        /// Directory backing the runtime store.
        #[arg(long, default_value = "./cda-runtime")]
        runtime_dir: PathBuf,
    },

    /// Validate configuration file.
    ValidateConfig,

    /// Write an example configuration file.
    CreateExampleConfig {
        /// Output path for the example config.
        #[arg(short, long, default_value = "config.example.toml")]
        output: PathBuf,
    },

    /// Print the current configuration.
    ShowConfig,

    /// Print version information.
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    match cli.command {
        Commands::Bootstrap { runtime_dir } => bootstrap_command(cli.config, runtime_dir).await?,
        Commands::ShowCa { runtime_dir } => show_ca_command(cli.config, runtime_dir).await?,
        Commands::ValidateConfig => validate_config_command(cli.config)?,
        Commands::CreateExampleConfig { output } => create_example_config_command(output)?,
        Commands::ShowConfig => show_config_command(cli.config)?,
        Commands::Version => {
            println!("cda-core {}", cda_core::VERSION);
        }
    }

    Ok(())
}

fn load_config(path: &PathBuf) -> Result<Config, Box<dyn std::error::Error>> {
    if path.exists() {
        Ok(Config::from_file(path)?)
    } else {
        Ok(Config::default())
    }
}

async fn bootstrap_command(
    config_path: PathBuf,
    runtime_dir: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&config_path)?;
    config.validate()?;

    println!("Bootstrapping CA at: {}", runtime_dir.display());
    let store: Arc<dyn RuntimeStore> = Arc::new(FileRuntimeStore::new(runtime_dir).await?);
    let ca_store = CaStore::open(store, config.certificate_authority.resolved_ca_type()).await?;
    let material = ca_store.current().await;

    println!("  CA type: {}", material.ca_type);
    println!("  Certificate chain depth: {}", material.chain.len());
    println!("Bootstrap complete.");

    Ok(())
}

async fn show_ca_command(
    config_path: PathBuf,
    runtime_dir: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&config_path)?;
    let store: Arc<dyn RuntimeStore> = Arc::new(FileRuntimeStore::new(runtime_dir).await?);
    let ca_store = CaStore::open(store, config.certificate_authority.resolved_ca_type()).await?;
    let material = ca_store.current().await;

    let validation = cda_core::crypto::validate_certificate(material.certificate_pem.as_bytes())
        .map_err(|e| format!("{e:?}"))?;
    println!("CA type: {}", material.ca_type);
    if let Some(metadata) = validation.metadata {
        println!("Fingerprint: {}", metadata.fingerprint_sha256);
        println!("Not before:  {}", metadata.not_before);
        println!("Not after:   {}", metadata.not_after);
    }

    Ok(())
}

fn validate_config_command(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration: {}", path.display());

    if !path.exists() {
        return Err(format!("configuration file not found: {}", path.display()).into());
    }

    let config = Config::from_file(&path)?;
    config.validate()?;
    println!("Configuration is valid.");
    println!("  CA type preference: {:?}", config.certificate_authority.ca_type);
    println!(
        "  Trust window: {}h",
        config.security.clamped_trust_duration_hours()
    );
    println!("  Device groups: {}", config.device_groups.definitions.len());

    Ok(())
}

fn create_example_config_command(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    if output.exists() {
        return Err(format!("file already exists: {}", output.display()).into());
    }

    Config::create_example(&output)?;
    println!("Example configuration written to: {}", output.display());
    println!("Next: cp {} config.toml && cda-core validate-config", output.display());

    Ok(())
}

fn show_config_command(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("configuration file not found: {}", path.display()).into());
    }

    let config = Config::from_file(&path)?;
    println!("{}", toml::to_string_pretty(&config)?);

    Ok(())
}
