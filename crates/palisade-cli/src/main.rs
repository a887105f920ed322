//! Palisade CLI - plugin discovery, lifecycle and permissions

use anyhow::Context;
use clap::{Parser, Subcommand};
use palisade_core::config::HostConfig;
use palisade_core::discovery::{self, LocalDiscovery, RemoteRegistry};
use palisade_core::registry::{PluginDescriptor, RegistryStore};
use palisade_core::settings::SettingsStore;
use palisade_core::storage::{Database, DatabaseConfig};
use tracing::info;

#[derive(Parser)]
#[command(name = "palisade")]
#[command(author, version, about = "Plugin host for the Palisade wallet", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,
}

#[derive(Clone, Copy, Default, PartialEq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a discovery pass and reconcile the registry
    Discover {
        /// Look plugins up on the remote registry instead of the filesystem
        #[arg(long)]
        remote: bool,
    },

    /// List known plugins and their status
    List,

    /// Enable a plugin
    Enable {
        /// Plugin module name
        module: String,
    },

    /// Disable a plugin
    Disable {
        /// Plugin module name
        module: String,
    },

    /// Grant a plugin access to a request target
    Grant {
        module: String,
        target: String,
    },

    /// Revoke a plugin's grant for a request target
    Revoke {
        module: String,
        target: String,
    },

    /// Show the grants a plugin holds
    Grants {
        module: String,
    },

    /// Show a plugin's stored settings
    Settings {
        module: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run a health check
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the effective configuration to disk
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = HostConfig::load().context("failed to load configuration")?;

    let db = Database::new(DatabaseConfig::with_path(&config.storage.database_path))
        .await
        .context("failed to open database")?;
    let registry = RegistryStore::new(&db);

    match cli.command {
        Commands::Discover { remote } => {
            discovery::write_default_config(&config.plugins.config_file)?;

            let discovered = if remote {
                let registry_client =
                    RemoteRegistry::new(&config.plugins.registry_url, &config.plugins.directory);
                let conf = discovery::read_config(&config.plugins.config_file);
                registry_client.discover(&conf).await
            } else {
                LocalDiscovery::new(&config.plugins.directory, &config.plugins.config_file)
                    .discover()
            };

            info!(count = discovered.len(), "discovery pass finished");
            let reconciled = registry.reconcile(discovered).await?;
            print_plugins(&reconciled, cli.format)?;
        }

        Commands::List => {
            let plugins = registry.plugins().await?;
            print_plugins(&plugins, cli.format)?;
        }

        Commands::Enable { module } => {
            let descriptor = registry.enable(&module).await?;
            println!("{} is now {}", descriptor.module, descriptor.status);
        }

        Commands::Disable { module } => {
            let descriptor = registry.disable(&module).await?;
            println!("{} is now {}", descriptor.module, descriptor.status);
        }

        Commands::Grant { module, target } => {
            registry.grant(&module, &target).await?;
            println!("granted {target} to {module}");
        }

        Commands::Revoke { module, target } => {
            registry.revoke(&module, &target).await?;
            println!("revoked {target} from {module}");
        }

        Commands::Grants { module } => {
            let grants = registry.grants(&module).await?;
            if cli.format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&grants)?);
            } else if grants.is_empty() {
                println!("no grants for {module}");
            } else {
                for grant in grants {
                    let state = if grant.is_live() { "live" } else { "revoked" };
                    println!("{:<40} {} ({})", grant.target, state, grant.granted_at);
                }
            }
        }

        Commands::Settings { module } => {
            let settings = SettingsStore::new(&db, registry.clone());
            let values = settings.all(&module).await?;
            if cli.format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&values)?);
            } else if values.is_empty() {
                println!("no settings stored for {module}");
            } else {
                for setting in values {
                    println!("{:<30} {}", setting.name, setting.value);
                }
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                if cli.format == OutputFormat::Json {
                    println!("{}", serde_json::to_string_pretty(&config)?);
                } else {
                    println!("plugins dir:     {}", config.plugins.directory.display());
                    println!("plugins config:  {}", config.plugins.config_file.display());
                    println!("registry url:    {}", config.plugins.registry_url);
                    println!("request timeout: {}s", config.bridge.request_timeout_secs);
                    println!("database:        {}", config.storage.database_path.display());
                }
            }
            ConfigAction::Init => {
                config.save().context("failed to write configuration")?;
                println!("wrote {}", HostConfig::config_path()?.display());
            }
        },

        Commands::Doctor => {
            db.health_check().await.context("database health check")?;
            let status = db.migration_status().await?;
            println!("database:   {} (schema v{})", db.path().display(), status.current_version);
            println!("plugins:    {}", config.plugins.directory.display());
            println!("config:     {}", config.plugins.config_file.display());
            println!("registry:   {}", config.plugins.registry_url);
            if status.needs_migration {
                println!("warning: database schema is behind (v{} < v{})",
                    status.current_version, status.target_version);
            } else {
                println!("ok");
            }
        }
    }

    Ok(())
}

fn print_plugins(plugins: &[PluginDescriptor], format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(plugins)?);
        return Ok(());
    }

    if plugins.is_empty() {
        println!("no plugins known");
        return Ok(());
    }

    for plugin in plugins {
        println!(
            "{:<40} {:<10} {:<12} {}",
            plugin.module,
            plugin.version,
            plugin.status.to_string(),
            plugin.description
        );
    }
    Ok(())
}
