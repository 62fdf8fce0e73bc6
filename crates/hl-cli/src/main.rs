use anyhow::Result;
use clap::{Parser, Subcommand};
use hl_core::storage::migrate::migrate_to_s3;
use hl_core::storage::{MediaStore, StorageSettings};
use tracing::info;

const SERVICE_NAME: &str = "hl-cli";

#[derive(Parser)]
#[command(name = "heirlink", version, about = "HeirLink backend CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP and WebSocket API
    Api,
    /// Run the background job worker
    Worker,
    /// Apply database migrations
    Migrate,
    /// Print the effective configuration without secrets
    Config {
        /// Pretty-print JSON output
        #[arg(long, default_value_t = false)]
        pretty: bool,
    },
    Storage {
        #[command(subcommand)]
        command: StorageCommand,
    },
}

#[derive(Subcommand)]
enum StorageCommand {
    /// Copy local uploads to S3 and rewrite their URLs
    MigrateToS3 {
        /// Rows read per query
        #[arg(long, default_value_t = 50)]
        batch: i64,
    },
}

fn render(value: &serde_json::Value, pretty: bool) -> Result<String> {
    Ok(if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Api => {
            let config = hl_api::load_config()?;
            hl_api::run(config).await?;
        }
        Commands::Worker => {
            let config = hl_worker::load_config()?;
            hl_worker::run(config).await?;
        }
        Commands::Migrate => {
            hl_core::logging::init(SERVICE_NAME);
            let database_url = hl_core::config::required_env("DATABASE_URL")?;
            let pool = hl_core::db::connect(&database_url).await?;
            hl_core::migrations::run(&pool).await?;
            info!("migrations completed");
        }
        Commands::Config { pretty } => {
            let api = hl_api::load_config()?;
            let worker = hl_worker::load_config()?;
            let output = serde_json::json!({
                "api": api.summary(),
                "worker": worker.summary(),
            });
            println!("{}", render(&output, pretty)?);
        }
        Commands::Storage { command } => match command {
            StorageCommand::MigrateToS3 { batch } => {
                hl_core::logging::init(SERVICE_NAME);
                let database_url = hl_core::config::required_env("DATABASE_URL")?;
                let pool = hl_core::db::connect(&database_url).await?;
                let store = MediaStore::from_settings(StorageSettings::from_env()).await?;
                let report = migrate_to_s3(&pool, &store, batch).await?;
                info!(
                    uploaded = report.uploaded,
                    already_present = report.already_present,
                    missing_locally = report.missing_locally,
                    unrecognized = report.unrecognized,
                    rewritten = report.rewritten,
                    "storage migration completed"
                );
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn storage_batch_defaults_to_fifty() {
        let cli = Cli::try_parse_from(["heirlink", "storage", "migrate-to-s3"]).unwrap();
        match cli.command {
            Commands::Storage {
                command: StorageCommand::MigrateToS3 { batch },
            } => assert_eq!(batch, 50),
            _ => panic!("unexpected command"),
        }

        let cli =
            Cli::try_parse_from(["heirlink", "storage", "migrate-to-s3", "--batch", "200"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Storage {
                command: StorageCommand::MigrateToS3 { batch: 200 }
            }
        ));
    }

    #[test]
    fn service_commands_parse() {
        assert!(matches!(
            Cli::try_parse_from(["heirlink", "api"]).unwrap().command,
            Commands::Api
        ));
        assert!(matches!(
            Cli::try_parse_from(["heirlink", "worker"]).unwrap().command,
            Commands::Worker
        ));
        assert!(matches!(
            Cli::try_parse_from(["heirlink", "config", "--pretty"])
                .unwrap()
                .command,
            Commands::Config { pretty: true }
        ));
        assert!(Cli::try_parse_from(["heirlink", "serve"]).is_err());
    }

    #[test]
    fn render_switches_between_compact_and_pretty() {
        let value = serde_json::json!({"a": 1});
        assert_eq!(render(&value, false).unwrap(), "{\"a\":1}");
        assert_eq!(render(&value, true).unwrap(), "{\n  \"a\": 1\n}");
    }
}
