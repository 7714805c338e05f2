use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

use demeter::clients::{list_sets, OaiHttpClient};
use demeter::config::{Cli, Command, HarvestConfig, SetsFormat};
use demeter::harvester::Harvester;
use demeter::storage::{DirectoryWriter, FileStateStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Parse command line arguments
    let cli = Cli::parse();

    // Setup logging (stderr to keep stdout clean for the sets listing)
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    match cli.command {
        Command::Harvest {
            url,
            metadata_prefix,
            sets,
            from,
            until,
            granularity,
            output_dir,
            state_dir,
            http_user,
            http_pass,
        } => {
            let mut config = HarvestConfig::new(url);
            config.metadata_prefix = metadata_prefix;
            config.sets = sets;
            config.from = from;
            config.until = until;
            config.granularity = granularity;
            config.http_user = http_user;
            config.http_pass = http_pass;

            let comm = OaiHttpClient::from_config(&config)?;
            let writer =
                DirectoryWriter::new(&output_dir).context("cannot open the output directory")?;
            let state =
                FileStateStore::new(&state_dir).context("cannot open the state directory")?;

            let mut harvester = Harvester::new(config, comm, writer, state);
            if let Err(e) = harvester.launch().await {
                error!("{}", e.user_message());
                return Err(e.into());
            }
        }
        Command::Sets {
            url,
            format,
            http_user,
            http_pass,
        } => {
            let comm = OaiHttpClient::new(&url, http_user.as_deref(), http_pass.as_deref())?;
            let sets = match list_sets(&comm).await {
                Ok(sets) => sets,
                Err(e) => {
                    error!("{}", e.user_message());
                    return Err(e.into());
                }
            };

            match format {
                SetsFormat::Json => println!("{}", serde_json::to_string_pretty(&sets)?),
                SetsFormat::Table => {
                    if sets.is_empty() {
                        println!("The repository exposes no sets.");
                    } else {
                        let width = sets.iter().map(|s| s.spec.len()).max().unwrap_or(0);
                        for set in &sets {
                            println!("{:width$}  {}", set.spec, set.name, width = width);
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
