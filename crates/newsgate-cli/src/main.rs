mod status;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use newsgate_core::Provider;
use newsgate_worker::{init_tracing, Runtime};

#[derive(Debug, Parser)]
#[command(name = "newsgate-cli")]
#[command(about = "Operator commands for the newsgate ingestion layer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Run one fetch cycle in this process and print its report
    FetchOnce,
    /// Queue a fetch cycle for the worker fleet
    EnqueueCycle,
    /// Show API key cooldowns for a provider
    Keys {
        /// Provider to inspect (newswire_a, newswire_b, analysis); all if omitted
        #[arg(long)]
        provider: Option<Provider>,
    },
    /// Show circuit breaker state for every provider
    Circuit,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Arc::new(newsgate_core::load_app_config()?);
    init_tracing(&config)?;

    let pool_config = newsgate_db::PoolConfig::from_app_config(&config);
    let pool = newsgate_db::connect_pool(&config.database_url, pool_config).await?;

    if let Commands::Migrate = cli.command {
        let applied = newsgate_db::run_migrations(&pool).await?;
        println!("migrations up to date ({applied} applied)");
        return Ok(());
    }

    let runtime = Runtime::new(Arc::clone(&config), pool).await?;
    match cli.command {
        Commands::Migrate => {}
        Commands::FetchOnce => {
            let report = runtime.pipeline.run_cycle().await?;
            status::print_cycle_report(&report);
        }
        Commands::EnqueueCycle => {
            let id = runtime.pipeline.queue().enqueue_fetch_cycle().await?;
            println!("enqueued fetch-cycle job {id}");
        }
        Commands::Keys { provider } => {
            let providers = provider.map_or_else(
                || vec![Provider::NewswireA, Provider::NewswireB, Provider::Analysis],
                |p| vec![p],
            );
            for provider in providers {
                status::print_keys(&runtime.key_pool, provider).await?;
            }
        }
        Commands::Circuit => {
            status::print_circuits(&runtime.breaker).await?;
        }
    }

    Ok(())
}
