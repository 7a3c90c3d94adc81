use clap::Parser;

use callscribe::cli::{Cli, Commands};
use callscribe::config::Config;
use callscribe::store::{AudioStore, TenantKey};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("callscribe=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => {
            tracing::info!("Starting callscribe backend");
            callscribe::server::run(config)
        }
        Commands::SttService => {
            tracing::info!("Starting transcription job service");
            callscribe::stt::service::run(config)
        }
        Commands::InitTenant { key } => {
            let tenant = match key {
                Some(raw) => raw.parse::<TenantKey>()?,
                None => TenantKey::generate(),
            };
            let store = AudioStore::open(&config.storage.db_path)?;
            store.create_tenant_table(&tenant)?;
            println!("{}", tenant);
            Ok(())
        }
    }
}
