use {anyhow::Context, clap::Subcommand, parley_config::ParleyConfig, parley_store::SqliteStore};

#[derive(Subcommand)]
pub enum DbAction {
    /// Run all pending database migrations.
    Migrate,
}

pub async fn open_store(config: &ParleyConfig) -> anyhow::Result<SqliteStore> {
    SqliteStore::connect(&config.database.url, config.database.max_connections)
        .await
        .with_context(|| format!("opening database {}", config.database.url))
}

pub async fn handle_db(action: DbAction, config: &ParleyConfig) -> anyhow::Result<()> {
    match action {
        DbAction::Migrate => {
            let store = open_store(config).await?;
            parley_store::run_migrations(store.pool())
                .await
                .context("running migrations")?;
            store.pool().close().await;
            println!("Migrations applied to {}.", config.database.url);
            Ok(())
        },
    }
}
