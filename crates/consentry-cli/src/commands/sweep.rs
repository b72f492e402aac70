use clap::Args;
use colored::Colorize;
use consentry_core::DatabaseConfig;
use consentry_webhooks::{
    DatabaseEndpointRegistry, DeliveryRecorder, DeliverySender, RetryScheduler, WebhookConfig,
};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Args)]
pub struct SweepCommand {
    /// Database connection URL
    #[arg(long, env = "CONSENTRY_DATABASE_URL")]
    pub database_url: String,

    /// Maximum number of due deliveries to retry
    #[arg(long, default_value_t = 100, env = "CONSENTRY_SWEEP_BATCH_SIZE")]
    pub limit: u64,
}

impl SweepCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run())
    }

    async fn run(self) -> anyhow::Result<()> {
        debug!("Initializing database connection...");
        let db = consentry_database::establish_connection(&DatabaseConfig::new(
            self.database_url.clone(),
        ))
        .await?;

        let config = WebhookConfig::default();
        let retry = RetryScheduler::new(
            Arc::new(DatabaseEndpointRegistry::new(db.clone())),
            Arc::new(DeliveryRecorder::new(db, &config)),
            Arc::new(DeliverySender::new(&config)?),
            config,
        );

        info!("Sweeping up to {} due deliveries", self.limit);
        let processed = retry.sweep(self.limit).await?;

        println!(
            "{} {}",
            "Deliveries retried:".bright_white().bold(),
            processed.to_string().bright_cyan()
        );
        Ok(())
    }
}
