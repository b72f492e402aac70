use axum::Router;
use clap::{Args, ValueEnum};
use consentry_core::DatabaseConfig;
use consentry_inbound::providers::{DocumentCheckConfig, LivenessConfig, PaymentsConfig};
use consentry_inbound::{InboundApiDoc, InboundConfig, InboundState, TracingSink};
use consentry_ratelimit::{
    DatabaseStore, InMemoryStore, RateLimitConfig, RateLimitStore, RateLimiter,
};
use consentry_webhooks::{
    DatabaseEndpointRegistry, DeliveryRecorder, DeliverySender, RetryScheduler, SweepScheduler,
    WebhookAdminState, WebhookConfig, WebhooksApiDoc,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RateLimitStoreKind {
    /// Per-process counters
    Memory,
    /// Counters shared through the database
    Database,
}

#[derive(Args)]
pub struct ServeCommand {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1:8080", env = "CONSENTRY_ADDRESS")]
    pub address: String,

    /// Database connection URL
    #[arg(long, env = "CONSENTRY_DATABASE_URL")]
    pub database_url: String,

    /// Bearer token for the webhook admin API. Admin routes reject every
    /// request when unset.
    #[arg(long, env = "CONSENTRY_ADMIN_TOKEN", default_value = "", hide_env_values = true)]
    pub admin_token: String,

    /// Listener id assigned by the payments processor
    #[arg(long, env = "CONSENTRY_PAYMENTS_WEBHOOK_ID")]
    pub payments_webhook_id: Option<String>,

    #[arg(long, env = "CONSENTRY_PAYMENTS_SECRET", hide_env_values = true)]
    pub payments_secret: Option<String>,

    #[arg(long, env = "CONSENTRY_DOCUMENT_CHECK_CLIENT_ID")]
    pub document_check_client_id: Option<String>,

    #[arg(long, env = "CONSENTRY_DOCUMENT_CHECK_SECRET", hide_env_values = true)]
    pub document_check_secret: Option<String>,

    #[arg(long, env = "CONSENTRY_LIVENESS_SECRET", hide_env_values = true)]
    pub liveness_secret: Option<String>,

    /// Seconds between retry sweeps
    #[arg(long, default_value_t = 60, env = "CONSENTRY_SWEEP_INTERVAL_SECS")]
    pub sweep_interval_secs: u64,

    /// Maximum deliveries retried per sweep
    #[arg(long, default_value_t = 100, env = "CONSENTRY_SWEEP_BATCH_SIZE")]
    pub sweep_batch_size: u64,

    /// Requests allowed per client per window
    #[arg(long, default_value_t = 60, env = "CONSENTRY_RATE_LIMIT")]
    pub rate_limit: u32,

    #[arg(long, default_value_t = 60, env = "CONSENTRY_RATE_LIMIT_WINDOW_SECS")]
    pub rate_limit_window_secs: u64,

    #[arg(long, value_enum, default_value_t = RateLimitStoreKind::Memory, env = "CONSENTRY_RATE_LIMIT_STORE")]
    pub rate_limit_store: RateLimitStoreKind,

    /// Reverse proxies whose X-Forwarded-For header is trusted when keying
    /// rate limits. Comma separated.
    #[arg(long = "trusted-proxy", value_delimiter = ',', env = "CONSENTRY_TRUSTED_PROXIES")]
    pub trusted_proxies: Vec<IpAddr>,
}

impl ServeCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run())
    }

    fn inbound_config(&self) -> InboundConfig {
        InboundConfig {
            payments: self.payments_secret.as_ref().map(|secret| {
                PaymentsConfig::new(
                    self.payments_webhook_id.clone().unwrap_or_default(),
                    secret.clone(),
                )
            }),
            document_check: self.document_check_secret.as_ref().map(|secret| {
                DocumentCheckConfig {
                    client_id: self.document_check_client_id.clone().unwrap_or_default(),
                    secret: secret.clone(),
                }
            }),
            liveness: self.liveness_secret.as_ref().map(LivenessConfig::new),
        }
    }

    async fn run(self) -> anyhow::Result<()> {
        debug!("Initializing database connection...");
        let db = consentry_database::establish_connection(&DatabaseConfig::new(
            self.database_url.clone(),
        ))
        .await?;

        let webhook_config = WebhookConfig {
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            sweep_batch_size: self.sweep_batch_size,
            ..WebhookConfig::default()
        };
        let registry = Arc::new(DatabaseEndpointRegistry::new(db.clone()));
        let recorder = Arc::new(DeliveryRecorder::new(db.clone(), &webhook_config));
        let sender = Arc::new(DeliverySender::new(&webhook_config)?);
        let retry = Arc::new(RetryScheduler::new(
            registry.clone(),
            recorder.clone(),
            sender,
            webhook_config.clone(),
        ));
        let scheduler = SweepScheduler::new(
            retry,
            webhook_config.sweep_interval,
            webhook_config.sweep_batch_size,
        );

        if self.admin_token.is_empty() {
            warn!("CONSENTRY_ADMIN_TOKEN is not set; the webhook admin API will reject all requests");
        }
        let admin_state = Arc::new(WebhookAdminState::new(
            registry,
            recorder,
            self.admin_token.clone(),
        ));

        let inbound_state = Arc::new(InboundState::new(
            &self.inbound_config(),
            Arc::new(TracingSink),
        ));
        info!(
            "Inbound providers enabled: {:?}",
            inbound_state.configured_providers()
        );

        let rate_limit_config = RateLimitConfig {
            limit: self.rate_limit,
            window: Duration::from_secs(self.rate_limit_window_secs),
            trusted_proxies: self.trusted_proxies.clone(),
            ..RateLimitConfig::default()
        };
        let store: Arc<dyn RateLimitStore> = match self.rate_limit_store {
            RateLimitStoreKind::Memory => {
                Arc::new(InMemoryStore::new(rate_limit_config.cleanup_interval))
            }
            RateLimitStoreKind::Database => Arc::new(DatabaseStore::new(
                db.clone(),
                rate_limit_config.cleanup_interval,
            )),
        };
        let limiter = Arc::new(RateLimiter::new(store, rate_limit_config));

        let mut api_doc = WebhooksApiDoc::openapi();
        api_doc.merge(InboundApiDoc::openapi());

        let app = Router::new()
            .merge(consentry_webhooks::configure_routes().with_state(admin_state))
            .merge(consentry_inbound::configure_routes().with_state(inbound_state))
            .layer(axum::middleware::from_fn_with_state(
                limiter,
                consentry_ratelimit::rate_limit_middleware,
            ))
            .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api_doc))
            .layer(TraceLayer::new_for_http());

        scheduler.start().await;

        let listener = TcpListener::bind(&self.address).await?;
        info!("Consentry listening on {}", self.address);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        info!("Waiting for the retry sweep to finish...");
        scheduler.stop().await;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use consentry_inbound::Provider;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        serve: ServeCommand,
    }

    fn parse(args: &[&str]) -> ServeCommand {
        let mut argv = vec!["serve", "--database-url", "sqlite::memory:"];
        argv.extend_from_slice(args);
        Wrapper::try_parse_from(argv).unwrap().serve
    }

    #[test]
    fn test_defaults() {
        let cmd = parse(&[]);
        assert_eq!(cmd.sweep_interval_secs, 60);
        assert_eq!(cmd.rate_limit, 60);
        assert_eq!(cmd.rate_limit_store, RateLimitStoreKind::Memory);
        assert!(cmd.trusted_proxies.is_empty());
        assert!(InboundState::new(&cmd.inbound_config(), Arc::new(TracingSink))
            .configured_providers()
            .is_empty());
    }

    #[test]
    fn test_provider_secrets_enable_routes() {
        let cmd = parse(&[
            "--payments-webhook-id",
            "WH-1",
            "--payments-secret",
            "pay",
            "--liveness-secret",
            "live",
            "--rate-limit-store",
            "database",
        ]);
        assert_eq!(cmd.rate_limit_store, RateLimitStoreKind::Database);

        let state = InboundState::new(&cmd.inbound_config(), Arc::new(TracingSink));
        assert_eq!(
            state.configured_providers(),
            vec![Provider::Payments, Provider::Liveness]
        );
    }

    #[test]
    fn test_trusted_proxies() {
        let cmd = parse(&["--trusted-proxy", "10.0.0.1,10.0.0.2", "--trusted-proxy", "::1"]);
        assert_eq!(
            cmd.trusted_proxies,
            vec![
                IpAddr::from([10, 0, 0, 1]),
                IpAddr::from([10, 0, 0, 2]),
                "::1".parse::<IpAddr>().unwrap(),
            ]
        );

        assert!(Wrapper::try_parse_from([
            "serve",
            "--database-url",
            "sqlite::memory:",
            "--trusted-proxy",
            "proxy.internal",
        ])
        .is_err());
    }
}
