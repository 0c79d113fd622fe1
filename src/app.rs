use crate::cli::ServiceName;
use crate::config::Config;
use crate::data::PlayerStore;
use crate::data::players::PgPlayerStore;
use crate::refresh::Coordinator;
use crate::riot::RiotApi;
use crate::services::bot::BotService;
use crate::services::manager::ServiceManager;
use crate::services::refresh::RefreshService;
use crate::services::web::WebService;
use crate::state::{AppState, ServiceStatus};
use crate::utils::{SLOW_MIGRATIONS, fmt_duration, log_if_slow};
use anyhow::Context;
use sqlx::ConnectOptions;
use sqlx::postgres::PgPoolOptions;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Main application struct containing all necessary components
pub struct App {
    config: Config,
    db_pool: sqlx::PgPool,
    app_state: AppState,
    service_manager: ServiceManager,
}

impl App {
    /// Connect to the database and run migrations.
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let slow_threshold = Duration::from_millis(500);

        let connect_options = sqlx::postgres::PgConnectOptions::from_str(&config.database_url)
            .context("Failed to parse database URL")?
            .log_statements(tracing::log::LevelFilter::Debug)
            .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(1));

        // Workers, the bot and the status endpoint share the pool
        let max_connections = u32::try_from(config.worker_count * config.worker_concurrency)
            .unwrap_or(u32::MAX)
            .clamp(4, 32);

        let db_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(max_connections)
            .acquire_slow_threshold(slow_threshold)
            .acquire_timeout(Duration::from_secs(4))
            .idle_timeout(Duration::from_secs(60 * 2))
            .max_lifetime(Duration::from_secs(60 * 30))
            .connect_with(connect_options)
            .await
            .context("Failed to create database pool")?;

        info!(
            min_connections = 0,
            max_connections,
            acquire_timeout = "4s",
            idle_timeout = "2m",
            max_lifetime = "30m",
            acquire_slow_threshold = fmt_duration(slow_threshold),
            "database pool established"
        );

        info!("Running database migrations...");
        let start = Instant::now();
        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run database migrations")?;
        log_if_slow(start, SLOW_MIGRATIONS, "database migrations");
        info!("Database migrations completed successfully");

        let app_state = AppState::new(db_pool.clone(), config.refresh_timeout);

        Ok(App {
            config,
            db_pool,
            app_state,
            service_manager: ServiceManager::new(),
        })
    }

    /// Setup and register services based on enabled service list
    pub async fn setup_services(&mut self, services: &[ServiceName]) -> Result<(), anyhow::Error> {
        // The refresh coordinator goes first so the bot and web services see its handle
        if services.contains(&ServiceName::Refresh) {
            let source = RiotApi::new(self.config.riot_api_key.clone(), self.config.riot_rate_limit())
                .context("Failed to create Riot API client")?;
            let store: Arc<dyn PlayerStore> = Arc::new(PgPlayerStore::new(self.db_pool.clone()));

            let coordinator = Coordinator::start(
                &self.config.coordinator_settings(),
                store,
                Arc::new(source),
            );
            self.app_state.refresh = Some(coordinator.handle());
            self.service_manager.register_service(
                ServiceName::Refresh.as_str(),
                Box::new(RefreshService::new(
                    coordinator,
                    self.app_state.service_statuses.clone(),
                )),
            );
        }

        if services.contains(&ServiceName::Web) {
            let web_service = Box::new(WebService::new(self.config.port, self.app_state.clone()));
            self.service_manager
                .register_service(ServiceName::Web.as_str(), web_service);
        }

        if services.contains(&ServiceName::Bot) {
            match &self.config.discord_token {
                Some(token) => {
                    let client = BotService::create_client(token, self.app_state.clone())
                        .await
                        .context("Failed to create Discord client")?;
                    let bot_service = Box::new(BotService::new(
                        client,
                        self.app_state.service_statuses.clone(),
                    ));
                    self.service_manager
                        .register_service(ServiceName::Bot.as_str(), bot_service);
                }
                None => {
                    warn!("DISCORD_TOKEN not set, bot disabled");
                    self.app_state
                        .service_statuses
                        .set(ServiceName::Bot.as_str(), ServiceStatus::Disabled);
                }
            }
        }

        if !self.service_manager.has_services() {
            error!("No services enabled. Cannot start application.");
            return Err(anyhow::anyhow!("No services enabled"));
        }

        Ok(())
    }

    /// Start all registered services
    pub fn start_services(&mut self) {
        self.service_manager.spawn_all();
    }

    /// Run the application and handle shutdown signals
    pub async fn run(self) -> ExitCode {
        use crate::services::signals::handle_shutdown_signals;
        handle_shutdown_signals(self.service_manager, self.config.shutdown_timeout).await
    }
}
