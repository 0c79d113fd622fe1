use super::Service;
use crate::bot::{Data, commands_fingerprint, get_commands};
use crate::cli::ServiceName;
use crate::data::kv::{self, KV_COMMAND_FINGERPRINT};
use crate::state::{AppState, ServiceStatus, ServiceStatusRegistry};
use anyhow::Context;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Discord bot service implementation
pub struct BotService {
    client: serenity::Client,
    shard_manager: Arc<serenity::ShardManager>,
    service_statuses: ServiceStatusRegistry,
}

impl BotService {
    /// Create a new Discord client with the refresh command registered.
    pub async fn create_client(token: &str, app_state: AppState) -> Result<serenity::Client, anyhow::Error> {
        let intents = serenity::GatewayIntents::non_privileged()
            | serenity::GatewayIntents::MESSAGE_CONTENT;

        let framework = poise::Framework::builder()
            .options(poise::FrameworkOptions {
                commands: get_commands(),
                prefix_options: poise::PrefixFrameworkOptions {
                    mention_as_prefix: true,
                    ..Default::default()
                },
                pre_command: |ctx| {
                    Box::pin(async move {
                        debug!(
                            command = %ctx.command().qualified_name,
                            user = %ctx.author().id,
                            "executing command"
                        );
                    })
                },
                on_error: |error| {
                    Box::pin(async move {
                        if let poise::FrameworkError::Command { error, ctx, .. } = &error {
                            error!(
                                command = %ctx.command().qualified_name,
                                error = ?error,
                                "command failed"
                            );
                            if let Err(e) = ctx.say("Something went wrong, please try again later.").await {
                                warn!(error = ?e, "failed to send error reply");
                            }
                        } else if let Err(e) = poise::builtins::on_error(error).await {
                            error!(error = ?e, "error while handling framework error");
                        }
                    })
                },
                ..Default::default()
            })
            .setup(move |ctx, ready, framework| {
                Box::pin(async move {
                    info!(user = %ready.user.name, guilds = ready.guilds.len(), "bot connected");
                    register_commands_if_changed(ctx, framework, &app_state).await;
                    app_state
                        .service_statuses
                        .set(ServiceName::Bot.as_str(), ServiceStatus::Connected);
                    Ok(Data { app_state })
                })
            })
            .build();

        serenity::ClientBuilder::new(token, intents)
            .framework(framework)
            .await
            .context("failed to build Discord client")
    }

    pub fn new(client: serenity::Client, service_statuses: ServiceStatusRegistry) -> Self {
        let shard_manager = client.shard_manager.clone();
        Self {
            client,
            shard_manager,
            service_statuses,
        }
    }
}

/// Register global commands unless the stored fingerprint matches.
async fn register_commands_if_changed(
    ctx: &serenity::Context,
    framework: &poise::Framework<Data, anyhow::Error>,
    app_state: &AppState,
) {
    let commands = &framework.options().commands;
    let fingerprint = commands_fingerprint(commands);

    match kv::get(&app_state.db_pool, KV_COMMAND_FINGERPRINT).await {
        Ok(Some(stored)) if stored == fingerprint => {
            debug!("command definitions unchanged, skipping registration");
            return;
        }
        Ok(_) => {}
        Err(e) => warn!(error = ?e, "failed to read command fingerprint, registering anyway"),
    }

    if let Err(e) = poise::builtins::register_globally(ctx, commands).await {
        error!(error = ?e, "failed to register commands");
        return;
    }
    info!(count = commands.len(), "registered global commands");

    if let Err(e) = kv::set(&app_state.db_pool, KV_COMMAND_FINGERPRINT, &fingerprint).await {
        warn!(error = ?e, "failed to store command fingerprint");
    }
}

#[async_trait::async_trait]
impl Service for BotService {
    fn name(&self) -> &'static str {
        ServiceName::Bot.as_str()
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        self.service_statuses
            .set(ServiceName::Bot.as_str(), ServiceStatus::Starting);
        self.client
            .start()
            .await
            .context("Discord client stopped")?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        self.shard_manager.shutdown_all().await;
        self.service_statuses
            .set(ServiceName::Bot.as_str(), ServiceStatus::Disabled);
        Ok(())
    }
}
