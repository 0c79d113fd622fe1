//! Chat commands.

use crate::bot::Context;
use crate::data::models::Player;
use crate::data::players;
use crate::refresh::broker::CallResult;
use crate::refresh::domain::DomainSet;
use crate::refresh::message::RefreshOutcome;
use crate::riot::client::queue_name;
use anyhow::Error;
use chrono::Utc;
use tracing::{info, warn};

/// Refresh your League of Legends data right now
#[poise::command(slash_command, prefix_command, aliases("reload", "update"))]
pub async fn refresh(ctx: Context<'_>) -> Result<(), Error> {
    let app_state = &ctx.data().app_state;
    let discord_id = i64::try_from(ctx.author().id.get())?;

    let Some(player) = players::find_by_discord_id(&app_state.db_pool, discord_id).await? else {
        ctx.say("You have not linked a League of Legends account yet.")
            .await?;
        return Ok(());
    };

    let Some(coordinator) = &app_state.refresh else {
        ctx.say("Refreshing is unavailable right now, try again later.")
            .await?;
        return Ok(());
    };

    ctx.defer().await?;

    let result = coordinator
        .on_demand()
        .request_refresh(player.id, DomainSet::all(), app_state.refresh_timeout)
        .await;

    let reply = match result {
        Ok(result) => {
            info!(player_id = %player.id, ?result, "refresh command finished");
            if let Err(e) =
                players::mark_refresh_requested(&app_state.db_pool, player.id, Utc::now()).await
            {
                warn!(player_id = %player.id, error = ?e, "failed to record refresh request");
            }

            let updated = match players::find_by_discord_id(&app_state.db_pool, discord_id).await
            {
                Ok(updated) => updated,
                Err(e) => {
                    warn!(error = ?e, "failed to reload player after refresh");
                    None
                }
            };
            describe_result(&result, updated.as_ref())
        }
        Err(e) => {
            warn!(player_id = %player.id, error = %e, "refresh command could not dispatch");
            "Refreshing is unavailable right now, try again later.".to_owned()
        }
    };

    ctx.say(reply).await?;
    Ok(())
}

/// Reply text for the outcome of an on-demand refresh.
pub fn describe_result(result: &CallResult, player: Option<&Player>) -> String {
    let mut lines = Vec::new();
    match result {
        CallResult::Completed(RefreshOutcome::Success) => {
            lines.push("✅ Your data is up to date.".to_owned());
        }
        CallResult::Completed(RefreshOutcome::PartialFailure { failed }) => {
            lines.push(format!(
                "⚠️ Refreshed, but {failed} could not be updated. It will be retried automatically."
            ));
        }
        CallResult::Completed(RefreshOutcome::RecordNotFound) => {
            return "Your linked account could not be found anymore.".to_owned();
        }
        CallResult::TimedOut => {
            lines.push(
                "⏳ The refresh is taking longer than usual. Your data will update shortly."
                    .to_owned(),
            );
            return lines.join("\n");
        }
    }

    if let Some(player) = player {
        lines.extend(summary(player));
    }
    lines.join("\n")
}

fn summary(player: &Player) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(riot_id) = player.riot_id() {
        match player.summoner_level {
            Some(level) => lines.push(format!("**{riot_id}** (level {level})")),
            None => lines.push(format!("**{riot_id}**")),
        }
    }
    if let (Some(score), Some(points)) = (player.mastery_score, player.mastery_points) {
        lines.push(format!("Mastery score {score}, {points} points"));
    }
    for entry in player.ranked_tiers.iter() {
        lines.push(format!(
            "{}: {} {} ({} LP, {}W/{}L)",
            queue_name(&entry.queue),
            entry.tier,
            entry.division,
            entry.league_points,
            entry.wins,
            entry.losses
        ));
    }
    lines
}
