use crate::state::AppState;
use anyhow::Error;

pub mod commands;

pub struct Data {
    pub app_state: AppState,
} // User data, which is stored and accessible in all command invocations
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Get all available commands
pub fn get_commands() -> Vec<poise::Command<Data, Error>> {
    vec![commands::refresh()]
}

/// Build a deterministic fingerprint of command definitions for change detection.
///
/// Includes command names, descriptions, and parameter metadata. If any of these
/// change, the fingerprint changes, triggering re-registration with Discord.
pub fn commands_fingerprint(commands: &[poise::Command<Data, Error>]) -> String {
    let mut parts: Vec<String> = commands
        .iter()
        .map(|cmd| {
            let params: Vec<String> = cmd
                .parameters
                .iter()
                .map(|p| {
                    format!(
                        "{}:{}:{}",
                        p.name,
                        p.description.as_deref().unwrap_or_default(),
                        p.required
                    )
                })
                .collect();
            format!(
                "{}:{}({})",
                cmd.name,
                cmd.description.as_deref().unwrap_or_default(),
                params.join(",")
            )
        })
        .collect();
    parts.sort();
    parts.join(";")
}
