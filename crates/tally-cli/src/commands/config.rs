use std::env;
use std::path::PathBuf;

use tally_core::config::RemoteConfig;
use tally_core::ReplicaId;

use crate::cli::ConfigCommands;
use crate::commands::common::CliContext;
use crate::config_profiles::{normalize_text_option, CliProfile, CliProfilesConfig};
use crate::error::CliError;

pub fn run_config(
    command: ConfigCommands,
    global_profile: Option<&str>,
    cli_db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            remote_url,
            remote_token,
            remote_db_path,
            interval_secs,
            no_activate,
        } => run_config_init(
            global_profile,
            remote_url,
            remote_token,
            remote_db_path,
            interval_secs,
            no_activate,
        ),
        ConfigCommands::Show { json } => {
            let context = CliContext::resolve(cli_db_path, global_profile)?;
            if json {
                let shown = serde_json::json!({
                    "profile": context.profile_name,
                    "replicaId": context.replica.to_string(),
                    "dbPath": context.db_path.display().to_string(),
                    "remote": context.remote.as_ref().map(RemoteConfig::describe),
                    "sync": context.settings,
                });
                println!("{}", serde_json::to_string_pretty(&shown)?);
            } else {
                println!("profile:    {}", context.profile_name);
                println!("replica_id: {}", context.replica);
                println!("db_path:    {}", context.db_path.display());
                println!(
                    "remote:     {}",
                    context
                        .remote
                        .as_ref()
                        .map_or_else(|| "not configured".to_string(), RemoteConfig::describe)
                );
                println!(
                    "sync:       every {}s, debounce {}ms, timeout {}s",
                    context.settings.interval_secs,
                    context.settings.debounce_ms,
                    context.settings.remote_timeout_secs
                );
            }
            Ok(())
        }
    }
}

pub fn run_config_init(
    profile_name: Option<&str>,
    remote_url: Option<String>,
    remote_token: Option<String>,
    remote_db_path: Option<PathBuf>,
    interval_secs: Option<u64>,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);

    let profile = config.profile_mut_or_default(&profile_name);
    apply_profile_init(profile, remote_url, remote_token, remote_db_path, interval_secs)?;
    let missing_remote = profile.remote_config().map_err(CliError::Config)?.is_none();

    if !no_activate {
        config.active_profile = Some(profile_name.clone());
    }

    let path = config.save().map_err(CliError::Config)?;
    println!("Profile '{}' initialized at {}", profile_name, path.display());
    if missing_remote {
        println!(
            "Profile '{profile_name}' has no remote. Pass --remote-url or --remote-db-path to enable sync."
        );
    } else {
        println!("Profile '{profile_name}' is ready. Run `tally sync`.");
    }
    Ok(())
}

/// Merge explicit flags, then `TALLY_REMOTE_*` env values, into `profile`.
#[allow(clippy::needless_pass_by_value)]
pub fn apply_profile_init(
    profile: &mut CliProfile,
    remote_url: Option<String>,
    remote_token: Option<String>,
    remote_db_path: Option<PathBuf>,
    interval_secs: Option<u64>,
) -> Result<(), CliError> {
    if profile.replica_id().is_none() {
        profile.replica_id = Some(ReplicaId::generate().to_string());
    }

    let url = normalize_text_option(remote_url)
        .or_else(|| normalize_text_option(env::var("TALLY_REMOTE_URL").ok()));
    let token = normalize_text_option(remote_token)
        .or_else(|| normalize_text_option(env::var("TALLY_REMOTE_TOKEN").ok()));
    if url.is_some() && remote_db_path.is_some() {
        return Err(CliError::Config(
            "use either --remote-url or --remote-db-path, not both".to_string(),
        ));
    }

    if let Some(url) = url {
        RemoteConfig::from_parts(Some(url.clone()), None, None).map_err(CliError::Config)?;
        profile.remote_url = Some(url.trim_end_matches('/').to_string());
        profile.remote_db_path = None;
    }
    if let Some(token) = token {
        profile.remote_token = Some(token);
    }
    if let Some(path) = remote_db_path {
        profile.remote_db_path = Some(path);
        profile.remote_url = None;
    }
    if let Some(interval_secs) = interval_secs {
        profile.sync.interval_secs = interval_secs;
    }
    profile.sync.validate().map_err(CliError::Config)
}
