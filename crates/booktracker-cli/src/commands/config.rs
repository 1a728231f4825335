use std::path::PathBuf;

use booktracker_core::sync::AutoResolvePolicy;
use booktracker_core::util::{is_http_url, normalize_text_option};

use crate::auth::resolve_token;
use crate::cli::ConfigCommands;
use crate::config::{default_config_path, CliConfig};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, db_path: Option<PathBuf>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            database_id,
            api_base_url,
            auto_resolve_policy,
            library_path,
        } => {
            let mut config = CliConfig::load().map_err(CliError::Config)?;
            apply_config_init(
                &mut config,
                database_id,
                api_base_url,
                auto_resolve_policy,
                library_path,
            )?;

            let path = config.save().map_err(CliError::Config)?;
            println!("Configuration saved at {}", path.display());

            if config.sync.notion_database_id.is_none() {
                println!("Notion database ID is missing. Pass --database-id <ID>.");
            } else if resolve_token()?.is_none() {
                println!("Sync settings ready. Run `booktracker auth login --token <TOKEN>`.");
            } else {
                println!("Sync is ready. Run `booktracker sync`.");
            }
            Ok(())
        }
        ConfigCommands::Show { json } => {
            let config = CliConfig::load().map_err(CliError::Config)?;
            let settings = config.effective_sync_settings();
            let resolved_db_path = config.resolve_db_path(db_path);

            if json {
                let effective = CliConfig {
                    db_path: Some(resolved_db_path),
                    sync: settings,
                    ..config
                };
                println!("{}", serde_json::to_string_pretty(&effective)?);
                return Ok(());
            }

            let config_path = default_config_path().map_err(CliError::Config)?;
            println!("Config file:        {}", config_path.display());
            println!("Library database:   {}", resolved_db_path.display());
            println!(
                "Notion database:    {}",
                settings.notion_database_id.as_deref().unwrap_or("(not set)")
            );
            println!("Notion API:         {}", settings.notion_api_base_url);
            println!("Notion version:     {}", settings.notion_version);
            println!("Auto-resolve:       {}", policy_label(settings.auto_resolve_policy));
            println!(
                "Retries:            {} attempts, {}-{} ms backoff x{}",
                settings.retry_max_attempts,
                settings.retry_initial_delay_ms,
                settings.retry_max_delay_ms,
                settings.retry_backoff_multiplier
            );
            println!("Request interval:   {} ms", settings.min_request_interval_ms);
            Ok(())
        }
    }
}

/// Merge explicit values into the stored configuration and validate the result
#[allow(clippy::needless_pass_by_value)]
pub fn apply_config_init(
    config: &mut CliConfig,
    database_id: Option<String>,
    api_base_url: Option<String>,
    auto_resolve_policy: Option<AutoResolvePolicy>,
    library_path: Option<PathBuf>,
) -> Result<(), CliError> {
    if let Some(database_id) = normalize_text_option(database_id) {
        config.sync.notion_database_id = Some(database_id);
    }
    if let Some(url) = normalize_text_option(api_base_url) {
        if !is_http_url(&url) {
            return Err(CliError::Config(
                "api_base_url must include http:// or https://".to_string(),
            ));
        }
        config.sync.notion_api_base_url = url;
    }
    if let Some(policy) = auto_resolve_policy {
        config.sync.auto_resolve_policy = policy;
    }
    if let Some(path) = library_path {
        config.db_path = Some(path);
    }

    config.sync = config.sync.clone().normalized();
    config.sync.validate()?;
    Ok(())
}

const fn policy_label(policy: AutoResolvePolicy) -> &'static str {
    match policy {
        AutoResolvePolicy::None => "none",
        AutoResolvePolicy::Local => "local",
        AutoResolvePolicy::Remote => "remote",
    }
}
