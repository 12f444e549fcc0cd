//! Mirror server wiring from parsed CLI flags.

use anyhow::{bail, Result};
use redes_server::ServerConfig;
use redes_sync::{RemoteSyncConfig, SyncEnvironment, SyncMode};

use crate::cli_args::Cli;

/// Assembles the server configuration from CLI flags.
///
/// Fails fast with the offending flag name when live mode lacks an endpoint
/// for the selected environment, so misconfiguration surfaces before any
/// database or socket is touched.
pub(crate) fn server_config_from_cli(cli: &Cli) -> Result<ServerConfig> {
    let mode = SyncMode::from(cli.sync_mode);
    let environment = SyncEnvironment::from(cli.sync_environment);
    let endpoint_pre = trimmed(&cli.sync_endpoint_pre);
    let endpoint_pro = trimmed(&cli.sync_endpoint_pro);

    if mode == SyncMode::Live {
        let (endpoint, flag) = match environment {
            SyncEnvironment::PreProduction => (&endpoint_pre, "--sync-endpoint-pre"),
            SyncEnvironment::Production => (&endpoint_pro, "--sync-endpoint-pro"),
        };
        if endpoint.is_empty() {
            bail!(
                "{flag} is required when --sync-mode is live for the {} environment",
                environment.as_str()
            );
        }
    }

    let clearance_person = cli.clearance_person.trim();
    if clearance_person.is_empty() {
        bail!("--clearance-person must not be empty");
    }

    Ok(ServerConfig {
        bind: cli.bind.clone(),
        database_path: cli.database.clone(),
        sync: RemoteSyncConfig {
            mode,
            environment,
            endpoint_pre,
            endpoint_pro,
            request_timeout_ms: cli.sync_timeout_ms,
            username: non_empty(&cli.sync_username),
            password: cli.sync_password.clone(),
        },
        clearance_person: clearance_person.to_string(),
        session_ttl_seconds: cli.session_ttl_seconds,
    })
}

fn trimmed(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or_default().to_string()
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}
