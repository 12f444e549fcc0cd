use std::path::PathBuf;

use clap::Parser;

use crate::cli_types::{CliSyncEnvironment, CliSyncMode};

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "redes",
    about = "Mirrors Adamo trouble tickets into a local store and syncs operator actions back",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "REDES_BIND",
        default_value = "127.0.0.1:8740",
        help = "Socket address the mirror server listens on"
    )]
    pub bind: String,

    #[arg(
        long,
        env = "REDES_DATABASE",
        default_value = ".redes/tickets.sqlite3",
        help = "SQLite database path holding tickets, the event log, and users"
    )]
    pub database: PathBuf,

    #[arg(
        long = "sync-mode",
        env = "REDES_SYNC_MODE",
        value_enum,
        default_value_t = CliSyncMode::Simulated,
        help = "Outbound sync mode: simulated echoes payloads locally, live calls the Adamo gateway"
    )]
    pub sync_mode: CliSyncMode,

    #[arg(
        long = "sync-environment",
        env = "REDES_SYNC_ENVIRONMENT",
        value_enum,
        default_value_t = CliSyncEnvironment::PreProduction,
        help = "Adamo environment targeted by live sync calls"
    )]
    pub sync_environment: CliSyncEnvironment,

    #[arg(
        long = "sync-endpoint-pre",
        env = "REDES_SYNC_ENDPOINT_PRE",
        help = "Adamo gateway URL for the pre-production environment"
    )]
    pub sync_endpoint_pre: Option<String>,

    #[arg(
        long = "sync-endpoint-pro",
        env = "REDES_SYNC_ENDPOINT_PRO",
        help = "Adamo gateway URL for the production environment"
    )]
    pub sync_endpoint_pro: Option<String>,

    #[arg(
        long = "sync-timeout-ms",
        env = "REDES_SYNC_TIMEOUT_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64,
        help = "Bounded timeout for one outbound gateway call, in milliseconds"
    )]
    pub sync_timeout_ms: u64,

    #[arg(
        long = "sync-username",
        env = "REDES_SYNC_USERNAME",
        help = "HTTP basic-auth username for the Adamo gateway"
    )]
    pub sync_username: Option<String>,

    #[arg(
        long = "sync-password",
        env = "REDES_SYNC_PASSWORD",
        hide_env_values = true,
        help = "HTTP basic-auth password for the Adamo gateway"
    )]
    pub sync_password: Option<String>,

    #[arg(
        long = "clearance-person",
        env = "REDES_CLEARANCE_PERSON",
        default_value = "ibiocom",
        help = "Operator identity stamped on every outbound payload"
    )]
    pub clearance_person: String,

    #[arg(
        long = "session-ttl-seconds",
        env = "REDES_SESSION_TTL_SECONDS",
        default_value_t = 86_400,
        value_parser = parse_positive_u64,
        help = "Lifetime of issued bearer session tokens, in seconds"
    )]
    pub session_ttl_seconds: u64,
}
