use clap::ValueEnum;

use redes_sync::{SyncEnvironment, SyncMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliSyncMode {
    Simulated,
    Live,
}

impl From<CliSyncMode> for SyncMode {
    fn from(value: CliSyncMode) -> Self {
        match value {
            CliSyncMode::Simulated => SyncMode::Simulated,
            CliSyncMode::Live => SyncMode::Live,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliSyncEnvironment {
    PreProduction,
    Production,
}

impl From<CliSyncEnvironment> for SyncEnvironment {
    fn from(value: CliSyncEnvironment) -> Self {
        match value {
            CliSyncEnvironment::PreProduction => SyncEnvironment::PreProduction,
            CliSyncEnvironment::Production => SyncEnvironment::Production,
        }
    }
}
