//! CLI command handlers.

pub mod call;
pub mod check;
pub mod servers;
pub mod tools;
pub mod watch;

use std::path::PathBuf;

use anyhow::Result;
use tether_mcp::{ConnectionManager, ServerConfig};

use crate::config::TetherConfig;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Loaded configuration.
    pub config: TetherConfig,
    /// File the configuration came from, if any.
    pub config_path: Option<PathBuf>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// A manager with every configured server registered.
    pub fn manager(&self) -> Result<ConnectionManager> {
        let manager = ConnectionManager::new(self.config.manager.to_manager_config());
        for server in &self.config.servers {
            manager.add_connection(server.clone())?;
        }
        Ok(manager)
    }

    /// Connect to a single server for a one-shot command.
    ///
    /// Reconnects are off: a failed attempt is reported, not retried.
    pub async fn connect_one(&self, id: &str) -> Result<(ConnectionManager, ServerConfig)> {
        let server = self.config.server(id)?.clone();
        let manager = ConnectionManager::new(
            self.config
                .manager
                .to_manager_config()
                .with_auto_reconnect(false),
        );
        manager.add_connection(server.clone())?;
        if let Err(e) = manager.connect(id).await {
            manager.dispose().await;
            return Err(anyhow::anyhow!("failed to connect to '{}': {}", id, e));
        }
        Ok((manager, server))
    }
}

/// Truncate a string for table output.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
