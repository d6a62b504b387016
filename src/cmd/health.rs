//! Service health check, `dockbridge health`.

use anyhow::{Context, Result};
use console::style;
use dockbridge::BridgeConfig;
use dockbridge::dispatch::{ExecuteClient, HttpExecuteClient};

pub async fn cmd_health(config: &BridgeConfig) -> Result<()> {
    let endpoints = config.endpoints()?;
    let url = endpoints.health_url();
    let client = HttpExecuteClient::new(endpoints);

    let health = tokio::time::timeout(config.request_timeout(), client.health())
        .await
        .with_context(|| format!("Timed out probing {}", url))?
        .with_context(|| format!("Health check against {} failed", url))?;

    let status = if health.is_healthy() {
        style(health.status.as_str()).green()
    } else {
        style(health.status.as_str()).red()
    };
    println!("Server:      {}", url);
    println!("Status:      {}", status);
    println!("Connections: {}", health.connections);
    if !health.message.is_empty() {
        println!("Message:     {}", health.message);
    }

    if !health.is_healthy() {
        anyhow::bail!("Service reported status '{}'", health.status);
    }
    Ok(())
}
