//! List backup snapshots

use anyhow::{Context, Result};
use slog::debug;

use crate::restic::Restic;

/// Extends the Restic wrapper with snapshot commands
impl<'a> Restic<'a> {
    /// Lists snapshots as the JSON document printed by `restic snapshots --json`. The text is returned as-is; it is
    /// only parsed to make sure Restic actually produced JSON.
    pub async fn snapshots_json(&self) -> Result<String> {
        let mut cmd = self.new_command();
        cmd.arg("snapshots").arg("--json");

        debug!(self.logger(), "Listing snapshots");
        let output = self.run(&mut cmd).await?;
        if !output.success() {
            return Err(output.failure("restic snapshots"));
        }

        serde_json::from_str::<serde_json::Value>(&output.stdout)
            .context("restic snapshots did not print valid JSON")?;
        Ok(output.stdout)
    }
}
