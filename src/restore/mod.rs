mod logic;

use anyhow::Result;

use crate::volume::Volume;

/// Public entry point for the restore pass that runs once at startup.
pub async fn run_restore_flow(volume: &Volume) -> Result<()> {
    logic::perform_restore_orchestration(volume).await
}
