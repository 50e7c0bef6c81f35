pub(crate) mod archive;
mod logic;

use anyhow::Result;

use crate::volume::Volume;

/// Public entry point for a backup pass over every configured set.
pub async fn run_backup_flow(volume: &Volume) -> Result<()> {
    logic::perform_backup_orchestration(volume).await
}
