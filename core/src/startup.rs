//! Bridge fleet startup: load every configured bridge and start it,
//! logging and continuing past any single bridge that fails to connect.

use std::sync::Arc;

use embermq_bridge::BridgeManager;
use tracing::error;

use crate::repository::{BridgeRepository, Result};

pub async fn start_bridges(manager: &Arc<BridgeManager>, repository: &dyn BridgeRepository) -> Result<()> {
    let bridges = repository.load_bridges().await?;
    for bridge in bridges {
        let id = bridge.id.clone();
        if let Err(e) = manager.start(bridge) {
            error!(bridge = %id, error = %e, "bridge: failed to start, continuing with remaining bridges");
        }
    }
    Ok(())
}
