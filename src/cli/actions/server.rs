use std::sync::Arc;

use anyhow::Result;

use crate::cas::{tickets::MemoryTicketStore, CasGate};
use crate::cli::actions::Action;
use crate::server;
use crate::session::MemorySessionStore;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server { port, config } => {
            // The in-memory session store doubles as the single-sign-out
            // collaborator.
            let sessions = Arc::new(MemorySessionStore::new());
            let tickets = Arc::new(MemoryTicketStore::new());
            let gate = CasGate::new(config, sessions.clone(), tickets, Some(sessions))?;

            server::new(port, Arc::new(gate)).await?;
        }
    }

    Ok(())
}
