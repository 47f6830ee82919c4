use crate::core::Result;
use log::debug;
use mongodb::ClientSession;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counts sessions opened and closed through one client
///
/// Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    opened: Arc<AtomicU64>,
    closed: Arc<AtomicU64>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a driver session and wrap it in a guard
    ///
    /// Nothing is recorded when the driver fails to start the session.
    pub async fn start(&self, client: &mongodb::Client) -> Result<SessionGuard> {
        let session = client.start_session().await?;
        Ok(SessionGuard {
            session,
            _ticket: self.ticket(),
        })
    }

    /// Record an opened session. The close is recorded when the ticket drops.
    pub(crate) fn ticket(&self) -> SessionTicket {
        let id = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("session #{} opened", id);
        SessionTicket {
            id,
            closed: Arc::clone(&self.closed),
        }
    }

    pub fn stats(&self) -> SessionStats {
        // closed first so active never underflows while a guard drops concurrently
        let closed = self.closed.load(Ordering::SeqCst);
        let opened = self.opened.load(Ordering::SeqCst);

        SessionStats {
            opened,
            closed,
            active: opened.saturating_sub(closed),
        }
    }
}

/// Session statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub opened: u64,
    pub closed: u64,
    pub active: u64,
}

impl std::fmt::Display for SessionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Session Stats: {} active, {} opened, {} closed",
            self.active, self.opened, self.closed
        )
    }
}

/// Records one close on drop
#[derive(Debug)]
pub(crate) struct SessionTicket {
    id: u64,
    closed: Arc<AtomicU64>,
}

impl Drop for SessionTicket {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        debug!("session #{} closed", self.id);
    }
}

/// RAII guard for a driver session
///
/// Dropping the guard ends the session: the driver aborts any transaction
/// still in progress and returns the server session to its pool. This holds
/// on every exit path, including a cancelled future.
pub struct SessionGuard {
    session: ClientSession,
    _ticket: SessionTicket,
}

impl SessionGuard {
    pub fn session(&mut self) -> &mut ClientSession {
        &mut self.session
    }

    /// End the session now instead of at scope exit
    pub fn end(self) {}
}
