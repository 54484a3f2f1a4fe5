//! Per-session bookkeeping shared between the log and its callers.

use crate::types::{LogPosition, PageId, SessionId};

/// A writer of log records.
///
/// Tracks the first log position the session wrote since its last commit,
/// which bounds how much of the log may be removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: SessionId,
    first_uncommitted: Option<LogPosition>,
}

impl Session {
    /// Creates a session with nothing logged.
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            first_uncommitted: None,
        }
    }

    /// The session id written into records.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Notes that a record was written at `pos`.
    pub fn add_log_pos(&mut self, pos: LogPosition) {
        if self.first_uncommitted.is_none() {
            self.first_uncommitted = Some(pos);
        }
    }

    /// The first position written since the last commit.
    pub fn first_uncommitted_log(&self) -> Option<LogPosition> {
        self.first_uncommitted
    }

    /// Forgets logged positions after a commit or rollback.
    pub fn set_all_committed(&mut self) {
        self.first_uncommitted = None;
    }
}

/// Resolution of a prepared transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InDoubtState {
    /// Prepared, neither committed nor rolled back.
    InDoubt,
    /// Resolved as committed.
    Committed,
    /// Resolved as rolled back.
    RolledBack,
}

/// A transaction found prepared but not committed during recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InDoubtTransaction {
    session_id: SessionId,
    page_id: PageId,
    transaction: String,
    state: InDoubtState,
}

impl InDoubtTransaction {
    pub(crate) fn new(session_id: SessionId, page_id: PageId, transaction: String) -> Self {
        Self {
            session_id,
            page_id,
            transaction,
            state: InDoubtState::InDoubt,
        }
    }

    /// Session that prepared the transaction.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Data page holding the prepare record.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Global transaction name.
    pub fn transaction(&self) -> &str {
        &self.transaction
    }

    /// Current resolution.
    pub fn state(&self) -> InDoubtState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: InDoubtState) {
        self.state = state;
    }
}

/// What recovery learned about one session.
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionState {
    /// Section and position of the last commit record.
    pub last_commit: Option<(u32, u32)>,
    pub in_doubt: Option<InDoubtTransaction>,
}

impl SessionState {
    /// Whether a record at `section`/`pos` precedes the last commit.
    pub fn is_committed(&self, section: u32, pos: u32) -> bool {
        match self.last_commit {
            None => false,
            Some((last_section, _)) if last_section != section => last_section > section,
            Some((_, last_pos)) => last_pos >= pos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_uncommitted_keeps_first() {
        let mut session = Session::new(SessionId::new(1));
        session.add_log_pos(LogPosition::new(2, 5));
        session.add_log_pos(LogPosition::new(3, 1));
        assert_eq!(session.first_uncommitted_log(), Some(LogPosition::new(2, 5)));
        session.set_all_committed();
        assert_eq!(session.first_uncommitted_log(), None);
    }

    #[test]
    fn committed_ordering() {
        let mut state = SessionState::default();
        assert!(!state.is_committed(0, 1));
        state.last_commit = Some((1, 4));
        assert!(state.is_committed(0, 99));
        assert!(state.is_committed(1, 4));
        assert!(!state.is_committed(1, 5));
        assert!(!state.is_committed(2, 0));
    }
}
