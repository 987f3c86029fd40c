/// Session → effect wiring.
///
/// Turns session transitions into at most one effect each: a redirect to the
/// login screen when the session becomes unauthenticated, a single list-load
/// when it becomes authenticated. `Pending` never produces anything.
///
/// Every list-load carries a `LoadTicket`. Only the ticket of the load the
/// binding is currently waiting for is accepted back, so a listing from an
/// earlier session (even for the same user) can never land.
use std::fmt;

use crate::error::SyncError;
use crate::session::{AuthContext, Session};

/// Monotonic tag of one list-load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadTicket(u64);

impl fmt::Display for LoadTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "load#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    RedirectToLogin,
    LoadTasks(AuthContext, LoadTicket),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Observed {
    Unauthenticated,
    Authenticated { user_id: String },
}

#[derive(Debug, Default)]
pub struct ViewBinding {
    last: Option<Observed>,
    issued: u64,
    /// Ticket of the list-load currently awaited
    loading: Option<LoadTicket>,
}

impl ViewBinding {
    pub fn observe(&mut self, session: &Session) -> Option<Effect> {
        match session {
            Session::Pending => None,
            Session::Unauthenticated => {
                if self.last == Some(Observed::Unauthenticated) {
                    return None;
                }
                self.last = Some(Observed::Unauthenticated);
                self.loading = None;
                Some(Effect::RedirectToLogin)
            }
            Session::Authenticated(auth) => {
                let observed = Observed::Authenticated {
                    user_id: auth.user_id.clone(),
                };
                if self.last.as_ref() == Some(&observed) {
                    return None;
                }
                self.last = Some(observed);
                // A load started for another identity is no longer awaited
                self.loading = None;
                self.begin_load(auth)
            }
        }
    }

    /// Start a list-load unless one is already running.
    pub fn begin_load(&mut self, auth: &AuthContext) -> Option<Effect> {
        if self.loading.is_some() {
            return None;
        }
        self.issued += 1;
        let ticket = LoadTicket(self.issued);
        self.loading = Some(ticket);
        Some(Effect::LoadTasks(auth.clone(), ticket))
    }

    /// Mark the load for `ticket` finished. Returns false when the result
    /// belongs to a load this binding no longer waits for.
    pub fn finish_load(&mut self, ticket: LoadTicket) -> bool {
        if self.loading == Some(ticket) {
            self.loading = None;
            true
        } else {
            false
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading.is_some()
    }
}

/// Credentials for a gateway call, or why there are none yet.
pub fn require_auth(session: &Session) -> Result<&AuthContext, SyncError> {
    match session {
        Session::Pending => Err(SyncError::SessionPending),
        Session::Unauthenticated => Err(SyncError::Unauthenticated),
        Session::Authenticated(auth) => Ok(auth),
    }
}
