/// Session resolution.
///
/// A `SessionResolver` is the single owner of the client's authentication
/// state. It starts `Pending`, resolves exactly once from the credential store
/// (validating the token against the backend), and afterwards only moves
/// between the terminal states on explicit login / logout. Consumers observe
/// it through a `watch` channel.
use std::future::Future;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::credentials::CredentialStore;
use crate::error::{CredentialError, ErrorKind, GatewayError};

// ── Session value ─────────────────────────────────────────────────────────────

/// User id + bearer token. Every gateway call takes one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session {
    Pending,
    Unauthenticated,
    Authenticated(AuthContext),
}

impl Session {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Session::Pending)
    }

    pub fn auth(&self) -> Option<&AuthContext> {
        match self {
            Session::Authenticated(ctx) => Some(ctx),
            _ => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Session::Pending => "resolving session…".to_string(),
            Session::Unauthenticated => "not logged in".to_string(),
            Session::Authenticated(ctx) => format!("user {}", ctx.user_id),
        }
    }
}

// ── Identity lookup ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Identity {
    #[serde(deserialize_with = "crate::task::id_from_string_or_number")]
    pub id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub email: String,
}

/// Answers "whose token is this?", `GET /api/users/me` in production.
pub trait IdentityProvider: Send + Sync + 'static {
    fn identify(&self, token: &str) -> impl Future<Output = Result<Identity, GatewayError>> + Send;
}

// ── Resolver ──────────────────────────────────────────────────────────────────

pub struct SessionResolver<P: IdentityProvider> {
    store: Arc<dyn CredentialStore>,
    identity: Arc<P>,
    tx: watch::Sender<Session>,
}

impl<P: IdentityProvider> SessionResolver<P> {
    pub fn new(store: Arc<dyn CredentialStore>, identity: Arc<P>) -> Self {
        let (tx, _rx) = watch::channel(Session::Pending);
        Self { store, identity, tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Session {
        self.tx.borrow().clone()
    }

    /// Resolve the session from the stored credential. Only the first call
    /// does any work; once resolved, the current value is returned as-is.
    pub async fn resolve(&self) -> Session {
        if self.current().is_terminal() {
            return self.current();
        }

        let token = match self.store.get() {
            Ok(Some(token)) if !token.trim().is_empty() => token,
            Ok(_) => return self.settle(Session::Unauthenticated),
            Err(e) => {
                warn!(error = %e, "could not read stored credential");
                return self.settle(Session::Unauthenticated);
            }
        };

        let resolved = match self.identity.identify(&token).await {
            Ok(identity) => Session::Authenticated(AuthContext {
                user_id: identity.id,
                token,
            }),
            Err(e) if e.kind == ErrorKind::Unauthorized => {
                info!("stored credential rejected by server; clearing it");
                if let Err(e) = self.store.clear() {
                    warn!(error = %e, "could not clear rejected credential");
                }
                Session::Unauthenticated
            }
            Err(e) => {
                // Keep the credential: the backend may just be unreachable.
                warn!(error = %e, "could not validate stored credential");
                Session::Unauthenticated
            }
        };
        self.settle(resolved)
    }

    /// Publish the outcome of resolution, but only if nothing else (a logout
    /// or login racing with resolution) has already moved the session on.
    fn settle(&self, resolved: Session) -> Session {
        self.tx.send_if_modified(|current| {
            if *current == Session::Pending {
                info!(session = %resolved.label(), "session resolved");
                *current = resolved;
                true
            } else {
                false
            }
        });
        self.current()
    }

    /// Mark the session authenticated after a successful login/registration.
    /// The credential must already have been stored and verified.
    pub fn establish(&self, auth: AuthContext) {
        info!(user = %auth.user_id, "session established");
        self.tx.send_replace(Session::Authenticated(auth));
    }

    /// Clear the credential and publish `Unauthenticated`. The session moves
    /// on even when clearing the credential fails; the error is returned so
    /// the caller can surface it.
    pub fn logout(&self) -> Result<(), CredentialError> {
        let cleared = self.store.clear();
        info!("logged out");
        self.tx.send_replace(Session::Unauthenticated);
        cleared
    }
}
