/// Dashboard controller, the single owner of the sync state.
///
/// Architecture:
///   owner (TUI loop or CLI command):  holds the `Dashboard`, calls the
///       intent methods, drains `SyncEvent`s and feeds them to `apply_event`
///   gateway tasks:  tokio::spawn, one per remote call, each reports back
///       through the `SyncEvent` channel tagged with its mutation id
///
/// All state changes happen on the owner; spawned tasks only talk to the
/// network. Interleaved completions are handled by the reconciler's tagged
/// overlay.
use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::binding::{Effect, LoadTicket, ViewBinding, require_auth};
use crate::error::{ErrorKind, GatewayError, SyncError};
use crate::gateway::TaskGateway;
use crate::reconcile::{
    MutationId, MutationKind, Policies, Proposal, Reconciler, Request, Response, Settlement,
};
use crate::session::{AuthContext, Session};
use crate::task::{Task, TaskDraft};

// ── Events from gateway tasks ─────────────────────────────────────────────────

#[derive(Debug)]
pub enum SyncEvent {
    Loaded {
        ticket: LoadTicket,
        result: Result<Vec<Task>, GatewayError>,
    },
    Settled {
        mutation: MutationId,
        response: Response,
    },
}

// ── Notices ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Debug, Clone)]
pub struct Notice {
    pub at: DateTime<Local>,
    pub level: NoticeLevel,
    pub text: String,
}

const MAX_NOTICES: usize = 50;

// ── Dashboard ─────────────────────────────────────────────────────────────────

pub struct Dashboard<G: TaskGateway> {
    gateway: Arc<G>,
    engine: Reconciler,
    binding: ViewBinding,
    session: Session,
    notices: Vec<Notice>,
    /// Set by the redirect effect, consumed by the host UI
    login_redirect: bool,
    events: mpsc::UnboundedSender<SyncEvent>,
}

impl<G: TaskGateway> Dashboard<G> {
    pub fn new(
        gateway: Arc<G>,
        policies: Policies,
        events: mpsc::UnboundedSender<SyncEvent>,
    ) -> Self {
        Self {
            gateway,
            engine: Reconciler::new(policies),
            binding: ViewBinding::default(),
            session: Session::Pending,
            notices: Vec::new(),
            login_redirect: false,
            events,
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn visible(&self) -> Vec<Task> {
        self.engine.visible()
    }

    pub fn is_loading(&self) -> bool {
        self.binding.is_loading()
    }

    pub fn pending_mutations(&self) -> usize {
        self.engine.pending()
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn last_notice(&self) -> Option<&Notice> {
        self.notices.last()
    }

    /// True once after each redirect-to-login effect.
    pub fn take_login_redirect(&mut self) -> bool {
        std::mem::take(&mut self.login_redirect)
    }

    // ── Session wiring ────────────────────────────────────────────────────────

    pub fn on_session(&mut self, session: Session) {
        if session == self.session {
            return;
        }
        // A different identity (or none) invalidates everything we hold
        if self.session.auth().map(|a| &a.user_id) != session.auth().map(|a| &a.user_id) {
            self.engine.reset();
        }
        self.session = session;
        if let Some(effect) = self.binding.observe(&self.session) {
            self.perform(effect);
        }
    }

    /// Manual reload. Ignored while a load is already running.
    pub fn reload(&mut self) -> Result<(), SyncError> {
        let auth = require_auth(&self.session)?.clone();
        if let Some(effect) = self.binding.begin_load(&auth) {
            self.perform(effect);
        }
        Ok(())
    }

    fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::RedirectToLogin => {
                info!("redirecting to login");
                self.login_redirect = true;
            }
            Effect::LoadTasks(auth, ticket) => self.spawn_load(auth, ticket),
        }
    }

    fn spawn_load(&self, auth: AuthContext, ticket: LoadTicket) {
        let gateway = Arc::clone(&self.gateway);
        let tx = self.events.clone();
        debug!(user = %auth.user_id, %ticket, "loading tasks");
        tokio::spawn(async move {
            let result = gateway.list(&auth).await;
            let _ = tx.send(SyncEvent::Loaded { ticket, result });
        });
    }

    // ── User intents ──────────────────────────────────────────────────────────

    pub fn add_task(
        &mut self,
        title: &str,
        description: Option<&str>,
    ) -> Result<MutationId, SyncError> {
        let auth = require_auth(&self.session)?.clone();
        let proposal = self.engine.propose_create(TaskDraft::new(title, description))?;
        Ok(self.dispatch(auth, proposal))
    }

    pub fn toggle_task(&mut self, task_id: &str) -> Result<MutationId, SyncError> {
        let auth = require_auth(&self.session)?.clone();
        let proposal = self.engine.propose_toggle(task_id)?;
        Ok(self.dispatch(auth, proposal))
    }

    pub fn edit_task(
        &mut self,
        task_id: &str,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<MutationId, SyncError> {
        let auth = require_auth(&self.session)?.clone();
        let mut task = self
            .engine
            .visible()
            .into_iter()
            .find(|t| t.id == task_id)
            .ok_or_else(|| SyncError::UnknownTask(task_id.to_string()))?;
        if let Some(title) = title {
            task.title = title.to_string();
        }
        if let Some(description) = description {
            let description = description.trim();
            task.description = (!description.is_empty()).then(|| description.to_string());
        }
        let proposal = self.engine.propose_update(task)?;
        Ok(self.dispatch(auth, proposal))
    }

    pub fn delete_task(&mut self, task_id: &str) -> Result<MutationId, SyncError> {
        let auth = require_auth(&self.session)?.clone();
        let proposal = self.engine.propose_delete(task_id)?;
        Ok(self.dispatch(auth, proposal))
    }

    fn dispatch(&self, auth: AuthContext, proposal: Proposal) -> MutationId {
        let Proposal { id, request } = proposal;
        let gateway = Arc::clone(&self.gateway);
        let tx = self.events.clone();
        tokio::spawn(async move {
            let response = match request {
                Request::Create(draft) => Response::Created(gateway.create(&auth, &draft).await),
                Request::Update { id: task_id, patch } => {
                    Response::Updated(gateway.update(&auth, &task_id, &patch).await)
                }
                Request::Delete(task_id) => Response::Deleted(gateway.delete(&auth, &task_id).await),
            };
            let _ = tx.send(SyncEvent::Settled {
                mutation: id,
                response,
            });
        });
        id
    }

    // ── Settlement ────────────────────────────────────────────────────────────

    pub fn apply_event(&mut self, ev: SyncEvent) {
        match ev {
            SyncEvent::Loaded { ticket, result } => {
                if !self.binding.finish_load(ticket) {
                    debug!(%ticket, "discarding stale task list");
                    return;
                }
                match result {
                    Ok(tasks) => self.engine.load(tasks),
                    Err(e) => {
                        warn!(error = %e, "loading tasks failed");
                        self.notify_gateway_error("Error loading tasks", &e);
                    }
                }
            }
            SyncEvent::Settled { mutation, response } => {
                let error = response.error().cloned();
                match self.engine.settle(mutation, response) {
                    Settlement::Confirmed | Settlement::Stale => {}
                    Settlement::Abandoned { kind, rolled_back } => {
                        let what = match kind {
                            MutationKind::Create => "Couldn't create task",
                            MutationKind::Update => "Couldn't update task",
                            MutationKind::Delete => "Couldn't delete task",
                        };
                        let what = if rolled_back {
                            what.to_string()
                        } else {
                            format!("{what} on the server (kept locally)")
                        };
                        match error {
                            Some(e) => self.notify_gateway_error(&what, &e),
                            None => self.notify(NoticeLevel::Error, what),
                        }
                    }
                }
            }
        }
    }

    fn notify_gateway_error(&mut self, context: &str, e: &GatewayError) {
        let text = match e.kind {
            ErrorKind::Unauthorized => format!("{context}: session expired, log in again"),
            _ => format!("{context}: {}", e.user_message()),
        };
        self.notify(NoticeLevel::Error, text);
    }

    pub fn notify(&mut self, level: NoticeLevel, text: impl Into<String>) {
        self.notices.push(Notice {
            at: Local::now(),
            level,
            text: text.into(),
        });
        if self.notices.len() > MAX_NOTICES {
            let excess = self.notices.len() - MAX_NOTICES;
            self.notices.drain(..excess);
        }
    }
}
