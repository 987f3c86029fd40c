/// Optimistic reconciliation engine.
///
/// Two collections matter:
///
///   authoritative  the last server-confirmed task list (most recent first)
///   overlay        pending mutations, in proposal order, each tagged with the
///                  `MutationId` that proposed it
///
/// The visible list is always `compose(authoritative, overlay)`, recomputed on
/// every read. Nothing ever patches the visible list directly, so dropping an
/// overlay entry can never leave residue behind.
///
/// Each mutation is proposed synchronously (`propose_*`), which returns the
/// `Request` the caller must send to the gateway, and later settled with the
/// gateway's `Response`. Entries are found by tag, never by position, so
/// settlements may arrive in any order.
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GatewayError, SyncError};
use crate::task::{PlaceholderIds, Task, TaskDraft, TaskPatch};

// ── Mutations ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationId(u64);

impl std::fmt::Display for MutationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "m{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mutation {
    /// Placeholder task shown at the front until the server answers
    Add(Task),
    /// Full intended post-update task
    Update(Task),
    Delete(String),
}

impl Mutation {
    fn kind(&self) -> MutationKind {
        match self {
            Mutation::Add(_) => MutationKind::Create,
            Mutation::Update(_) => MutationKind::Update,
            Mutation::Delete(_) => MutationKind::Delete,
        }
    }
}

#[derive(Debug, Clone)]
struct OverlayEntry {
    id: MutationId,
    mutation: Mutation,
}

/// What the caller must send to the gateway for a proposed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Create(TaskDraft),
    Update { id: String, patch: TaskPatch },
    Delete(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub id: MutationId,
    pub request: Request,
}

/// Gateway outcome for a proposed mutation.
#[derive(Debug, Clone)]
pub enum Response {
    Created(Result<Task, GatewayError>),
    Updated(Result<Task, GatewayError>),
    Deleted(bool),
}

impl Response {
    fn kind(&self) -> MutationKind {
        match self {
            Response::Created(_) => MutationKind::Create,
            Response::Updated(_) => MutationKind::Update,
            Response::Deleted(_) => MutationKind::Delete,
        }
    }

    pub fn error(&self) -> Option<&GatewayError> {
        match self {
            Response::Created(Err(e)) | Response::Updated(Err(e)) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Server acknowledged; authoritative state updated, overlay entry dropped
    Confirmed,
    /// Server call failed. `rolled_back` says whether the authoritative state
    /// was left untouched (true) or the optimistic value committed anyway.
    Abandoned {
        kind: MutationKind,
        rolled_back: bool,
    },
    /// No overlay entry with this id: already settled, or the engine was reset
    Stale,
}

// ── Failure policy ────────────────────────────────────────────────────────────

/// What to do with the authoritative state when an update or delete fails.
/// Create always rolls back: there is no server id to commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Apply the optimistic value anyway, keeping the visible list stable
    #[default]
    Commit,
    /// Drop the overlay entry and leave the authoritative state as it was
    Rollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Policies {
    pub update: FailurePolicy,
    pub delete: FailurePolicy,
}

// ── Engine ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Reconciler {
    authoritative: Vec<Task>,
    overlay: Vec<OverlayEntry>,
    next_mutation: u64,
    placeholders: PlaceholderIds,
    policies: Policies,
}

impl Reconciler {
    pub fn new(policies: Policies) -> Self {
        Self {
            policies,
            ..Default::default()
        }
    }

    pub fn authoritative(&self) -> &[Task] {
        &self.authoritative
    }

    /// Number of mutations still waiting for the server.
    pub fn pending(&self) -> usize {
        self.overlay.len()
    }

    pub fn is_pending(&self, id: MutationId) -> bool {
        self.overlay.iter().any(|e| e.id == id)
    }

    pub fn visible(&self) -> Vec<Task> {
        compose(&self.authoritative, &self.overlay)
    }

    /// Replace the authoritative list with a fresh server listing. Pending
    /// overlay entries stay and are re-applied on top.
    ///
    /// A listing that already contains a task whose create is still pending
    /// shows it twice (placeholder plus server copy) until the create settles;
    /// settlement replaces any existing copy of the server id.
    pub fn load(&mut self, tasks: Vec<Task>) {
        let mut seen = std::collections::HashSet::new();
        self.authoritative = tasks
            .into_iter()
            .filter(|t| seen.insert(t.id.clone()))
            .collect();
        debug!(count = self.authoritative.len(), "authoritative list loaded");
    }

    /// Forget everything. Settlements for mutations proposed before the reset
    /// come back as `Stale`.
    pub fn reset(&mut self) {
        self.authoritative.clear();
        self.overlay.clear();
    }

    // ── Proposals ─────────────────────────────────────────────────────────────

    pub fn propose_create(&mut self, draft: TaskDraft) -> Result<Proposal, SyncError> {
        draft.validate()?;
        let placeholder = draft.clone().into_task(self.placeholders.next());
        let id = self.push(Mutation::Add(placeholder));
        Ok(Proposal {
            id,
            request: Request::Create(draft),
        })
    }

    /// Flip `completed` on a visible task. The request carries the last
    /// confirmed version of the task with only the flipped field changed.
    pub fn propose_toggle(&mut self, task_id: &str) -> Result<Proposal, SyncError> {
        let current = self.visible_persisted(task_id)?;
        let intended = current.toggled();
        let mut patch = match self.confirmed(task_id) {
            Some(confirmed) => TaskPatch::from_task(confirmed),
            None => TaskPatch::from_task(&current),
        };
        patch.completed = Some(intended.completed);
        Ok(self.propose_update_with(intended, patch))
    }

    /// Replace a visible task's fields with `task`'s.
    pub fn propose_update(&mut self, task: Task) -> Result<Proposal, SyncError> {
        self.visible_persisted(&task.id)?;
        if task.title.trim().is_empty() {
            return Err(SyncError::EmptyTitle);
        }
        let patch = TaskPatch::from_task(&task);
        Ok(self.propose_update_with(task, patch))
    }

    pub fn propose_delete(&mut self, task_id: &str) -> Result<Proposal, SyncError> {
        self.visible_persisted(task_id)?;
        let id = self.push(Mutation::Delete(task_id.to_string()));
        Ok(Proposal {
            id,
            request: Request::Delete(task_id.to_string()),
        })
    }

    fn propose_update_with(&mut self, intended: Task, patch: TaskPatch) -> Proposal {
        let task_id = intended.id.clone();
        let id = self.push(Mutation::Update(intended));
        Proposal {
            id,
            request: Request::Update { id: task_id, patch },
        }
    }

    fn push(&mut self, mutation: Mutation) -> MutationId {
        self.next_mutation += 1;
        let id = MutationId(self.next_mutation);
        debug!(mutation = %id, kind = ?mutation.kind(), "proposed");
        self.overlay.push(OverlayEntry { id, mutation });
        id
    }

    /// The visible task with this id, provided it has a server id.
    fn visible_persisted(&self, task_id: &str) -> Result<Task, SyncError> {
        let task = self
            .visible()
            .into_iter()
            .find(|t| t.id == task_id)
            .ok_or_else(|| SyncError::UnknownTask(task_id.to_string()))?;
        if task.is_placeholder() {
            return Err(SyncError::NotPersisted(task_id.to_string()));
        }
        Ok(task)
    }

    fn confirmed(&self, task_id: &str) -> Option<&Task> {
        self.authoritative.iter().find(|t| t.id == task_id)
    }

    // ── Settlement ────────────────────────────────────────────────────────────

    pub fn settle(&mut self, id: MutationId, response: Response) -> Settlement {
        let Some(pos) = self.overlay.iter().position(|e| e.id == id) else {
            debug!(mutation = %id, "settlement for unknown mutation ignored");
            return Settlement::Stale;
        };
        if self.overlay[pos].mutation.kind() != response.kind() {
            warn!(mutation = %id, "settlement kind does not match proposal; ignored");
            return Settlement::Stale;
        }
        let entry = self.overlay.remove(pos);

        let settlement = match (entry.mutation, response) {
            (Mutation::Add(_), Response::Created(Ok(task))) => {
                self.authoritative.retain(|t| t.id != task.id);
                self.authoritative.insert(0, task);
                Settlement::Confirmed
            }
            (Mutation::Add(_), Response::Created(Err(_))) => Settlement::Abandoned {
                kind: MutationKind::Create,
                rolled_back: true,
            },
            (Mutation::Update(intended), Response::Updated(Ok(_))) => {
                self.commit_update(intended);
                Settlement::Confirmed
            }
            (Mutation::Update(intended), Response::Updated(Err(_))) => {
                let rolled_back = self.policies.update == FailurePolicy::Rollback;
                if !rolled_back {
                    self.commit_update(intended);
                }
                Settlement::Abandoned {
                    kind: MutationKind::Update,
                    rolled_back,
                }
            }
            (Mutation::Delete(task_id), Response::Deleted(true)) => {
                self.authoritative.retain(|t| t.id != task_id);
                Settlement::Confirmed
            }
            (Mutation::Delete(task_id), Response::Deleted(false)) => {
                let rolled_back = self.policies.delete == FailurePolicy::Rollback;
                if !rolled_back {
                    self.authoritative.retain(|t| t.id != task_id);
                }
                Settlement::Abandoned {
                    kind: MutationKind::Delete,
                    rolled_back,
                }
            }
            // Kinds were checked above
            _ => Settlement::Stale,
        };
        debug!(mutation = %id, ?settlement, "settled");
        settlement
    }

    /// Commit the optimistic value. A task deleted in the meantime stays gone.
    fn commit_update(&mut self, intended: Task) {
        if let Some(slot) = self.authoritative.iter_mut().find(|t| t.id == intended.id) {
            *slot = intended;
        }
    }
}

/// Apply overlay entries, in proposal order, on top of the authoritative list.
/// A later entry for the same id wins.
fn compose(authoritative: &[Task], overlay: &[OverlayEntry]) -> Vec<Task> {
    let mut tasks = authoritative.to_vec();
    for entry in overlay {
        match &entry.mutation {
            Mutation::Add(task) => tasks.insert(0, task.clone()),
            Mutation::Update(task) => {
                for t in tasks.iter_mut().filter(|t| t.id == task.id) {
                    *t = task.clone();
                }
            }
            Mutation::Delete(task_id) => tasks.retain(|t| &t.id != task_id),
        }
    }
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::task::is_placeholder_id;

    fn task(id: &str, title: &str, completed: bool) -> Task {
        Task {
            id: id.to_string(),
            title: title.to_string(),
            description: None,
            completed,
        }
    }

    fn loaded() -> Reconciler {
        let mut engine = Reconciler::default();
        engine.load(vec![
            task("9", "Call mum", false),
            task("7", "Walk dog", false),
            task("3", "Pay rent", true),
        ]);
        engine
    }

    fn failure() -> GatewayError {
        GatewayError::new(ErrorKind::Network, "connection refused")
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_create_is_visible_immediately_with_placeholder() {
        let mut engine = loaded();
        let proposal = engine.propose_create(TaskDraft::new("Buy milk", None)).unwrap();

        let visible = engine.visible();
        assert_eq!(visible.len(), 4);
        assert_eq!(visible[0].title, "Buy milk");
        assert!(is_placeholder_id(&visible[0].id));
        assert_eq!(engine.authoritative().len(), 3);
        assert_eq!(proposal.request, Request::Create(TaskDraft::new("Buy milk", None)));
    }

    #[test]
    fn test_create_confirmed_replaces_placeholder_once() {
        let mut engine = loaded();
        let proposal = engine.propose_create(TaskDraft::new("Buy milk", None)).unwrap();
        let settled = engine.settle(proposal.id, Response::Created(Ok(task("42", "Buy milk", false))));

        assert_eq!(settled, Settlement::Confirmed);
        let visible = engine.visible();
        assert_eq!(ids(&visible), vec!["42", "9", "7", "3"]);
        assert!(!visible.iter().any(|t| t.is_placeholder()));
        assert_eq!(engine.pending(), 0);
    }

    #[test]
    fn test_create_failure_restores_previous_visible() {
        let mut engine = loaded();
        let before = engine.visible();
        let proposal = engine.propose_create(TaskDraft::new("Buy milk", None)).unwrap();
        let settled = engine.settle(proposal.id, Response::Created(Err(failure())));

        assert_eq!(
            settled,
            Settlement::Abandoned {
                kind: MutationKind::Create,
                rolled_back: true
            }
        );
        assert_eq!(engine.visible(), before);
    }

    #[test]
    fn test_empty_title_rejected_without_overlay() {
        let mut engine = loaded();
        let err = engine.propose_create(TaskDraft::new("  ", None)).unwrap_err();
        assert_eq!(err, SyncError::EmptyTitle);
        assert_eq!(engine.pending(), 0);
    }

    #[test]
    fn test_concurrent_creates_get_distinct_placeholders() {
        let mut engine = loaded();
        let a = engine.propose_create(TaskDraft::new("first", None)).unwrap();
        let b = engine.propose_create(TaskDraft::new("second", None)).unwrap();
        assert_ne!(a.id, b.id);

        let visible = engine.visible();
        assert_ne!(visible[0].id, visible[1].id);
        assert_eq!(visible[0].title, "second");
        assert_eq!(visible[1].title, "first");
    }

    #[test]
    fn test_creates_settling_out_of_order_drop_the_right_placeholder() {
        let mut engine = loaded();
        let a = engine.propose_create(TaskDraft::new("first", None)).unwrap();
        let b = engine.propose_create(TaskDraft::new("second", None)).unwrap();

        // Second one fails first, then the first one is confirmed
        engine.settle(b.id, Response::Created(Err(failure())));
        let visible = engine.visible();
        assert_eq!(visible[0].title, "first");
        assert!(visible[0].is_placeholder());

        engine.settle(a.id, Response::Created(Ok(task("50", "first", false))));
        assert_eq!(ids(&engine.visible()), vec!["50", "9", "7", "3"]);
    }

    #[test]
    fn test_toggle_flips_visible_before_settlement() {
        let mut engine = loaded();
        let proposal = engine.propose_toggle("7").unwrap();

        let visible = engine.visible();
        assert!(visible.iter().find(|t| t.id == "7").unwrap().completed);
        // Authoritative untouched until settlement
        assert!(!engine.confirmed("7").unwrap().completed);
        match proposal.request {
            Request::Update { id, patch } => {
                assert_eq!(id, "7");
                assert_eq!(patch.completed, Some(true));
                assert_eq!(patch.title.as_deref(), Some("Walk dog"));
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_toggle_commits_on_success_and_failure_by_default() {
        let mut engine = loaded();
        let ok = engine.propose_toggle("7").unwrap();
        engine.settle(ok.id, Response::Updated(Ok(task("7", "Walk dog", true))));
        assert!(engine.confirmed("7").unwrap().completed);

        let failed = engine.propose_toggle("3").unwrap();
        let settled = engine.settle(failed.id, Response::Updated(Err(failure())));
        assert_eq!(
            settled,
            Settlement::Abandoned {
                kind: MutationKind::Update,
                rolled_back: false
            }
        );
        assert!(!engine.confirmed("3").unwrap().completed);
        assert_eq!(engine.pending(), 0);
    }

    #[test]
    fn test_toggle_rollback_policy() {
        let mut engine = Reconciler::new(Policies {
            update: FailurePolicy::Rollback,
            delete: FailurePolicy::Commit,
        });
        engine.load(vec![task("7", "Walk dog", false)]);
        let before = engine.visible();
        let proposal = engine.propose_toggle("7").unwrap();
        let settled = engine.settle(proposal.id, Response::Updated(Err(failure())));

        assert_eq!(
            settled,
            Settlement::Abandoned {
                kind: MutationKind::Update,
                rolled_back: true
            }
        );
        assert_eq!(engine.visible(), before);
        assert!(!engine.confirmed("7").unwrap().completed);
    }

    #[test]
    fn test_delete_hides_immediately_and_stays_gone() {
        for outcome in [true, false] {
            let mut engine = loaded();
            let proposal = engine.propose_delete("9").unwrap();
            assert!(!engine.visible().iter().any(|t| t.id == "9"));

            engine.settle(proposal.id, Response::Deleted(outcome));
            assert!(!engine.visible().iter().any(|t| t.id == "9"));
            assert!(engine.confirmed("9").is_none());
        }
    }

    #[test]
    fn test_delete_rollback_policy_restores_task() {
        let mut engine = Reconciler::new(Policies {
            update: FailurePolicy::Commit,
            delete: FailurePolicy::Rollback,
        });
        engine.load(vec![task("9", "Call mum", false)]);
        let proposal = engine.propose_delete("9").unwrap();
        engine.settle(proposal.id, Response::Deleted(false));
        assert_eq!(ids(&engine.visible()), vec!["9"]);
    }

    #[test]
    fn test_placeholders_cannot_be_toggled_or_deleted() {
        let mut engine = loaded();
        engine.propose_create(TaskDraft::new("Buy milk", None)).unwrap();
        let placeholder = engine.visible()[0].id.clone();

        assert_eq!(
            engine.propose_toggle(&placeholder).unwrap_err(),
            SyncError::NotPersisted(placeholder.clone())
        );
        assert_eq!(
            engine.propose_delete(&placeholder).unwrap_err(),
            SyncError::NotPersisted(placeholder)
        );
        assert_eq!(engine.pending(), 1);
    }

    #[test]
    fn test_unknown_task() {
        let mut engine = loaded();
        assert_eq!(
            engine.propose_toggle("nope").unwrap_err(),
            SyncError::UnknownTask("nope".into())
        );
    }

    #[test]
    fn test_later_overlay_wins_for_same_id() {
        let mut engine = loaded();
        engine.propose_toggle("7").unwrap();
        engine.propose_toggle("7").unwrap();
        // Two flips: back to the original value while both are pending
        assert!(!engine.visible().iter().find(|t| t.id == "7").unwrap().completed);

        engine.propose_delete("7").unwrap();
        assert!(!engine.visible().iter().any(|t| t.id == "7"));
    }

    #[test]
    fn test_update_settling_after_delete_does_not_resurrect() {
        let mut engine = loaded();
        let toggle = engine.propose_toggle("7").unwrap();
        let delete = engine.propose_delete("7").unwrap();

        engine.settle(delete.id, Response::Deleted(true));
        engine.settle(toggle.id, Response::Updated(Ok(task("7", "Walk dog", true))));
        assert!(!engine.visible().iter().any(|t| t.id == "7"));
        assert!(engine.confirmed("7").is_none());
    }

    #[test]
    fn test_visible_is_recomputed_from_state() {
        let mut engine = loaded();
        let c = engine.propose_create(TaskDraft::new("Buy milk", None)).unwrap();
        engine.propose_toggle("7").unwrap();
        engine.propose_delete("3").unwrap();
        engine.settle(c.id, Response::Created(Err(failure())));

        let expected = compose(&engine.authoritative, &engine.overlay);
        assert_eq!(engine.visible(), expected);
        assert_eq!(ids(&engine.visible()), vec!["9", "7"]);
    }

    #[test]
    fn test_settlement_after_reset_is_stale() {
        let mut engine = loaded();
        let proposal = engine.propose_create(TaskDraft::new("Buy milk", None)).unwrap();
        engine.reset();
        let settled = engine.settle(proposal.id, Response::Created(Ok(task("42", "Buy milk", false))));
        assert_eq!(settled, Settlement::Stale);
        assert!(engine.visible().is_empty());
    }

    #[test]
    fn test_double_settlement_is_stale() {
        let mut engine = loaded();
        let proposal = engine.propose_delete("9").unwrap();
        assert_eq!(engine.settle(proposal.id, Response::Deleted(true)), Settlement::Confirmed);
        assert_eq!(engine.settle(proposal.id, Response::Deleted(true)), Settlement::Stale);
    }

    #[test]
    fn test_mismatched_response_kind_is_ignored() {
        let mut engine = loaded();
        let proposal = engine.propose_delete("9").unwrap();
        let settled = engine.settle(proposal.id, Response::Updated(Err(failure())));
        assert_eq!(settled, Settlement::Stale);
        assert!(engine.is_pending(proposal.id));
    }

    #[test]
    fn test_load_keeps_pending_overlay_and_dedupes() {
        let mut engine = Reconciler::default();
        let proposal = engine.propose_create(TaskDraft::new("Buy milk", None)).unwrap();
        engine.load(vec![task("1", "a", false), task("1", "a again", false)]);

        let visible = engine.visible();
        assert_eq!(visible.len(), 2);
        assert!(visible[0].is_placeholder());
        assert_eq!(visible[1].title, "a");
        assert!(engine.is_pending(proposal.id));
    }

    #[test]
    fn test_confirmed_create_with_existing_id_is_not_duplicated() {
        let mut engine = loaded();
        let proposal = engine.propose_create(TaskDraft::new("Walk dog", None)).unwrap();
        engine.settle(proposal.id, Response::Created(Ok(task("7", "Walk dog", false))));
        assert_eq!(ids(&engine.visible()), vec!["7", "9", "3"]);
    }

    #[test]
    fn test_update_edits_fields() {
        let mut engine = loaded();
        let mut edited = task("9", "Call dad", false);
        edited.description = Some("after lunch".into());
        let proposal = engine.propose_update(edited.clone()).unwrap();
        assert_eq!(engine.visible()[0], edited);

        engine.settle(proposal.id, Response::Updated(Ok(edited.clone())));
        assert_eq!(engine.confirmed("9"), Some(&edited));

        assert_eq!(
            engine.propose_update(task("9", " ", false)).unwrap_err(),
            SyncError::EmptyTitle
        );
    }
}
