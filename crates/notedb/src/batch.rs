//! Batch update transaction coordinator. Ops write new commit objects
//! (harmless content-addressed garbage if the batch aborts) and the batch
//! commits by CAS-ing every touched ref from its observed tip. A single
//! stale tip aborts the attempt; every op then re-executes against freshly
//! reloaded state. Atomicity holds per repository: a batch never spans
//! repositories, and callers coordinating several repositories get no
//! cross-repository guarantee (see `IndexSynchronizer::reconcile`).

use std::collections::BTreeMap;

use notedb_core::id::{AccountId, ChangeId, ObjectId};
use notedb_core::refnames;
use notedb_core::types::Ident;
use notedb_store::{CasOutcome, NoteDbRepo, RefUpdate, StoreError};

use crate::config::NoteDbConfig;
use crate::delta::{ChangeDelta, DraftDelta};
use crate::notes::{self, ChangeNotes, DraftNotes};
use crate::retry::backoff_delay;
use crate::state::{self, ChangeState, Comment};
use crate::{EngineError, ValidationError};

/// A unit of mutation logic bound to one change. Executed once per attempt
/// against freshly loaded state; implementations must derive everything
/// from the context, never from state captured at construction time.
pub trait Op {
    fn execute(&mut self, ctx: &mut ChangeContext<'_>) -> Result<(), EngineError>;
}

/// Observes transaction progress. `after_ops_applied` runs between op
/// execution and ref CAS, which makes it the natural seam for conflict
/// injection in tests; `after_commit` runs once after all refs updated.
pub trait BatchListener {
    fn after_ops_applied(&self, _attempt: u32) {}
    fn after_commit(&self, _changes: &[ChangeId]) {}
}

struct DraftHandle {
    refname: String,
    old_tip: Option<ObjectId>,
    new_tip: Option<ObjectId>,
    comments: BTreeMap<String, Comment>,
}

/// Per-change execution context for one attempt.
pub struct ChangeContext<'a> {
    repo: &'a NoteDbRepo,
    pub change_id: ChangeId,
    ident: Ident,
    old_tip: Option<ObjectId>,
    new_tip: Option<ObjectId>,
    state: Option<ChangeState>,
    drafts: BTreeMap<AccountId, DraftHandle>,
    aux: Vec<RefUpdate>,
}

impl<'a> ChangeContext<'a> {
    fn open(repo: &'a NoteDbRepo, change_id: ChangeId, ident: Ident) -> Result<Self, EngineError> {
        let refname = refnames::change_meta_ref(change_id);
        let old_tip = repo.read_ref(&refname)?;
        let state = match old_tip {
            Some(tip) => Some(ChangeNotes::load_at(repo, change_id, tip)?.state),
            None => None,
        };
        Ok(Self {
            repo,
            change_id,
            ident,
            old_tip,
            new_tip: None,
            state,
            drafts: BTreeMap::new(),
            aux: Vec::new(),
        })
    }

    pub fn repo(&self) -> &'a NoteDbRepo {
        self.repo
    }

    pub fn ident(&self) -> &Ident {
        &self.ident
    }

    /// State as observed at the start of this attempt, plus deltas already
    /// pushed by earlier ops of the same batch. `None` if the change does
    /// not exist yet.
    pub fn state(&self) -> Option<&ChangeState> {
        self.state.as_ref()
    }

    /// Appends one meta commit for `delta` and folds it into the context
    /// state so later ops of this batch observe it.
    pub fn push_delta(&mut self, delta: ChangeDelta) -> Result<(), EngineError> {
        // Fold in memory first: a structurally invalid delta must fail the
        // op before a commit object is created.
        let next = state::apply(
            self.state.clone(),
            self.change_id,
            &delta,
            self.ident.when_ms,
        )
        .map_err(|e| ValidationError::InvalidDelta(e.to_string()))?;

        let tip = self.new_tip.or(self.old_tip);
        let commit = notes::new_meta_commit(self.repo, tip, &delta, &self.ident)?;
        self.new_tip = Some(commit);
        self.state = Some(next);
        Ok(())
    }

    /// Stages an auxiliary ref update committed atomically with the batch,
    /// e.g. the immutable per-patch-set ref.
    pub fn add_ref_update(
        &mut self,
        name: String,
        expected_old: Option<ObjectId>,
        new: Option<ObjectId>,
    ) {
        self.aux.push(RefUpdate {
            name,
            expected_old,
            new,
        });
    }

    /// The given account's draft comments as observed this attempt.
    pub fn draft_comments(
        &mut self,
        account: AccountId,
    ) -> Result<&BTreeMap<String, Comment>, EngineError> {
        self.ensure_draft_handle(account)?;
        Ok(&self.drafts[&account].comments)
    }

    /// Appends one draft commit for `delta` on the account's draft ref.
    pub fn push_draft_delta(
        &mut self,
        account: AccountId,
        delta: DraftDelta,
    ) -> Result<(), EngineError> {
        self.ensure_draft_handle(account)?;
        let handle = self.drafts.get_mut(&account).expect("handle just opened");
        for comment in &delta.puts {
            handle
                .comments
                .insert(comment.uuid.clone(), comment.clone());
        }
        for uuid in &delta.deletes {
            handle.comments.remove(uuid);
        }
        let tip = handle.new_tip.or(handle.old_tip);
        let commit = notes::new_draft_commit(self.repo, tip, &delta, &self.ident)?;
        handle.new_tip = Some(commit);
        Ok(())
    }

    fn ensure_draft_handle(&mut self, account: AccountId) -> Result<(), EngineError> {
        if !self.drafts.contains_key(&account) {
            let refname = refnames::draft_comments_ref(self.change_id, account);
            let old_tip = self.repo.read_ref(&refname)?;
            let comments = match old_tip {
                Some(tip) => {
                    DraftNotes::load_at(self.repo, self.change_id, account, tip)?.comments
                }
                None => BTreeMap::new(),
            };
            self.drafts.insert(
                account,
                DraftHandle {
                    refname,
                    old_tip,
                    new_tip: None,
                    comments,
                },
            );
        }
        Ok(())
    }

    fn stage(self, updates: &mut Vec<RefUpdate>) {
        if let Some(new_tip) = self.new_tip {
            updates.push(RefUpdate {
                name: refnames::change_meta_ref(self.change_id),
                expected_old: self.old_tip,
                new: Some(new_tip),
            });
        }
        for handle in self.drafts.into_values() {
            let Some(new_tip) = handle.new_tip else {
                continue;
            };
            // An emptied draft ref is deleted rather than left pointing at
            // a tombstone-only history.
            let new = if handle.comments.is_empty() {
                None
            } else {
                Some(new_tip)
            };
            if handle.old_tip.is_none() && new.is_none() {
                continue;
            }
            updates.push(RefUpdate {
                name: handle.refname,
                expected_old: handle.old_tip,
                new,
            });
        }
        updates.extend(self.aux);
    }
}

enum AttemptOutcome {
    Committed(Vec<ChangeId>),
    Conflict { refname: String },
}

pub struct BatchUpdate<'a> {
    repo: &'a NoteDbRepo,
    config: NoteDbConfig,
    ident: Ident,
    ops: Vec<(ChangeId, Box<dyn Op + 'a>)>,
    listeners: Vec<Box<dyn BatchListener + 'a>>,
}

impl<'a> BatchUpdate<'a> {
    pub fn new(repo: &'a NoteDbRepo, config: NoteDbConfig, ident: Ident) -> Self {
        Self {
            repo,
            config,
            ident,
            ops: Vec::new(),
            listeners: Vec::new(),
        }
    }

    pub fn add_op(&mut self, change_id: ChangeId, op: Box<dyn Op + 'a>) -> &mut Self {
        self.ops.push((change_id, op));
        self
    }

    pub fn add_listener(&mut self, listener: Box<dyn BatchListener + 'a>) -> &mut Self {
        self.listeners.push(listener);
        self
    }

    /// Runs the batch to completion: all touched refs updated, or an error
    /// with no ref modified. Validation failures abort immediately;
    /// CAS conflicts retry with backoff up to `max_attempts`.
    pub fn execute(mut self) -> Result<(), EngineError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_conflict = String::new();
        for attempt in 1..=max_attempts {
            tracing::debug!(attempt, "batch attempt opened");
            match self.attempt(attempt)? {
                AttemptOutcome::Committed(changes) => {
                    tracing::debug!(attempt, changes = changes.len(), "batch committed");
                    for listener in &self.listeners {
                        listener.after_commit(&changes);
                    }
                    return Ok(());
                }
                AttemptOutcome::Conflict { refname } => {
                    tracing::debug!(attempt, refname = %refname, "ref CAS conflict, retrying");
                    last_conflict = refname;
                    if attempt < max_attempts {
                        std::thread::sleep(backoff_delay(attempt, self.config.retry_base_ms));
                    }
                }
            }
        }
        tracing::warn!(
            attempts = max_attempts,
            refname = %last_conflict,
            "batch update exhausted retries"
        );
        Err(EngineError::RetryExhausted {
            refname: last_conflict,
            attempts: max_attempts,
        })
    }

    fn attempt(&mut self, attempt: u32) -> Result<AttemptOutcome, EngineError> {
        // Fresh contexts per attempt: state is reloaded, ops re-execute.
        let mut contexts: BTreeMap<ChangeId, ChangeContext<'a>> = BTreeMap::new();
        for (change_id, op) in &mut self.ops {
            if !contexts.contains_key(change_id) {
                contexts.insert(
                    *change_id,
                    ChangeContext::open(self.repo, *change_id, self.ident.clone())?,
                );
            }
            let ctx = contexts.get_mut(change_id).expect("context just opened");
            op.execute(ctx)?;
        }

        let changes: Vec<ChangeId> = contexts.keys().copied().collect();
        let mut updates = Vec::new();
        for (_, ctx) in contexts {
            ctx.stage(&mut updates);
        }
        tracing::debug!(attempt, refs = updates.len(), "ops applied");
        for listener in &self.listeners {
            listener.after_ops_applied(attempt);
        }

        if updates.is_empty() {
            return Ok(AttemptOutcome::Committed(changes));
        }
        match self.repo.batch_cas(&updates) {
            Ok(CasOutcome::Applied) => Ok(AttemptOutcome::Committed(changes)),
            Ok(CasOutcome::Conflict { name, .. }) => Ok(AttemptOutcome::Conflict { refname: name }),
            // a held ref lock is as transient as a moved tip
            Err(StoreError::LockContention(path)) => Ok(AttemptOutcome::Conflict {
                refname: path.display().to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
