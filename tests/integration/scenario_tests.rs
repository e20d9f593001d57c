use notedb::ops::{
    CommentInput, CreateChangeOp, CreatePatchSetOp, LabelType, MergeSpec, PostCommentOp,
    PublishCommentsOp, PutDraftOp, UpdateChangeOp,
};
use notedb::merge::MergeStrategy;
use notedb::state::ChangeStatus;
use notedb::{ChangeNotes, DraftNotes, EngineError, NoteDb, ValidationError};
use notedb_core::id::{AccountId, ChangeId, ObjectId};
use notedb_core::refnames;
use notedb_core::types::Ident;
use notedb_store::{FileOp, NoteDbRepo};

fn make_db() -> (tempfile::TempDir, NoteDb) {
    let tmp = tempfile::tempdir().unwrap();
    let db = NoteDb::init(tmp.path()).unwrap();
    (tmp, db)
}

fn uploader() -> Ident {
    Ident::new("Uploader", "uploader@example.com", 1_000)
}

fn create_change(db: &NoteDb, files: Vec<FileOp>) -> ChangeId {
    let id = db.next_change_id().unwrap();
    let mut batch = db.new_batch(uploader());
    batch.add_op(
        id,
        Box::new(
            CreateChangeOp::new("main", "A change", "A change\n\nBody.\n", AccountId::new(1))
                .files(files),
        ),
    );
    batch.execute().unwrap();
    id
}

fn add_patch_set(db: &NoteDb, id: ChangeId, files: Vec<FileOp>) {
    let mut batch = db.new_batch(uploader());
    batch.add_op(
        id,
        Box::new(CreatePatchSetOp::new("A change\n\nBody.\n", AccountId::new(1)).files(files)),
    );
    batch.execute().unwrap();
}

// === Creation: first patch set is current, all refs land atomically ===
#[test]
fn create_change_lands_meta_and_patch_set_refs() {
    let (_tmp, db) = make_db();
    let id = create_change(&db, vec![FileOp::put("a.txt", "one\n")]);

    let notes = db.load_change(id).unwrap().unwrap();
    assert_eq!(notes.state.branch, "main");
    assert_eq!(notes.state.status, ChangeStatus::New);
    assert_eq!(notes.state.current_patch_set, 1);
    assert_eq!(notes.state.messages[0].text, "Uploaded patch set 1.");

    // the patch set ref points at the code commit recorded in the state
    let ps_ref = db
        .repo()
        .read_ref(&refnames::patch_set_ref(id, 1))
        .unwrap()
        .unwrap();
    assert_eq!(ps_ref, notes.state.current().commit);

    // the code commit carries the change key as its footer
    let commit = db.repo().parse_commit(&ps_ref).unwrap();
    assert!(commit
        .message
        .contains(&format!("Change-Id: {}", notes.state.change_key)));
}

// === New patch set: parent is the previous current patch set commit ===
#[test]
fn patch_set_chain_parents() {
    let (_tmp, db) = make_db();
    let id = create_change(&db, vec![FileOp::put("a.txt", "one\n")]);
    let ps1 = db.load_change(id).unwrap().unwrap().state.current().commit;

    add_patch_set(&db, id, vec![FileOp::put("a.txt", "two\n")]);

    let notes = db.load_change(id).unwrap().unwrap();
    assert_eq!(notes.state.current_patch_set, 2);
    let ps2 = notes.state.current().commit;
    assert_eq!(db.repo().parse_commit(&ps2).unwrap().parents, vec![ps1]);
    // patch set 1 is still readable
    assert_eq!(notes.state.patch_sets[&1].commit, ps1);
}

// === Two writers racing on the same change: numbers stay dense ===
#[test]
fn concurrent_patch_set_uploads_get_distinct_dense_numbers() {
    let (_tmp, db) = make_db();
    let id = create_change(&db, vec![FileOp::put("a.txt", "one\n")]);

    std::thread::scope(|scope| {
        for n in 0..2 {
            let db = &db;
            scope.spawn(move || {
                let mut batch = db.new_batch(uploader());
                batch.add_op(
                    id,
                    Box::new(
                        CreatePatchSetOp::new("A change\n\nBody.\n", AccountId::new(1))
                            .files(vec![FileOp::put("a.txt", format!("racer {n}\n"))]),
                    ),
                );
                batch.execute().unwrap();
            });
        }
    });

    let notes = db.load_change(id).unwrap().unwrap();
    let numbers: Vec<u32> = notes.state.patch_sets.keys().copied().collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(notes.state.current_patch_set, 3);
    // one immutable ref per patch set
    for n in 1..=3 {
        assert!(db
            .repo()
            .read_ref(&refnames::patch_set_ref(id, n))
            .unwrap()
            .is_some());
    }
}

// === Concurrent change creation across threads: ids never collide ===
#[test]
fn concurrent_creation_allocates_distinct_changes() {
    let (_tmp, db) = make_db();

    let ids: Vec<ChangeId> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let db = &db;
                scope.spawn(move || {
                    let id = db.next_change_id().unwrap();
                    let mut batch = db.new_batch(uploader());
                    batch.add_op(
                        id,
                        Box::new(
                            CreateChangeOp::new(
                                "main",
                                format!("change {n}"),
                                format!("change {n}\n"),
                                AccountId::new(1),
                            )
                            .files(vec![FileOp::put("f.txt", format!("{n}\n"))]),
                        ),
                    );
                    batch.execute().unwrap();
                    id
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 4);
    for id in ids {
        assert!(db.load_change(id).unwrap().is_some());
    }
}

// === Read-your-writes: a committed batch is visible to the next load ===
#[test]
fn committed_batch_visible_immediately() {
    let (_tmp, db) = make_db();
    let id = create_change(&db, vec![FileOp::put("a.txt", "one\n")]);

    let mut batch = db.new_batch(uploader());
    batch.add_op(
        id,
        Box::new(
            UpdateChangeOp::new(AccountId::new(2))
                .set_topic("perf")
                .add_reviewer(AccountId::new(3))
                .message("Looks promising."),
        ),
    );
    batch.execute().unwrap();

    let notes = db.load_change(id).unwrap().unwrap();
    assert_eq!(notes.state.topic.as_deref(), Some("perf"));
    assert!(notes.state.reviewers.contains(&AccountId::new(3)));
    assert_eq!(notes.state.messages.last().unwrap().text, "Looks promising.");
}

// === Approvals: validated against labels, last write wins ===
#[test]
fn approvals_validated_and_replace() {
    let (_tmp, db) = make_db();
    let id = create_change(&db, vec![FileOp::put("a.txt", "one\n")]);
    let labels = || vec![LabelType::new("Code-Review", -2, 2)];

    let mut batch = db.new_batch(uploader());
    batch.add_op(
        id,
        Box::new(
            UpdateChangeOp::new(AccountId::new(2))
                .labels(labels())
                .approve("Code-Review", 2),
        ),
    );
    batch.execute().unwrap();

    // out of range
    let mut batch = db.new_batch(uploader());
    batch.add_op(
        id,
        Box::new(
            UpdateChangeOp::new(AccountId::new(2))
                .labels(labels())
                .approve("Code-Review", 3),
        ),
    );
    assert!(matches!(
        batch.execute().unwrap_err(),
        EngineError::Validation(ValidationError::ApprovalOutOfRange { .. })
    ));

    // unknown label
    let mut batch = db.new_batch(uploader());
    batch.add_op(
        id,
        Box::new(
            UpdateChangeOp::new(AccountId::new(2))
                .labels(labels())
                .approve("Verified", 1),
        ),
    );
    assert!(matches!(
        batch.execute().unwrap_err(),
        EngineError::Validation(ValidationError::UnknownLabel(_))
    ));

    let notes = db.load_change(id).unwrap().unwrap();
    assert_eq!(notes.state.approvals.len(), 1);
    assert_eq!(*notes.state.approvals.values().next().unwrap(), 2);
}

// === Lifecycle: closed changes reject uploads until restored ===
#[test]
fn abandon_blocks_uploads_restore_reopens() {
    let (_tmp, db) = make_db();
    let id = create_change(&db, vec![FileOp::put("a.txt", "one\n")]);

    let mut batch = db.new_batch(uploader());
    batch.add_op(
        id,
        Box::new(UpdateChangeOp::new(AccountId::new(1)).abandon().message("Stale.")),
    );
    batch.execute().unwrap();
    assert_eq!(
        db.load_change(id).unwrap().unwrap().state.status,
        ChangeStatus::Abandoned
    );

    let mut batch = db.new_batch(uploader());
    batch.add_op(
        id,
        Box::new(CreatePatchSetOp::new("A change\n", AccountId::new(1))),
    );
    assert!(matches!(
        batch.execute().unwrap_err(),
        EngineError::Validation(ValidationError::ChangeClosed(_))
    ));

    let mut batch = db.new_batch(uploader());
    batch.add_op(id, Box::new(UpdateChangeOp::new(AccountId::new(1)).restore()));
    batch.execute().unwrap();

    add_patch_set(&db, id, vec![FileOp::put("a.txt", "two\n")]);
    let notes = db.load_change(id).unwrap().unwrap();
    assert_eq!(notes.state.status, ChangeStatus::New);
    assert_eq!(notes.state.current_patch_set, 2);

    // merged is terminal
    let mut batch = db.new_batch(uploader());
    batch.add_op(id, Box::new(UpdateChangeOp::new(AccountId::new(1)).mark_merged()));
    batch.execute().unwrap();
    let mut batch = db.new_batch(uploader());
    batch.add_op(id, Box::new(UpdateChangeOp::new(AccountId::new(1)).restore()));
    assert!(matches!(
        batch.execute().unwrap_err(),
        EngineError::Validation(ValidationError::ChangeClosed(_))
    ));
}

// === Merge patch sets: clean, rejected, and conflict-carrying ===
#[test]
fn merge_patch_set_records_conflict_provenance() {
    let (_tmp, db) = make_db();
    let id = create_change(&db, vec![FileOp::put("a.txt", "base\n")]);
    let ps1 = db.load_change(id).unwrap().unwrap().state.current().commit;

    // a side branch editing the same file from the same parent
    let theirs = side_commit(db.repo(), ps1, &[FileOp::put("a.txt", "theirs\n")]);

    // our side moves on too, so the three-way merge really conflicts
    add_patch_set(&db, id, vec![FileOp::put("a.txt", "ours\n")]);
    let ps2 = db.load_change(id).unwrap().unwrap().state.current().commit;

    let merge = |allow| {
        MergeSpec {
            theirs,
            strategy: MergeStrategy::ThreeWay,
            allow_conflicts: allow,
        }
    };

    let mut batch = db.new_batch(uploader());
    batch.add_op(
        id,
        Box::new(CreatePatchSetOp::new("A change\n", AccountId::new(1)).merge_of(merge(false))),
    );
    assert!(matches!(
        batch.execute().unwrap_err(),
        EngineError::Validation(ValidationError::MergeConflicts { .. })
    ));
    // the rejected merge wrote nothing
    assert_eq!(
        db.load_change(id).unwrap().unwrap().state.current_patch_set,
        2
    );

    let mut batch = db.new_batch(uploader());
    batch.add_op(
        id,
        Box::new(CreatePatchSetOp::new("A change\n", AccountId::new(1)).merge_of(merge(true))),
    );
    batch.execute().unwrap();

    let notes = db.load_change(id).unwrap().unwrap();
    let ps3 = &notes.state.patch_sets[&3];
    let conflicts = ps3.conflicts.as_ref().unwrap();
    assert_eq!(conflicts.ours, ps2);
    assert_eq!(conflicts.theirs, theirs);
    assert_eq!(conflicts.paths, vec!["a.txt".to_string()]);
    // merge commit has both parents
    assert_eq!(
        db.repo().parse_commit(&ps3.commit).unwrap().parents,
        vec![ps2, theirs]
    );
}

fn side_commit(repo: &NoteDbRepo, parent: ObjectId, ops: &[FileOp]) -> ObjectId {
    let base_tree = repo.parse_commit(&parent).unwrap().tree;
    let tree = repo.insert_tree(Some(&base_tree), ops).unwrap();
    let who = Ident::new("Side", "side@example.com", 2_000);
    repo.insert_commit(tree, vec![parent], who.clone(), who, "side work\n".into())
        .unwrap()
}

// === Foreign Change-Id footer on an upload is rejected ===
#[test]
fn wrong_change_key_rejected() {
    let (_tmp, db) = make_db();
    let id = create_change(&db, vec![FileOp::put("a.txt", "one\n")]);

    let foreign = format!("A change\n\nChange-Id: I{}\n", "9a".repeat(20));
    let mut batch = db.new_batch(uploader());
    batch.add_op(
        id,
        Box::new(CreatePatchSetOp::new(foreign, AccountId::new(1))),
    );
    assert!(matches!(
        batch.execute().unwrap_err(),
        EngineError::Validation(ValidationError::WrongChangeKey { .. })
    ));
}

// === Change key synthesis is deterministic across repositories ===
#[test]
fn change_key_synthesis_is_reproducible() {
    let keys: Vec<String> = (0..2)
        .map(|_| {
            let (_tmp, db) = make_db();
            let id = create_change(&db, vec![FileOp::put("a.txt", "one\n")]);
            db.load_change(id)
                .unwrap()
                .unwrap()
                .state
                .change_key
                .as_str()
                .to_string()
        })
        .collect();
    assert_eq!(keys[0], keys[1]);
}

// === Drafts: private until published, published atomically ===
#[test]
fn draft_publish_is_atomic_and_exclusive() {
    let (_tmp, db) = make_db();
    let id = create_change(&db, vec![FileOp::put("a.txt", "one\n")]);
    let reviewer = AccountId::new(7);

    let mut batch = db.new_batch(uploader());
    batch.add_op(
        id,
        Box::new(PutDraftOp::new(
            reviewer,
            CommentInput {
                path: Some("a.txt".into()),
                line: Some(1),
                text: "draft".into(),
                ..Default::default()
            },
        )),
    );
    batch.execute().unwrap();

    // visible only on the reviewer's draft ref
    assert!(db
        .load_change(id)
        .unwrap()
        .unwrap()
        .state
        .comments
        .is_empty());
    assert_eq!(
        DraftNotes::load(db.repo(), id, reviewer)
            .unwrap()
            .unwrap()
            .comments
            .len(),
        1
    );

    let mut batch = db.new_batch(uploader());
    batch.add_op(
        id,
        Box::new(PublishCommentsOp::new(reviewer).message("Done reviewing.")),
    );
    batch.execute().unwrap();

    let notes = db.load_change(id).unwrap().unwrap();
    assert_eq!(notes.state.comments.len(), 1);
    assert_eq!(notes.state.messages.last().unwrap().text, "Done reviewing.");
    // never both draft and published
    assert!(DraftNotes::load(db.repo(), id, reviewer).unwrap().is_none());
}

// === Broken reply chain rejects the batch with the tip untouched ===
#[test]
fn orphan_reply_leaves_no_trace() {
    let (_tmp, db) = make_db();
    let id = create_change(&db, vec![FileOp::put("a.txt", "one\n")]);
    let tip_before = db.load_change(id).unwrap().unwrap().tip;

    let mut batch = db.new_batch(uploader());
    batch.add_op(
        id,
        Box::new(PostCommentOp::new(
            AccountId::new(2),
            CommentInput {
                text: "reply to nothing".into(),
                parent_uuid: Some("does-not-exist".into()),
                ..Default::default()
            },
        )),
    );
    assert!(matches!(
        batch.execute().unwrap_err(),
        EngineError::Validation(ValidationError::MissingCommentParent(_))
    ));
    assert_eq!(db.load_change(id).unwrap().unwrap().tip, tip_before);
}

// === Index: synchronized after commit, repaired by reconcile ===
#[test]
fn index_follows_committed_batches() {
    let (_tmp, db) = make_db();
    let id = create_change(&db, vec![FileOp::put("a.txt", "one\n")]);

    {
        let sync = db.open_index().unwrap();
        let mut batch = db.new_batch(uploader());
        batch.add_op(
            id,
            Box::new(UpdateChangeOp::new(AccountId::new(1)).set_topic("indexed")),
        );
        batch.add_listener(Box::new(sync));
        batch.execute().unwrap();
    }

    let sync = db.open_index().unwrap();
    let doc = sync.index().get(id).unwrap().unwrap();
    assert_eq!(doc.topic.as_deref(), Some("indexed"));

    // a change written while the index was away is repaired by reconcile
    let id2 = create_change(&db, vec![FileOp::put("b.txt", "two\n")]);
    assert!(sync.index().get(id2).unwrap().is_none());
    sync.reconcile().unwrap();
    assert!(sync.index().get(id2).unwrap().is_some());
    assert_eq!(
        sync.index().by_status(ChangeStatus::New).unwrap(),
        vec![id, id2]
    );
}

// === Replay equivalence: pinned load at an old tip sees the old state ===
#[test]
fn load_at_old_tip_is_a_consistent_snapshot() {
    let (_tmp, db) = make_db();
    let id = create_change(&db, vec![FileOp::put("a.txt", "one\n")]);
    let old = db.load_change(id).unwrap().unwrap();

    add_patch_set(&db, id, vec![FileOp::put("a.txt", "two\n")]);

    let pinned = ChangeNotes::load_at(db.repo(), id, old.tip).unwrap();
    assert_eq!(pinned.state, old.state);
    let fresh = db.load_change(id).unwrap().unwrap();
    assert_eq!(fresh.state.current_patch_set, 2);
}
