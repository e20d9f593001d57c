//! Monotonic id allocation from a CAS-guarded counter ref. The counter ref
//! points at a blob holding the next unallocated value in ASCII; a process
//! reserves ids in blocks and hands them out from memory. A value is only
//! ever returned after the CAS that reserved its block succeeded, so ids
//! never repeat even across crashed processes (unused tail ids of a block
//! are skipped, never reissued).

use std::sync::{Arc, Mutex};

use notedb_core::id::ChangeId;
use notedb_core::refnames;
use notedb_store::{CasOutcome, NoteDbRepo};

use crate::config::SequenceConfig;
use crate::retry::backoff_delay;
use crate::EngineError;

pub struct Sequence {
    repo: Arc<NoteDbRepo>,
    counter: String,
    refname: String,
    start: u64,
    block_size: u64,
    max_retries: u32,
    retry_base_ms: u64,
    block: Mutex<Block>,
}

/// Reserved id range `[next, limit)`; empty when `next == limit`.
#[derive(Debug, Clone, Copy)]
struct Block {
    next: u64,
    limit: u64,
}

impl Sequence {
    pub fn new(repo: Arc<NoteDbRepo>, counter: &str, start: u64, config: &SequenceConfig) -> Self {
        Self {
            repo,
            counter: counter.to_string(),
            refname: refnames::sequence_ref(counter),
            start,
            block_size: config.block_size.max(1),
            max_retries: config.max_retries,
            retry_base_ms: 2,
            block: Mutex::new(Block { next: 0, limit: 0 }),
        }
    }

    pub fn next(&self) -> Result<u64, EngineError> {
        let mut block = self.block.lock().expect("sequence mutex poisoned");
        if block.next >= block.limit {
            *block = self.reserve_block()?;
        }
        let value = block.next;
        block.next += 1;
        Ok(value)
    }

    fn reserve_block(&self) -> Result<Block, EngineError> {
        for attempt in 1..=self.max_retries {
            let observed = self.repo.read_ref(&self.refname)?;
            let current = match observed {
                Some(blob_id) => {
                    let data = self.repo.parse_blob(&blob_id)?;
                    parse_counter(&self.refname, &data)?
                }
                None => self.start,
            };
            let limit = current + self.block_size;
            let new_blob = self.repo.insert_blob(limit.to_string().as_bytes())?;

            match self
                .repo
                .cas_ref(&self.refname, observed, Some(new_blob))?
            {
                CasOutcome::Applied => {
                    return Ok(Block {
                        next: current,
                        limit,
                    });
                }
                CasOutcome::Conflict { .. } => {
                    // Another process reserved the block first; the
                    // tentative range is discarded, never handed out.
                    tracing::warn!(
                        counter = %self.counter,
                        attempt,
                        "sequence CAS lost, re-reading counter"
                    );
                    std::thread::sleep(backoff_delay(attempt, self.retry_base_ms));
                }
            }
        }
        Err(EngineError::SequenceExhausted {
            counter: self.counter.clone(),
            attempts: self.max_retries,
        })
    }
}

fn parse_counter(refname: &str, data: &[u8]) -> Result<u64, EngineError> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .ok_or_else(|| EngineError::CorruptEntity {
            refname: refname.to_string(),
            reason: "counter blob is not an integer".to_string(),
        })
}

/// The well-known counters of one repository.
pub struct Sequences {
    pub changes: Sequence,
}

impl Sequences {
    pub const FIRST_CHANGE_ID: u64 = 1;

    pub fn new(repo: Arc<NoteDbRepo>, config: &SequenceConfig) -> Self {
        Self {
            changes: Sequence::new(
                repo,
                refnames::CHANGES_SEQUENCE,
                Self::FIRST_CHANGE_ID,
                config,
            ),
        }
    }

    pub fn next_change_id(&self) -> Result<ChangeId, EngineError> {
        Ok(ChangeId::new(self.changes.next()?))
    }
}
