//! Identity enumeration.
//!
//! Ledgers expose their key set in one of two ways: a direct "list all
//! keys" accessor, or only an append-only log of registration events that
//! has to be replayed from genesis. Both are modelled as an
//! [`EnumerationStrategy`] behind one [`KeyCursor`].
//!
//! A cursor is finite and single-use; each reconciliation cycle starts a
//! fresh one. Event replay always scans up to the head block observed when
//! the cursor starts, page by page, and only pulls the next page once the
//! previous one has been consumed.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, Result};
use crate::identity::TouristId;
use crate::ledger::LedgerClient;

/// How the key set is obtained from the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnumerationStrategy {
    /// The ledger's "list all keys" accessor.
    #[default]
    Direct,
    /// Replay of the registration event log from genesis to head.
    EventReplay,
}

impl EnumerationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::EventReplay => "event-replay",
        }
    }
}

impl std::fmt::Display for EnumerationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EnumerationStrategy {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "direct" => Ok(Self::Direct),
            "event-replay" | "events" => Ok(Self::EventReplay),
            other => Err(ReconcileError::Configuration(format!(
                "unknown enumeration strategy '{other}' (expected direct or event-replay)"
            ))),
        }
    }
}

enum CursorState {
    NotStarted,
    Replaying { next_block: u64, head: u64 },
    Exhausted,
}

/// Lazy, finite sequence of identity keys for one cycle.
pub struct KeyCursor {
    client: LedgerClient,
    strategy: EnumerationStrategy,
    page_blocks: u64,
    state: CursorState,
    buffered: VecDeque<TouristId>,
    seen: HashSet<TouristId>,
    yielded: usize,
}

impl KeyCursor {
    pub(crate) fn new(client: LedgerClient, strategy: EnumerationStrategy, page_blocks: u64) -> Self {
        Self {
            client,
            strategy,
            page_blocks: page_blocks.max(1),
            state: CursorState::NotStarted,
            buffered: VecDeque::new(),
            seen: HashSet::new(),
            yielded: 0,
        }
    }

    pub fn strategy(&self) -> EnumerationStrategy {
        self.strategy
    }

    /// Number of keys handed out so far.
    pub fn yielded(&self) -> usize {
        self.yielded
    }

    /// Next key, or `Ok(None)` once the sequence is exhausted.
    ///
    /// # Errors
    ///
    /// Any ledger failure while loading the next page. The cursor stays
    /// where it was; the caller decides whether to abandon it.
    pub async fn next(&mut self) -> Result<Option<TouristId>> {
        loop {
            if let Some(id) = self.buffered.pop_front() {
                self.yielded += 1;
                return Ok(Some(id));
            }
            if !self.fill().await? {
                return Ok(None);
            }
        }
    }

    /// Drain the cursor into a vector.
    pub async fn collect(mut self) -> Result<Vec<TouristId>> {
        let mut ids = Vec::new();
        while let Some(id) = self.next().await? {
            ids.push(id);
        }
        Ok(ids)
    }

    /// Load more keys into the buffer. Returns `false` when exhausted.
    async fn fill(&mut self) -> Result<bool> {
        match self.state {
            CursorState::Exhausted => Ok(false),
            CursorState::NotStarted => match self.strategy {
                EnumerationStrategy::Direct => {
                    let ids = self.client.list_identity_ids().await?;
                    self.push_unique(ids);
                    self.state = CursorState::Exhausted;
                    Ok(true)
                }
                EnumerationStrategy::EventReplay => {
                    let head = self.client.head_block().await?;
                    log::debug!("replaying registration events from genesis to block {head}");
                    self.state = CursorState::Replaying {
                        next_block: 0,
                        head,
                    };
                    Ok(true)
                }
            },
            CursorState::Replaying { next_block, head } => {
                if next_block > head {
                    self.state = CursorState::Exhausted;
                    return Ok(false);
                }
                let to = next_block.saturating_add(self.page_blocks - 1).min(head);
                let events = self.client.registration_events(next_block, to).await?;
                self.push_unique(events.into_iter().map(|e| e.tourist_id));
                self.state = if to == u64::MAX {
                    CursorState::Exhausted
                } else {
                    CursorState::Replaying {
                        next_block: to + 1,
                        head,
                    }
                };
                Ok(true)
            }
        }
    }

    fn push_unique(&mut self, ids: impl IntoIterator<Item = TouristId>) {
        for id in ids {
            if self.seen.insert(id.clone()) {
                self.buffered.push_back(id);
            }
        }
    }
}
