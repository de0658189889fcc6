//! Keyword queue for one batch.
//!
//! Each entry carries its own atomic state. Claiming is a compare-and-swap on that entry, so two
//! workers can never hold the same keyword and claims on different keywords never contend.
//! A [`Claim`] dropped without [`Claim::mark_done`] puts its keyword back to pending.

use chrono::{DateTime, Utc};
use lotwatch_core::{KeywordId, KeywordOrder, OutcomeKind, SearchConfig};
use lotwatch_db::{Keyword, KeywordStatus};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};

/// Per-keyword queue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QueueState {
    Pending = 0,
    InProgress = 1,
    Done = 2,
    Failed = 3,
    Cancelled = 4,
}

impl QueueState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::InProgress,
            2 => Self::Done,
            3 => Self::Failed,
            _ => Self::Cancelled,
        }
    }

    fn settled(outcome: OutcomeKind) -> Self {
        match outcome {
            OutcomeKind::Succeeded => Self::Done,
            OutcomeKind::Failed => Self::Failed,
            OutcomeKind::Cancelled => Self::Cancelled,
        }
    }
}

/// Dispatch order hint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum QueueOrder {
    /// Import order
    #[default]
    Import,
    /// Keywords in the listed categories first, in list order; import order otherwise
    CategoryFirst(Vec<String>),
    /// Never-searched keywords first, then oldest search first
    LeastRecentlySearched,
}

impl QueueOrder {
    #[must_use]
    pub fn from_config(config: &SearchConfig) -> Self {
        match config.order {
            KeywordOrder::Import => Self::Import,
            KeywordOrder::CategoryFirst => Self::CategoryFirst(config.priority_categories.clone()),
            KeywordOrder::LeastRecentlySearched => Self::LeastRecentlySearched,
        }
    }
}

/// A keyword as the workers see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedKeyword {
    pub id: KeywordId,
    pub keyword: String,
    pub category: Option<String>,
    pub last_searched_at: Option<DateTime<Utc>>,
}

impl From<Keyword> for QueuedKeyword {
    fn from(keyword: Keyword) -> Self {
        Self {
            id: keyword.id,
            keyword: keyword.keyword,
            category: keyword.category,
            last_searched_at: keyword.last_searched_at,
        }
    }
}

#[derive(Debug)]
struct Entry {
    keyword: QueuedKeyword,
    state: AtomicU8,
}

impl Entry {
    fn current(&self) -> QueueState {
        QueueState::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// Claimable keywords for one batch.
#[derive(Debug)]
pub struct KeywordQueue {
    entries: Vec<Entry>,
    rejected: usize,
}

impl KeywordQueue {
    /// Admit the active keywords, drop duplicates, and order them.
    #[must_use]
    pub fn new(keywords: Vec<Keyword>, order: &QueueOrder) -> Self {
        let offered = keywords.len();
        let mut seen = HashSet::new();
        let mut admitted: Vec<QueuedKeyword> = keywords
            .into_iter()
            .filter(|k| k.status == KeywordStatus::Active)
            .filter(|k| seen.insert(k.id))
            .map(QueuedKeyword::from)
            .collect();
        let rejected = offered - admitted.len();
        if rejected > 0 {
            tracing::debug!("{} keywords not admitted (inactive or duplicate)", rejected);
        }

        admitted.sort_by_key(|k| k.id);
        match order {
            QueueOrder::Import => {}
            QueueOrder::CategoryFirst(categories) => {
                let rank = |k: &QueuedKeyword| {
                    k.category
                        .as_deref()
                        .and_then(|c| {
                            categories
                                .iter()
                                .position(|p| p.trim().eq_ignore_ascii_case(c.trim()))
                        })
                        .unwrap_or(categories.len())
                };
                admitted.sort_by_key(rank);
            }
            QueueOrder::LeastRecentlySearched => {
                admitted.sort_by_key(|k| (k.last_searched_at.is_some(), k.last_searched_at));
            }
        }

        Self {
            entries: admitted
                .into_iter()
                .map(|keyword| Entry {
                    keyword,
                    state: AtomicU8::new(QueueState::Pending as u8),
                })
                .collect(),
            rejected,
        }
    }

    /// Admitted keywords.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keywords offered but not admitted.
    #[must_use]
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Claim the next pending keyword in queue order.
    pub fn claim_next(&self) -> Option<Claim<'_>> {
        for index in 0..self.entries.len() {
            let claimed = self.entries[index]
                .state
                .compare_exchange(
                    QueueState::Pending as u8,
                    QueueState::InProgress as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok();
            if claimed {
                return Some(Claim {
                    queue: self,
                    index,
                    settled: false,
                });
            }
        }
        None
    }

    /// Claim up to `max` keywords.
    pub fn next_batch(&self, max: usize) -> Vec<Claim<'_>> {
        std::iter::from_fn(|| self.claim_next()).take(max).collect()
    }

    /// State of every admitted keyword, in queue order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(QueuedKeyword, QueueState)> {
        self.entries
            .iter()
            .map(|e| (e.keyword.clone(), e.current()))
            .collect()
    }

    /// Keywords nobody has claimed or that were released.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.count(QueueState::Pending)
    }

    #[must_use]
    pub fn in_progress_count(&self) -> usize {
        self.count(QueueState::InProgress)
    }

    fn count(&self, state: QueueState) -> usize {
        self.entries.iter().filter(|e| e.current() == state).count()
    }

    fn release(&self, index: usize) {
        // Only an in-progress entry goes back; a settled one stays settled
        let _ = self.entries[index].state.compare_exchange(
            QueueState::InProgress as u8,
            QueueState::Pending as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Exclusive hold on one keyword.
#[derive(Debug)]
pub struct Claim<'q> {
    queue: &'q KeywordQueue,
    index: usize,
    settled: bool,
}

impl Claim<'_> {
    #[must_use]
    pub fn keyword(&self) -> &QueuedKeyword {
        &self.queue.entries[self.index].keyword
    }

    /// Settle the keyword with its terminal outcome.
    pub fn mark_done(mut self, outcome: OutcomeKind) {
        self.queue.entries[self.index]
            .state
            .store(QueueState::settled(outcome) as u8, Ordering::Release);
        self.settled = true;
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.queue.release(self.index);
        }
    }
}
