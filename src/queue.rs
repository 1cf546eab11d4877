//! Due-card scoping and the in-memory review queue a study session drains.

use std::collections::{HashSet, VecDeque};

use crate::config::{Config, DEFAULT_BATCH_SIZE, DEFAULT_LOW_WATER_MARK};
use crate::models::{DeckId, DueCard};

/// Which cards a due query looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DueScope {
    AllDecks,
    /// A deck together with all of its subdecks
    DeckTree(DeckId),
    /// A single deck, subdecks excluded
    DeckOnly(DeckId),
}

impl DueScope {
    pub fn deck_id(&self) -> Option<&str> {
        match self {
            DueScope::AllDecks => None,
            DueScope::DeckTree(id) | DueScope::DeckOnly(id) => Some(id),
        }
    }
}

/// Cards waiting to be reviewed, front first.
///
/// The card at the front is the one on screen. It stays queued until
/// `advance` is called, which keeps a refill from handing it back.
#[derive(Debug, Clone)]
pub struct ReviewQueue {
    cards: VecDeque<DueCard>,
    low_water_mark: usize,
    batch_size: usize,
}

impl Default for ReviewQueue {
    fn default() -> Self {
        Self::new(DEFAULT_LOW_WATER_MARK)
    }
}

impl ReviewQueue {
    pub fn new(low_water_mark: usize) -> Self {
        Self {
            cards: VecDeque::new(),
            low_water_mark,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Empty queue tuned by the session settings in `config`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            cards: VecDeque::new(),
            low_water_mark: config.low_water_mark,
            batch_size: config.batch_size.max(1),
        }
    }

    pub fn with_cards(cards: Vec<DueCard>, low_water_mark: usize) -> Self {
        let mut queue = Self::new(low_water_mark);
        queue.merge(cards);
        queue
    }

    pub fn current(&self) -> Option<&DueCard> {
        self.cards.front()
    }

    /// Drop the current card after it has been rated and return it.
    pub fn advance(&mut self) -> Option<DueCard> {
        self.cards.pop_front()
    }

    /// Cards requested per refill.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn remaining(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// True once the queue has drained to the low-water mark.
    pub fn needs_refill(&self) -> bool {
        self.cards.len() <= self.low_water_mark
    }

    /// Append fetched cards that are not queued yet, keyed by card id.
    ///
    /// Duplicates inside `fetched` collapse to their first occurrence.
    /// Returns how many cards were appended.
    pub fn merge(&mut self, fetched: Vec<DueCard>) -> usize {
        let mut queued: HashSet<String> = self.cards.iter().map(|c| c.card.id.clone()).collect();
        let before = self.cards.len();

        for card in fetched {
            if queued.insert(card.card.id.clone()) {
                self.cards.push_back(card);
            }
        }

        let added = self.cards.len() - before;
        tracing::debug!(added, remaining = self.cards.len(), "merged due cards into queue");
        added
    }

    pub fn iter(&self) -> impl Iterator<Item = &DueCard> {
        self.cards.iter()
    }
}
