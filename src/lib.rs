//! Spaced-repetition scheduling and due-card retrieval for hierarchical
//! flashcard decks, persisted in SQLite.
//!
//! The scheduler is pure and takes `now` explicitly. The [`Database`] owns
//! storage and applies a review (state update plus log append) atomically.

pub mod config;
pub mod db;
pub mod deck_tree;
pub mod error;
pub mod models;
pub mod queue;
pub mod scheduler;
pub mod stats;

pub use config::Config;
pub use db::Database;
pub use deck_tree::{DeckRow, DeckTree};
pub use error::{Result, StoreError};
pub use models::{Card, CardId, DayCount, Deck, DeckId, DueCard, Rating, ReviewLogEntry, ReviewState, Stats};
pub use queue::{DueScope, ReviewQueue};
pub use scheduler::{format_due_label, preview_all, preview_next, schedule_next, Preview};
