use thiserror::Error;

use crate::models::{CardId, DeckId};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Deck not found: {0}")]
    DeckNotFound(DeckId),

    #[error("Card not found: {0}")]
    CardNotFound(CardId),

    #[error("Cannot move deck {deck} under {parent}: it would become its own ancestor")]
    InvalidParent { deck: DeckId, parent: DeckId },
}

pub type Result<T> = std::result::Result<T, StoreError>;
