use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Local, TimeZone, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use crate::config::Config;
use crate::deck_tree::DeckTree;
use crate::error::{Result, StoreError};
use crate::models::{
    generate_id, Card, CardId, Deck, DeckId, DueCard, Rating, ReviewLogEntry, ReviewState, Stats,
};
use crate::queue::{DueScope, ReviewQueue};
use crate::scheduler::schedule_next;
use crate::stats;

const CARD_COLUMNS: &str = "c.id, c.deck_id, c.front, c.back, c.tags_json, c.created_at";
const STATE_COLUMNS: &str =
    "rs.card_id, rs.due_at, rs.interval_days, rs.ease_factor, rs.repetitions, rs.lapses, rs.last_reviewed_at";

/// Most deck ids bound into one due query.
pub const DECK_IDS_PER_QUERY: usize = 500;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        // In-memory databases report "memory" and keep it
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(journal_mode = %mode, "opened database");
        Ok(Self { conn })
    }

    /// Open the store at `config.db_path`, creating its directory and schema as needed.
    pub fn open_with_config(config: &Config) -> Result<Self> {
        if let Some(dir) = config.db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let db = Self::open(&config.db_path)?;
        db.init()?;
        tracing::info!(path = %config.db_path.display(), "database ready");
        Ok(db)
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS decks (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                parent_deck_id TEXT REFERENCES decks(id) ON DELETE SET NULL
            );

            CREATE TABLE IF NOT EXISTS cards (
                id TEXT PRIMARY KEY NOT NULL,
                deck_id TEXT NOT NULL,
                front TEXT NOT NULL,
                back TEXT NOT NULL,
                tags_json TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL,
                FOREIGN KEY (deck_id) REFERENCES decks(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS review_state (
                card_id TEXT PRIMARY KEY NOT NULL,
                due_at INTEGER NOT NULL,
                interval_days INTEGER NOT NULL DEFAULT 0,
                ease_factor REAL NOT NULL DEFAULT 2.5,
                repetitions INTEGER NOT NULL DEFAULT 0,
                lapses INTEGER NOT NULL DEFAULT 0,
                last_reviewed_at INTEGER,
                FOREIGN KEY (card_id) REFERENCES cards(id) ON DELETE CASCADE
            );

            -- Append-only audit trail, one row per rating
            CREATE TABLE IF NOT EXISTS review_log (
                id TEXT PRIMARY KEY NOT NULL,
                card_id TEXT NOT NULL,
                deck_id TEXT NOT NULL,
                rating TEXT NOT NULL CHECK(rating IN ('again', 'hard', 'good', 'easy')),
                reviewed_at INTEGER NOT NULL,
                FOREIGN KEY (card_id) REFERENCES cards(id) ON DELETE CASCADE,
                FOREIGN KEY (deck_id) REFERENCES decks(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_review_due ON review_state(due_at);
            CREATE INDEX IF NOT EXISTS idx_cards_deck ON cards(deck_id);
            CREATE INDEX IF NOT EXISTS idx_review_log_reviewed_at ON review_log(reviewed_at);
            CREATE INDEX IF NOT EXISTS idx_review_log_card ON review_log(card_id);
            "#,
        )?;

        // Databases created before subdecks existed
        self.migrate()?;

        // Index on a migrated column, so only after migration ensures it exists
        self.conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_decks_parent ON decks(parent_deck_id);",
        )?;

        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let has_parent_column = self
            .conn
            .prepare("SELECT parent_deck_id FROM decks LIMIT 1")
            .is_ok();

        if !has_parent_column {
            tracing::info!("adding decks.parent_deck_id");
            self.conn.execute_batch(
                "ALTER TABLE decks ADD COLUMN parent_deck_id TEXT REFERENCES decks(id) ON DELETE SET NULL;",
            )?;
        }

        Ok(())
    }

    /// Run `body` inside one transaction.
    ///
    /// Commits when `body` returns `Ok`. On `Err`, or if `body` panics, the
    /// transaction is dropped uncommitted and SQLite rolls it back.
    pub fn with_transaction<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let tx = self.conn.unchecked_transaction()?;
        match body(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                tracing::debug!(error = %e, "rolling back transaction");
                Err(e)
            }
        }
    }

    // Deck operations
    pub fn create_deck(&self, deck: &Deck) -> Result<()> {
        self.with_transaction(|tx| {
            if let Some(parent) = deck.parent_deck_id.as_deref() {
                if get_deck(tx, parent)?.is_none() {
                    return Err(StoreError::DeckNotFound(parent.to_string()));
                }
            }
            tx.execute(
                "INSERT INTO decks (id, name, created_at, parent_deck_id) VALUES (?1, ?2, ?3, ?4)",
                params![deck.id, deck.name, deck.created_at.timestamp_millis(), deck.parent_deck_id],
            )?;
            tracing::debug!(deck_id = %deck.id, parent = ?deck.parent_deck_id, "created deck");
            Ok(())
        })
    }

    pub fn create_subdeck(&self, name: &str, parent_deck_id: Option<&str>, now: DateTime<Utc>) -> Result<Deck> {
        let deck = Deck::new(name, parent_deck_id, now);
        self.create_deck(&deck)?;
        Ok(deck)
    }

    pub fn get_deck(&self, id: &str) -> Result<Option<Deck>> {
        get_deck(&self.conn, id)
    }

    /// All decks, newest first.
    pub fn list_decks(&self) -> Result<Vec<Deck>> {
        list_decks(&self.conn)
    }

    /// Move a deck under `parent_deck_id`, or to the top level with `None`.
    pub fn update_deck_parent(&self, deck_id: &str, parent_deck_id: Option<&str>) -> Result<()> {
        self.with_transaction(|tx| {
            let decks = list_decks(tx)?;
            let tree = DeckTree::new(&decks);

            if !tree.contains(deck_id) {
                return Err(StoreError::DeckNotFound(deck_id.to_string()));
            }
            if let Some(parent) = parent_deck_id {
                if !tree.contains(parent) {
                    return Err(StoreError::DeckNotFound(parent.to_string()));
                }
                if tree.would_create_cycle(deck_id, parent) {
                    return Err(StoreError::InvalidParent {
                        deck: deck_id.to_string(),
                        parent: parent.to_string(),
                    });
                }
            }

            tx.execute(
                "UPDATE decks SET parent_deck_id = ?1 WHERE id = ?2",
                params![parent_deck_id, deck_id],
            )?;
            tracing::debug!(deck_id, parent = ?parent_deck_id, "re-parented deck");
            Ok(())
        })
    }

    /// Delete a deck with its cards; its direct subdecks become top-level decks.
    pub fn delete_deck(&self, id: &str) -> Result<bool> {
        let rows = self.conn.execute("DELETE FROM decks WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// The deck plus all of its descendants, from a fresh snapshot of the deck table.
    pub fn subtree_of(&self, deck_id: &str) -> Result<HashSet<DeckId>> {
        let decks = self.list_decks()?;
        Ok(DeckTree::new(&decks).subtree_of(deck_id))
    }

    // Card operations
    /// Insert cards and their review states as one unit.
    pub fn add_cards(&self, cards: &[Card], states: &[ReviewState]) -> Result<()> {
        self.with_transaction(|tx| {
            {
                let mut insert_card = tx.prepare(
                    "INSERT INTO cards (id, deck_id, front, back, tags_json, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for card in cards {
                    insert_card.execute(params![
                        card.id,
                        card.deck_id,
                        card.front,
                        card.back,
                        serde_json::to_string(&card.tags)?,
                        card.created_at.timestamp_millis()
                    ])?;
                }

                let mut insert_state = tx.prepare(
                    r#"
                    INSERT INTO review_state (card_id, due_at, interval_days, ease_factor, repetitions, lapses, last_reviewed_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                )?;
                for state in states {
                    insert_state.execute(params![
                        state.card_id,
                        state.due_at.timestamp_millis(),
                        state.interval_days,
                        state.ease_factor,
                        state.repetitions,
                        state.lapses,
                        state.last_reviewed_at.map(|t| t.timestamp_millis())
                    ])?;
                }
            }
            tracing::debug!(cards = cards.len(), states = states.len(), "added cards");
            Ok(())
        })
    }

    /// Create a card in `deck_id` together with its initial, immediately due state.
    pub fn add_card(
        &self,
        deck_id: &str,
        front: &str,
        back: &str,
        tags: &[String],
        now: DateTime<Utc>,
    ) -> Result<Card> {
        if self.get_deck(deck_id)?.is_none() {
            return Err(StoreError::DeckNotFound(deck_id.to_string()));
        }

        let card = Card::new(deck_id, front, back, tags, now);
        let state = ReviewState::new(&card.id, now);
        self.add_cards(std::slice::from_ref(&card), std::slice::from_ref(&state))?;
        Ok(card)
    }

    pub fn get_card(&self, id: &str) -> Result<Option<Card>> {
        get_card(&self.conn, id)
    }

    pub fn get_review_state(&self, card_id: &str) -> Result<Option<ReviewState>> {
        get_review_state(&self.conn, card_id)
    }

    // Review operations
    /// Cards due at or before `now` within `scope`, most overdue first.
    ///
    /// Large deck trees are queried in chunks of `DECK_IDS_PER_QUERY` ids
    /// to stay under SQLite's bound-parameter limit; the per-chunk results
    /// are merged back into a single ordered page.
    pub fn due_cards(&self, scope: &DueScope, now: DateTime<Utc>, limit: usize) -> Result<Vec<DueCard>> {
        self.with_transaction(|tx| {
            let due = match scope {
                DueScope::AllDecks => query_due(tx, now, limit, None)?,
                DueScope::DeckOnly(deck_id) => query_due(tx, now, limit, Some(std::slice::from_ref(deck_id)))?,
                DueScope::DeckTree(deck_id) => {
                    let decks = list_decks(tx)?;
                    let mut subtree: Vec<DeckId> =
                        DeckTree::new(&decks).subtree_of(deck_id).into_iter().collect();
                    subtree.sort();

                    let mut due = Vec::new();
                    for chunk in subtree.chunks(DECK_IDS_PER_QUERY) {
                        due.extend(query_due(tx, now, limit, Some(chunk))?);
                    }
                    if subtree.len() > DECK_IDS_PER_QUERY {
                        due.sort_by(|a, b| {
                            a.state
                                .due_at
                                .cmp(&b.state.due_at)
                                .then_with(|| a.card.id.cmp(&b.card.id))
                        });
                        due.truncate(limit);
                    }
                    due
                }
            };

            tracing::debug!(?scope, found = due.len(), "fetched due cards");
            Ok(due)
        })
    }

    /// Top up `queue` from `scope` once it has drained to its low-water mark.
    ///
    /// Fetches one batch of `queue.batch_size()` cards and returns how many
    /// were new to the queue. A queue above the mark is left alone.
    pub fn refill_queue(&self, queue: &mut ReviewQueue, scope: &DueScope, now: DateTime<Utc>) -> Result<usize> {
        if !queue.needs_refill() {
            return Ok(0);
        }
        let fetched = self.due_cards(scope, now, queue.batch_size())?;
        Ok(queue.merge(fetched))
    }

    /// Persist a scheduled state and append its log entry atomically.
    ///
    /// The stored `last_reviewed_at` is `reviewed_at`. A card without a
    /// review state is `CardNotFound`; nothing is written in that case.
    pub fn record_review(
        &self,
        state: &ReviewState,
        deck_id: &str,
        rating: Rating,
        reviewed_at: DateTime<Utc>,
    ) -> Result<ReviewLogEntry> {
        self.with_transaction(|tx| write_review(tx, state, deck_id, rating, reviewed_at))
    }

    /// Rate a card: schedule its next review and record it in one transaction.
    pub fn review_card(&self, card_id: &str, rating: Rating, now: DateTime<Utc>) -> Result<ReviewState> {
        self.with_transaction(|tx| {
            let card = get_card(tx, card_id)?.ok_or_else(|| StoreError::CardNotFound(card_id.to_string()))?;
            let state =
                get_review_state(tx, card_id)?.ok_or_else(|| StoreError::CardNotFound(card_id.to_string()))?;

            let next = schedule_next(&state, rating, now);
            write_review(tx, &next, &card.deck_id, rating, now)?;
            Ok(next)
        })
    }

    /// Log entries for one card, oldest first.
    pub fn review_log(&self, card_id: &str) -> Result<Vec<ReviewLogEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, card_id, deck_id, rating, reviewed_at
            FROM review_log
            WHERE card_id = ?1
            ORDER BY reviewed_at ASC, id ASC
            "#,
        )?;

        let rows = stmt.query_map(params![card_id], |row| {
            Ok(ReviewLogEntry {
                id: row.get(0)?,
                card_id: row.get(1)?,
                deck_id: row.get(2)?,
                rating: row.get(3)?,
                reviewed_at: from_millis(row.get(4)?),
            })
        })?;

        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Statistics as of `now`, with days split at local midnight.
    pub fn get_stats(&self, now: DateTime<Utc>) -> Result<Stats> {
        self.get_stats_in(now, &Local)
    }

    pub fn get_stats_in<Tz: TimeZone>(&self, now: DateTime<Utc>, tz: &Tz) -> Result<Stats> {
        self.with_transaction(|tx| {
            let total_cards: i64 = tx.query_row("SELECT COUNT(*) FROM cards", [], |row| row.get(0))?;

            let due_cards: i64 = tx.query_row(
                "SELECT COUNT(*) FROM review_state WHERE due_at <= ?1",
                params![now.timestamp_millis()],
                |row| row.get(0),
            )?;

            let since = stats::window_start(now, tz);
            let mut stmt = tx.prepare("SELECT card_id, reviewed_at FROM review_log WHERE reviewed_at >= ?1")?;
            let recent = stmt
                .query_map(params![since.timestamp_millis()], |row| {
                    Ok((row.get::<_, CardId>(0)?, from_millis(row.get(1)?)))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            // Streamed newest first; reading stops at the first idle day
            let mut stmt = tx.prepare("SELECT reviewed_at FROM review_log ORDER BY reviewed_at DESC")?;
            let newest_first = stmt.query_map([], |row| row.get::<_, i64>(0).map(from_millis))?;
            let streak_days = stats::streak_from(newest_first, now, tz)?;

            Ok(stats::aggregate(total_cards, due_cards, &recent, streak_days, now, tz))
        })
    }
}

fn query_due(
    conn: &Connection,
    now: DateTime<Utc>,
    limit: usize,
    deck_ids: Option<&[DeckId]>,
) -> Result<Vec<DueCard>> {
    let base_query = format!(
        r#"
        SELECT {CARD_COLUMNS}, {STATE_COLUMNS}
        FROM review_state rs
        JOIN cards c ON c.id = rs.card_id
        WHERE rs.due_at <= ?1
        "#
    );

    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    params_vec.push(Box::new(now.timestamp_millis()));
    params_vec.push(Box::new(i64::try_from(limit).unwrap_or(i64::MAX)));

    let scope_filter = match deck_ids {
        Some(ids) => {
            let placeholders: Vec<String> = (0..ids.len()).map(|i| format!("?{}", i + 3)).collect();
            for id in ids {
                params_vec.push(Box::new(id.clone()));
            }
            format!("AND c.deck_id IN ({})", placeholders.join(", "))
        }
        None => String::new(),
    };

    let query = format!(
        "{} {} ORDER BY rs.due_at ASC, c.id ASC LIMIT ?2",
        base_query, scope_filter
    );

    let mut stmt = conn.prepare(&query)?;
    let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();

    let rows = stmt.query_map(params_refs.as_slice(), |row| {
        Ok(DueCard {
            card: card_from_row(row, 0)?,
            state: state_from_row(row, 6)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn write_review(
    conn: &Connection,
    state: &ReviewState,
    deck_id: &str,
    rating: Rating,
    reviewed_at: DateTime<Utc>,
) -> Result<ReviewLogEntry> {
    let updated = conn.execute(
        r#"
        UPDATE review_state
        SET due_at = ?1, interval_days = ?2, ease_factor = ?3, repetitions = ?4, lapses = ?5, last_reviewed_at = ?6
        WHERE card_id = ?7
        "#,
        params![
            state.due_at.timestamp_millis(),
            state.interval_days,
            state.ease_factor,
            state.repetitions,
            state.lapses,
            reviewed_at.timestamp_millis(),
            state.card_id
        ],
    )?;
    if updated == 0 {
        return Err(StoreError::CardNotFound(state.card_id.clone()));
    }

    let entry = ReviewLogEntry {
        id: generate_id("rev", reviewed_at),
        card_id: state.card_id.clone(),
        deck_id: deck_id.to_string(),
        rating,
        reviewed_at,
    };
    conn.execute(
        "INSERT INTO review_log (id, card_id, deck_id, rating, reviewed_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            entry.id,
            entry.card_id,
            entry.deck_id,
            entry.rating,
            entry.reviewed_at.timestamp_millis()
        ],
    )?;

    tracing::debug!(
        card_id = %state.card_id,
        rating = rating.as_str(),
        interval_days = state.interval_days,
        "recorded review"
    );
    Ok(entry)
}

fn get_deck(conn: &Connection, id: &str) -> Result<Option<Deck>> {
    let deck = conn
        .query_row(
            "SELECT id, name, created_at, parent_deck_id FROM decks WHERE id = ?1",
            params![id],
            deck_from_row,
        )
        .optional()?;
    Ok(deck)
}

fn list_decks(conn: &Connection) -> Result<Vec<Deck>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, created_at, parent_deck_id FROM decks ORDER BY created_at DESC, id ASC",
    )?;
    let rows = stmt.query_map([], deck_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn get_card(conn: &Connection, id: &str) -> Result<Option<Card>> {
    let card = conn
        .query_row(
            &format!("SELECT {CARD_COLUMNS} FROM cards c WHERE c.id = ?1"),
            params![id],
            |row| card_from_row(row, 0),
        )
        .optional()?;
    Ok(card)
}

fn get_review_state(conn: &Connection, card_id: &str) -> Result<Option<ReviewState>> {
    let state = conn
        .query_row(
            &format!("SELECT {STATE_COLUMNS} FROM review_state rs WHERE rs.card_id = ?1"),
            params![card_id],
            |row| state_from_row(row, 0),
        )
        .optional()?;
    Ok(state)
}

fn deck_from_row(row: &Row<'_>) -> rusqlite::Result<Deck> {
    Ok(Deck {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: from_millis(row.get(2)?),
        parent_deck_id: row.get(3)?,
    })
}

fn card_from_row(row: &Row<'_>, start: usize) -> rusqlite::Result<Card> {
    let id: String = row.get(start)?;
    let tags = decode_tags(&id, row.get_ref(start + 4)?);
    Ok(Card {
        id,
        deck_id: row.get(start + 1)?,
        front: row.get(start + 2)?,
        back: row.get(start + 3)?,
        tags,
        created_at: from_millis(row.get(start + 5)?),
    })
}

fn state_from_row(row: &Row<'_>, start: usize) -> rusqlite::Result<ReviewState> {
    let last_reviewed_at: Option<i64> = row.get(start + 6)?;
    Ok(ReviewState {
        card_id: row.get(start)?,
        due_at: from_millis(row.get(start + 1)?),
        interval_days: row.get(start + 2)?,
        ease_factor: row.get(start + 3)?,
        repetitions: row.get(start + 4)?,
        lapses: row.get(start + 5)?,
        last_reviewed_at: last_reviewed_at.map(from_millis),
    })
}

// Corrupt or missing tag JSON degrades to no tags rather than failing the read
fn decode_tags(card_id: &str, raw: ValueRef<'_>) -> Vec<String> {
    let text = match raw {
        ValueRef::Null => return Vec::new(),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes).ok(),
        _ => None,
    };

    let parsed = text.and_then(|text| serde_json::from_str::<serde_json::Value>(text).ok());
    match parsed {
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => {
            tracing::warn!(card_id, "unreadable tags_json, treating as empty");
            Vec::new()
        }
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}
