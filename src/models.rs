use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

pub type DeckId = String;
pub type CardId = String;

pub const DEFAULT_EASE_FACTOR: f64 = 2.5;
pub const MIN_EASE_FACTOR: f64 = 1.3;

// A deck is a node in the deck forest; subdecks point at their parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deck {
    pub id: DeckId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_deck_id: Option<DeckId>,
}

impl Deck {
    pub fn new(name: &str, parent_deck_id: Option<&str>, now: DateTime<Utc>) -> Self {
        Self {
            id: generate_id("deck", now),
            name: name.to_string(),
            created_at: now,
            parent_deck_id: parent_deck_id.map(str::to_string),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_deck_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub deck_id: DeckId,
    pub front: String,
    pub back: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Card {
    pub fn new(deck_id: &str, front: &str, back: &str, tags: &[String], now: DateTime<Utc>) -> Self {
        Self {
            id: generate_id("card", now),
            deck_id: deck_id.to_string(),
            front: front.to_string(),
            back: back.to_string(),
            tags: tags.to_vec(),
            created_at: now,
        }
    }
}

/// Spaced repetition state for a single card.
///
/// Counters are signed so that out-of-range values read back from storage
/// can be represented and normalized by the scheduler instead of failing the
/// read. Missing fields deserialize to the same defaults a fresh card gets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewState {
    pub card_id: CardId,
    pub due_at: DateTime<Utc>,
    #[serde(default)]
    pub interval_days: i64,
    #[serde(default = "default_ease_factor")]
    pub ease_factor: f64,
    #[serde(default)]
    pub repetitions: i64,
    #[serde(default)]
    pub lapses: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reviewed_at: Option<DateTime<Utc>>,
}

fn default_ease_factor() -> f64 {
    DEFAULT_EASE_FACTOR
}

impl ReviewState {
    /// Initial state for a newly created card: due immediately.
    pub fn new(card_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            card_id: card_id.to_string(),
            due_at: now,
            interval_days: 0,
            ease_factor: DEFAULT_EASE_FACTOR,
            repetitions: 0,
            lapses: 0,
            last_reviewed_at: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at <= now
    }
}

// Four-button rating, ordinal only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Again,
    Hard,
    Good,
    Easy,
}

impl Rating {
    pub const ALL: [Rating; 4] = [Rating::Again, Rating::Hard, Rating::Good, Rating::Easy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Again => "again",
            Rating::Hard => "hard",
            Rating::Good => "good",
            Rating::Easy => "easy",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "again" | "a" | "1" => Some(Rating::Again),
            "hard" | "h" | "2" => Some(Rating::Hard),
            "good" | "g" | "3" => Some(Rating::Good),
            "easy" | "e" | "4" => Some(Rating::Easy),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Rating::Again => "Again",
            Rating::Hard => "Hard",
            Rating::Good => "Good",
            Rating::Easy => "Easy",
        }
    }

    pub fn is_lapse(&self) -> bool {
        matches!(self, Rating::Again)
    }
}

impl ToSql for Rating {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Rating {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Rating::from_str(s).ok_or_else(|| FromSqlError::Other(format!("unknown rating '{s}'").into()))
    }
}

// One row of the append-only review audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewLogEntry {
    pub id: String,
    pub card_id: CardId,
    pub deck_id: DeckId,
    pub rating: Rating,
    pub reviewed_at: DateTime<Utc>,
}

/// A due card joined with its review state, as handed to a review session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DueCard {
    pub card: Card,
    pub state: ReviewState,
}

impl DueCard {
    pub fn id(&self) -> &str {
        &self.card.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCount {
    /// Local calendar day, `YYYY-MM-DD`
    pub day: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stats {
    pub total_cards: i64,
    pub due_cards: i64,
    pub learned_today: i64,
    pub streak_days: i64,
    pub last_7_days: Vec<DayCount>,
}

/// Generate an id of the form `<prefix>_<base36 millis>_<8 random chars>`.
pub fn generate_id(prefix: &str, now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{}_{}_{}", prefix, to_base36(now.timestamp_millis().max(0) as u64), suffix)
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    mod rating_tests {
        use super::*;

        #[test]
        fn rating_as_str() {
            assert_eq!(Rating::Again.as_str(), "again");
            assert_eq!(Rating::Hard.as_str(), "hard");
            assert_eq!(Rating::Good.as_str(), "good");
            assert_eq!(Rating::Easy.as_str(), "easy");
        }

        #[test]
        fn rating_from_str_words_and_shortcuts() {
            assert_eq!(Rating::from_str("again"), Some(Rating::Again));
            assert_eq!(Rating::from_str("HARD"), Some(Rating::Hard));
            assert_eq!(Rating::from_str("g"), Some(Rating::Good));
            assert_eq!(Rating::from_str("4"), Some(Rating::Easy));
            assert_eq!(Rating::from_str("meh"), None);
        }

        #[test]
        fn rating_roundtrips_through_as_str() {
            for rating in Rating::ALL {
                assert_eq!(Rating::from_str(rating.as_str()), Some(rating));
            }
        }

        #[test]
        fn only_again_is_a_lapse() {
            assert!(Rating::Again.is_lapse());
            assert!(!Rating::Hard.is_lapse());
            assert!(!Rating::Good.is_lapse());
            assert!(!Rating::Easy.is_lapse());
        }

        #[test]
        fn rating_serializes_lowercase() {
            let json = serde_json::to_string(&Rating::Easy).unwrap();
            assert_eq!(json, "\"easy\"");
        }
    }

    mod review_state_tests {
        use super::*;

        #[test]
        fn new_state_has_defaults() {
            let state = ReviewState::new("card_1", t0());
            assert_eq!(state.card_id, "card_1");
            assert_eq!(state.due_at, t0());
            assert_eq!(state.interval_days, 0);
            assert_eq!(state.ease_factor, 2.5);
            assert_eq!(state.repetitions, 0);
            assert_eq!(state.lapses, 0);
            assert!(state.last_reviewed_at.is_none());
        }

        #[test]
        fn new_state_is_due_immediately() {
            let state = ReviewState::new("card_1", t0());
            assert!(state.is_due(t0()));
            assert!(!state.is_due(t0() - chrono::Duration::seconds(1)));
        }

        #[test]
        fn missing_fields_deserialize_to_defaults() {
            let json = r#"{"card_id":"c","due_at":"2024-03-10T12:00:00Z"}"#;
            let state: ReviewState = serde_json::from_str(json).unwrap();
            assert_eq!(state.ease_factor, 2.5);
            assert_eq!(state.interval_days, 0);
            assert_eq!(state.repetitions, 0);
            assert_eq!(state.lapses, 0);
        }
    }

    mod id_tests {
        use super::*;

        #[test]
        fn generated_ids_carry_prefix() {
            let id = generate_id("rev", t0());
            assert!(id.starts_with("rev_"));
            assert_eq!(id.split('_').count(), 3);
        }

        #[test]
        fn generated_ids_are_distinct() {
            let a = generate_id("card", t0());
            let b = generate_id("card", t0());
            assert_ne!(a, b);
        }

        #[test]
        fn base36_encoding() {
            assert_eq!(to_base36(0), "0");
            assert_eq!(to_base36(35), "z");
            assert_eq!(to_base36(36), "10");
        }
    }

    mod constructor_tests {
        use super::*;

        #[test]
        fn deck_new_sets_parent() {
            let root = Deck::new("Languages", None, t0());
            let child = Deck::new("Spanish", Some(&root.id), t0());
            assert!(root.is_root());
            assert_eq!(child.parent_deck_id.as_deref(), Some(root.id.as_str()));
        }

        #[test]
        fn card_new_copies_tags() {
            let tags = vec!["verbs".to_string(), "a1".to_string()];
            let card = Card::new("deck_1", "hablar", "to speak", &tags, t0());
            assert_eq!(card.deck_id, "deck_1");
            assert_eq!(card.tags, tags);
            assert!(card.id.starts_with("card_"));
        }
    }
}
