//! Four-button spaced repetition scheduler.
//!
//! A pragmatic SM-2 style variant:
//! - again: lapse, short relearn step measured in minutes
//! - hard: small interval growth, lower ease
//! - good: normal growth, ease nudged down slightly
//! - easy: large growth, higher ease
//!
//! Everything here is pure. `now` is always passed in, so previews for all
//! four ratings can be computed before the user picks one.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Rating, ReviewState, DEFAULT_EASE_FACTOR, MIN_EASE_FACTOR};

/// Delay before a lapsed card comes back.
pub const RELEARN_STEP_MINUTES: i64 = 10;

/// Interval ceiling; keeps `due_at` representable after long easy streaks.
pub const MAX_INTERVAL_DAYS: i64 = 36_500;

/// Compute the review state that follows `state` after `rating` at `now`.
///
/// Out-of-range input is normalized rather than rejected, so this never
/// fails. `card_id` is carried over and `last_reviewed_at` is set to `now`.
pub fn schedule_next(state: &ReviewState, rating: Rating, now: DateTime<Utc>) -> ReviewState {
    let ease_factor = normalize_ease(state.ease_factor);
    let interval_days = state.interval_days.max(0);
    let repetitions = state.repetitions.max(0);
    let lapses = state.lapses.max(0);

    let ease_factor = match rating {
        Rating::Again => return relearn(state, ease_factor, lapses, now),
        Rating::Hard => (ease_factor - 0.15).max(MIN_EASE_FACTOR),
        Rating::Good => (ease_factor - 0.02).max(MIN_EASE_FACTOR),
        Rating::Easy => ease_factor + 0.1,
    };

    let repetitions = repetitions.saturating_add(1);

    let interval_days = match repetitions {
        1 => learning_step(rating, 1, 1, 2),
        2 => learning_step(rating, 2, 3, 5),
        _ => {
            let grown = interval_days as f64 * ease_factor * review_multiplier(rating);
            (grown.round() as i64).clamp(1, MAX_INTERVAL_DAYS)
        }
    };

    ReviewState {
        card_id: state.card_id.clone(),
        due_at: now + Duration::days(interval_days),
        interval_days,
        ease_factor,
        repetitions,
        lapses,
        last_reviewed_at: Some(now),
    }
}

// A lapse drops the card back to a short relearn step measured in minutes.
fn relearn(state: &ReviewState, ease_factor: f64, lapses: i64, now: DateTime<Utc>) -> ReviewState {
    ReviewState {
        card_id: state.card_id.clone(),
        due_at: now + Duration::minutes(RELEARN_STEP_MINUTES),
        interval_days: 0,
        ease_factor: (ease_factor - 0.2).max(MIN_EASE_FACTOR),
        repetitions: 0,
        lapses: lapses.saturating_add(1),
        last_reviewed_at: Some(now),
    }
}

fn normalize_ease(ease_factor: f64) -> f64 {
    if ease_factor.is_finite() && ease_factor >= MIN_EASE_FACTOR {
        ease_factor
    } else {
        DEFAULT_EASE_FACTOR
    }
}

fn learning_step(rating: Rating, hard: i64, good: i64, easy: i64) -> i64 {
    match rating {
        Rating::Hard => hard,
        Rating::Easy => easy,
        _ => good,
    }
}

fn review_multiplier(rating: Rating) -> f64 {
    match rating {
        Rating::Hard => 1.15,
        Rating::Easy => 1.7,
        _ => 1.4,
    }
}

/// What a rating would do, shown on the rating buttons before a choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preview {
    pub rating: Rating,
    pub due_at: DateTime<Utc>,
    pub label: String,
}

pub fn preview_next(state: &ReviewState, rating: Rating, now: DateTime<Utc>) -> Preview {
    let next = schedule_next(state, rating, now);
    Preview {
        rating,
        due_at: next.due_at,
        label: format_due_label(next.due_at, now),
    }
}

/// Previews in button order: again, hard, good, easy.
pub fn preview_all(state: &ReviewState, now: DateTime<Utc>) -> [Preview; 4] {
    Rating::ALL.map(|rating| preview_next(state, rating, now))
}

/// Render the time from `now` until `due_at` as a coarse label.
///
/// Each tier rounds half-up from the tier below it: minutes from the raw
/// difference, hours from rounded minutes, days from rounded hours. Past
/// due dates read as `<1m`.
pub fn format_due_label(due_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff_ms = (due_at - now).num_milliseconds().max(0);
    if diff_ms < 60_000 {
        return "<1m".to_string();
    }

    let minutes = (diff_ms + 30_000) / 60_000;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = (minutes + 30) / 60;
    if hours < 24 {
        return format!("{}h", hours);
    }

    let days = (hours + 12) / 24;
    format!("{}d", days)
}
