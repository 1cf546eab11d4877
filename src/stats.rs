//! Study statistics derived from the review log.
//!
//! Day boundaries are local midnight in the supplied time zone, not UTC.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use crate::models::{CardId, DayCount, Stats};

pub const HISTORY_DAYS: i64 = 7;

/// Fold recent log entries into a `Stats` snapshot as of `now`.
///
/// `recent` only needs to cover the history window (see [`window_start`]);
/// older entries are ignored. `total_cards`, `due_cards` and `streak_days`
/// are passed through as the caller computed them.
pub fn aggregate<Tz: TimeZone>(
    total_cards: i64,
    due_cards: i64,
    recent: &[(CardId, DateTime<Utc>)],
    streak_days: i64,
    now: DateTime<Utc>,
    tz: &Tz,
) -> Stats {
    let today = local_day(now, tz);

    let mut per_day: HashMap<NaiveDate, i64> = HashMap::new();
    let mut cards_today: HashSet<&str> = HashSet::new();
    for (card_id, reviewed_at) in recent {
        let day = local_day(*reviewed_at, tz);
        *per_day.entry(day).or_insert(0) += 1;
        if day == today {
            cards_today.insert(card_id.as_str());
        }
    }

    let last_7_days = (0..HISTORY_DAYS)
        .rev()
        .map(|offset| {
            let day = today - Duration::days(offset);
            DayCount {
                day: day_key(day),
                count: per_day.get(&day).copied().unwrap_or(0),
            }
        })
        .collect();

    Stats {
        total_cards,
        due_cards,
        learned_today: cards_today.len() as i64,
        streak_days,
        last_7_days,
    }
}

/// First instant of the history window: local midnight, `HISTORY_DAYS - 1` days before today.
///
/// When that midnight does not exist locally (a DST gap), a full extra day
/// earlier is returned instead; entries before the window are ignored anyway.
pub fn window_start<Tz: TimeZone>(now: DateTime<Utc>, tz: &Tz) -> DateTime<Utc> {
    let first_day = local_day(now, tz) - Duration::days(HISTORY_DAYS - 1);
    first_day
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| tz.from_local_datetime(&midnight).earliest())
        .map(|start| start.with_timezone(&Utc))
        .unwrap_or_else(|| now - Duration::days(HISTORY_DAYS))
}

/// Consecutive local days with activity, ending today.
///
/// `newest_first` must be ordered by time descending. It is consumed only
/// until the first day without activity, so callers can stream it straight
/// from a cursor. An idle today means a streak of zero; entries after
/// today are skipped.
pub fn streak_from<Tz, E, I>(newest_first: I, now: DateTime<Utc>, tz: &Tz) -> Result<i64, E>
where
    Tz: TimeZone,
    I: IntoIterator<Item = Result<DateTime<Utc>, E>>,
{
    let mut expected = local_day(now, tz);
    let mut streak = 0;

    for reviewed_at in newest_first {
        let day = local_day(reviewed_at?, tz);
        if day > expected {
            continue;
        }
        if day < expected {
            break;
        }
        streak += 1;
        match expected.pred_opt() {
            Some(prev) => expected = prev,
            None => break,
        }
    }

    Ok(streak)
}

pub fn local_day<Tz: TimeZone>(at: DateTime<Utc>, tz: &Tz) -> NaiveDate {
    at.with_timezone(tz).date_naive()
}

pub fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}
