use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::listener::ListenerState;
use crate::store::{Recording, TagFilterKind};

const WITHIN_METERS: f64 = 10_000.0;
const RECENT_DAYS: i64 = 10;

/// Narrow the candidate pool by the filters attached to the active tags.
pub fn apply_tag_filters(
    recs: Vec<Recording>,
    filters: &[TagFilterKind],
    listener: &ListenerState,
    now: DateTime<Utc>,
) -> Vec<Recording> {
    filters.iter().fold(recs, |recs, filter| {
        let before = recs.len();
        let kept: Vec<Recording> = recs
            .into_iter()
            .filter(|r| keep(r, *filter, listener, now))
            .collect();
        debug!("Tag filter {:?} kept {} of {}", filter, kept.len(), before);
        kept
    })
}

fn keep(rec: &Recording, filter: TagFilterKind, listener: &ListenerState, now: DateTime<Utc>) -> bool {
    match filter {
        TagFilterKind::Within10km => match (listener.position(), rec.location()) {
            (Some(l), Some(r)) => l.distance_meters(&r) <= WITHIN_METERS,
            _ => true,
        },
        TagFilterKind::TenMostRecentDays => {
            rec.created.date_naive() >= (now - Duration::days(RECENT_DAYS)).date_naive()
        }
    }
}
