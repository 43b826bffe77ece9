use rand::seq::SliceRandom;
use rand::Rng;

use crate::store::{AssetOrdering, Recording};

/// Put `recs` in play order, first to play at index 0.
///
/// Sorted orderings are stable, so ties keep catalog order.
pub fn order_recordings<R: Rng + ?Sized>(
    recs: &mut [&Recording],
    ordering: AssetOrdering,
    rng: &mut R,
) {
    match ordering {
        AssetOrdering::Random => recs.shuffle(rng),
        AssetOrdering::ByLike => recs.sort_by(|a, b| b.likes.cmp(&a.likes)),
        AssetOrdering::ByWeight => recs.sort_by(|a, b| b.weight.total_cmp(&a.weight)),
    }
}

/// Index at which `rec` joins an already ordered queue.
pub fn insertion_index(queue: &[&Recording], rec: &Recording, ordering: AssetOrdering) -> usize {
    match ordering {
        AssetOrdering::Random => queue.len(),
        AssetOrdering::ByLike => queue
            .iter()
            .position(|r| r.likes < rec.likes)
            .unwrap_or(queue.len()),
        AssetOrdering::ByWeight => queue
            .iter()
            .position(|r| r.weight < rec.weight)
            .unwrap_or(queue.len()),
    }
}
