//! Least-loaded server selection.

use nodemesh_types::NodeRecord;
use std::cmp::Ordering;

/// Lower client count first, then name, so a fixed snapshot always yields the same pick.
fn load_order(a: &NodeRecord, b: &NodeRecord) -> Ordering {
    a.client_count.cmp(&b.client_count).then_with(|| a.name.cmp(&b.name))
}

/// Eligible record with the fewest clients, independent of iteration order.
pub fn least_loaded<'a, I>(records: I) -> Option<&'a NodeRecord>
where
    I: IntoIterator<Item = &'a NodeRecord>,
{
    records.into_iter().filter(|record| record.is_eligible()).min_by(|a, b| load_order(a, b))
}
