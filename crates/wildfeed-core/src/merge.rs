// Merge per-source pages into the session feed
use std::collections::HashSet;

use tracing::debug;

use crate::fetcher::SourcePage;
use crate::models::{ObservationRecord, Source};

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub items: Vec<ObservationRecord>,
    /// Sum of reported totals; may overcount across sources
    pub total: u64,
    pub has_more: bool,
    /// Net-new records this merge contributed
    pub added: usize,
}

/// Combine one page of per-source results with what the session already has
///
/// Page 1 replaces everything. Later pages append only records whose
/// `(source, id)` isn't already in the feed, so merging the same page twice
/// leaves the items untouched. A continuation page that adds nothing means
/// the upstream is out of data whatever its totals claim.
pub fn merge(
    session_items: &[ObservationRecord],
    page: u32,
    mut incoming: Vec<SourcePage>,
) -> MergeOutcome {
    incoming.sort_by_key(|p| p.source);

    let total: u64 = incoming.iter().map(|p| p.reported_total).sum();

    let mut items: Vec<ObservationRecord> = if page <= 1 {
        Vec::new()
    } else {
        session_items.to_vec()
    };

    let before = items.len();
    let mut seen: HashSet<(Source, String)> = items
        .iter()
        .map(|r| (r.source, r.id.clone()))
        .collect();

    for record in incoming.into_iter().flat_map(|p| p.records) {
        if seen.insert((record.source, record.id.clone())) {
            items.push(record);
        }
    }

    let added = items.len() - before;
    let exhausted = page > 1 && added == 0;
    if exhausted {
        debug!("Page {} added nothing new; treating feed as exhausted", page);
    }

    let has_more = !exhausted && (items.len() as u64) < total;

    MergeOutcome {
        items,
        total,
        has_more,
        added,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OriginCounts, QualityFlags};

    fn record(source: Source, id: &str) -> ObservationRecord {
        ObservationRecord {
            id: id.to_string(),
            source,
            title: format!("{} {}", source, id),
            description: String::new(),
            media: Vec::new(),
            location: None,
            observation_date: None,
            created_at: None,
            quality: QualityFlags::default(),
            counts: OriginCounts::default(),
        }
    }

    fn page_of(source: Source, ids: impl IntoIterator<Item = usize>, total: u64) -> SourcePage {
        SourcePage {
            source,
            records: ids
                .into_iter()
                .map(|i| record(source, &i.to_string()))
                .collect(),
            reported_total: total,
        }
    }

    #[test]
    fn test_first_page_replaces_in_source_order() {
        let stale = vec![record(Source::Bird, "old")];
        let outcome = merge(
            &stale,
            1,
            vec![
                page_of(Source::General, 0..5, 5),
                page_of(Source::Bird, 0..12, 12),
            ],
        );

        assert_eq!(outcome.items.len(), 17);
        assert_eq!(outcome.total, 17);
        assert!(!outcome.has_more);
        assert_eq!(outcome.items[0].source, Source::Bird);
        assert_eq!(outcome.items[16].source, Source::General);
        assert!(outcome.items.iter().all(|r| r.id != "old"));
    }

    #[test]
    fn test_same_id_in_different_sources_is_not_a_duplicate() {
        let outcome = merge(
            &[],
            1,
            vec![page_of(Source::Bird, 0..3, 3), page_of(Source::Butterfly, 0..3, 3)],
        );
        assert_eq!(outcome.items.len(), 6);
    }

    #[test]
    fn test_continuation_skips_known_ids() {
        let first = merge(&[], 1, vec![page_of(Source::Bird, 0..30, 90)]);
        assert!(first.has_more);

        // 3 of these 30 are already on screen
        let second = merge(&first.items, 2, vec![page_of(Source::Bird, 27..57, 90)]);
        assert_eq!(second.added, 27);
        assert_eq!(second.items.len(), 57);
        assert!(second.has_more);
    }

    #[test]
    fn test_continuation_with_only_repeats_stops_paging() {
        let first = merge(&[], 1, vec![page_of(Source::Bird, 0..30, 300)]);
        let again = merge(&first.items, 2, vec![page_of(Source::Bird, 0..30, 300)]);

        assert_eq!(again.added, 0);
        assert_eq!(again.items, first.items);
        assert!(!again.has_more);
    }

    #[test]
    fn test_merging_same_page_twice_is_idempotent() {
        let first = merge(&[], 1, vec![page_of(Source::Bird, 0..30, 90)]);
        let p2 = vec![page_of(Source::Bird, 30..60, 90)];

        let once = merge(&first.items, 2, p2.clone());
        let twice = merge(&once.items, 2, p2);

        assert_eq!(once.items, twice.items);
        assert_eq!(once.total, twice.total);
    }

    #[test]
    fn test_duplicates_inside_one_page_are_dropped() {
        let mut page = page_of(Source::General, 0..3, 4);
        page.records.push(record(Source::General, "1"));
        let outcome = merge(&[], 1, vec![page]);
        assert_eq!(outcome.items.len(), 3);
        assert!(outcome.has_more);
    }

    #[test]
    fn test_total_is_not_deduplicated_across_sources() {
        let outcome = merge(
            &[],
            1,
            vec![page_of(Source::Bird, 0..2, 40), page_of(Source::General, 0..2, 60)],
        );
        assert_eq!(outcome.total, 100);
    }
}
