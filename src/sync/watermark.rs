//! UID watermark tracking

/// UID SEARCH criteria for everything above the watermark
pub fn search_query(watermark: u32) -> String {
    if watermark == 0 {
        "ALL".to_string()
    } else {
        format!("UID {}:*", watermark.saturating_add(1))
    }
}

/// New UIDs for this invocation: strictly above `watermark`, ascending,
/// deduplicated, limited to the `cap` highest.
///
/// `UID n:*` always matches the last message even when its UID is below
/// `n`, so the filter is applied here rather than trusted to the server.
pub fn select_new_uids(mut uids: Vec<u32>, watermark: u32, cap: usize) -> Vec<u32> {
    uids.retain(|uid| *uid > watermark);
    uids.sort_unstable();
    uids.dedup();

    if uids.len() > cap {
        let deferred = uids.len() - cap;
        log::info!(
            "{} new UIDs above {}, deferring the {} oldest to a later sync",
            uids.len(),
            watermark,
            deferred
        );
        uids.drain(..deferred);
    }
    uids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_query() {
        assert_eq!(search_query(0), "ALL");
        assert_eq!(search_query(100), "UID 101:*");
    }

    #[test]
    fn test_cap_keeps_highest_uids() {
        let uids: Vec<u32> = (1..=1000).rev().collect();
        let selected = select_new_uids(uids, 0, 50);
        assert_eq!(selected.len(), 50);
        assert_eq!(selected.first(), Some(&951));
        assert_eq!(selected.last(), Some(&1000));
        assert!(selected.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_filters_star_match_and_duplicates() {
        // Server answers `UID 101:*` with the last message (UID 100)
        assert!(select_new_uids(vec![100], 100, 50).is_empty());
        assert_eq!(select_new_uids(vec![105, 103, 103, 101], 100, 50), vec![101, 103, 105]);
    }
}
