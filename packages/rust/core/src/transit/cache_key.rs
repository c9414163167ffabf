//! Transit output cache keys.
//!
//! `date` keys are a coarse monthly bucket: two builds in the same month
//! share names even if the feeds changed. `content` keys digest the feed
//! list and area name instead.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use headway_shared::CacheKeyMode;

const CONTENT_KEY_LEN: usize = 16;

/// Month bucket, e.g. `2024-05`.
pub fn date_bucket(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// Digest of a zone's feed-list bytes and the area name.
pub fn content_key(feed_list: &[u8], area: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(feed_list);
    hasher.update([0]);
    hasher.update(area.as_bytes());
    truncated_hex(hasher)
}

/// Key for one zone.
pub fn zone_key(mode: CacheKeyMode, feed_list: &[u8], area: &str, now: DateTime<Utc>) -> String {
    match mode {
        CacheKeyMode::Date => date_bucket(now),
        CacheKeyMode::Content => content_key(feed_list, area),
    }
}

/// Key for the area-wide aggregate. In content mode it covers every zone key,
/// independent of the order zones finished in.
pub fn aggregate_key(mode: CacheKeyMode, zone_keys: &[&str], now: DateTime<Utc>) -> String {
    match mode {
        CacheKeyMode::Date => date_bucket(now),
        CacheKeyMode::Content => {
            let mut sorted = zone_keys.to_vec();
            sorted.sort_unstable();
            let mut hasher = Sha256::new();
            for key in sorted {
                hasher.update(key.as_bytes());
                hasher.update([0]);
            }
            truncated_hex(hasher)
        }
    }
}

fn truncated_hex(hasher: Sha256) -> String {
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(CONTENT_KEY_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn may_day() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 0).unwrap()
    }

    #[test]
    fn date_bucket_is_monthly() {
        assert_eq!(date_bucket(may_day()), "2024-05");
        let later = Utc.with_ymd_and_hms(2024, 5, 31, 0, 0, 0).unwrap();
        assert_eq!(date_bucket(later), date_bucket(may_day()));
    }

    #[test]
    fn date_mode_ignores_feed_changes() {
        let a = zone_key(CacheKeyMode::Date, b"feeds v1", "Seattle", may_day());
        let b = zone_key(CacheKeyMode::Date, b"feeds v2", "Seattle", may_day());
        assert_eq!(a, b);
    }

    #[test]
    fn content_mode_tracks_feeds_and_area() {
        let a = zone_key(CacheKeyMode::Content, b"feeds v1", "Seattle", may_day());
        assert_eq!(a.len(), CONTENT_KEY_LEN);
        assert_ne!(a, zone_key(CacheKeyMode::Content, b"feeds v2", "Seattle", may_day()));
        assert_ne!(a, zone_key(CacheKeyMode::Content, b"feeds v1", "Portland", may_day()));
    }

    #[test]
    fn aggregate_is_order_independent() {
        let a = aggregate_key(CacheKeyMode::Content, &["b", "a"], may_day());
        let b = aggregate_key(CacheKeyMode::Content, &["a", "b"], may_day());
        assert_eq!(a, b);
        assert_ne!(a, aggregate_key(CacheKeyMode::Content, &["a"], may_day()));
        assert_eq!(aggregate_key(CacheKeyMode::Date, &["a"], may_day()), "2024-05");
    }
}
