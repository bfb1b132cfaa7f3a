use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::record::{sort_newest_first, BackupRecord};

/// Per-store retention rule: at most `max_count` records, and optionally
/// nothing older than `max_age_days` (except the newest record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_count: usize,
    pub max_age_days: Option<u32>,
}

impl RetentionPolicy {
    pub fn new(max_count: usize, max_age_days: Option<u32>) -> Result<Self, ConfigError> {
        if max_count < 1 {
            return Err(ConfigError(format!(
                "max backups per file must be at least 1 (got {max_count})"
            )));
        }
        Ok(Self {
            max_count,
            max_age_days,
        })
    }

    pub fn count_only(max_count: usize) -> Result<Self, ConfigError> {
        Self::new(max_count, None)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPlan {
    /// Survivors, newest first.
    pub keep: Vec<BackupRecord>,
    /// Records to delete, newest first.
    pub drop: Vec<BackupRecord>,
}

/// Splits `records` into survivors and deletions.
///
/// Age is applied first: anything created before `now - max_age_days` is
/// dropped, except the newest record. The count bound is then applied to
/// what is left. The newest record is therefore never dropped, so automatic
/// cleanup can not empty a store.
pub fn apply(
    records: impl IntoIterator<Item = BackupRecord>,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> RetentionPlan {
    let mut sorted: Vec<BackupRecord> = records.into_iter().collect();
    sort_newest_first(&mut sorted);

    let cutoff = policy
        .max_age_days
        .map(|days| now - Duration::days(i64::from(days)));
    let max_count = policy.max_count.max(1);

    let mut plan = RetentionPlan::default();
    for (idx, record) in sorted.into_iter().enumerate() {
        let age_expired = idx > 0 && cutoff.is_some_and(|cutoff| record.created_at < cutoff);
        if age_expired || plan.keep.len() >= max_count {
            plan.drop.push(record);
        } else {
            plan.keep.push(record);
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::record::BackupKind;

    fn record_days_ago(now: DateTime<Utc>, days: i64, name: &str) -> BackupRecord {
        BackupRecord {
            id: name.to_owned(),
            source_path: PathBuf::from("/novel/ch1.md"),
            artifact_path: PathBuf::from("/novel/.backups").join(name),
            created_at: now - Duration::days(days),
            size_bytes: 10,
            kind: BackupKind::Automatic,
            content_hash: None,
        }
    }

    fn ids(records: &[BackupRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn count_bound_keeps_newest_n() {
        let now = Utc::now();
        let records = (0..6).map(|d| record_days_ago(now, d, &format!("r{d}")));
        let plan = apply(records, &RetentionPolicy::count_only(3).unwrap(), now);
        assert_eq!(ids(&plan.keep), vec!["r0", "r1", "r2"]);
        assert_eq!(ids(&plan.drop), vec!["r3", "r4", "r5"]);
    }

    #[test]
    fn count_bound_holds_for_every_size() {
        let now = Utc::now();
        for max_count in 1..5 {
            for len in 0..8 {
                let records = (0..len).map(|d| record_days_ago(now, d, &format!("r{d}")));
                let plan = apply(records, &RetentionPolicy::count_only(max_count).unwrap(), now);
                assert!(plan.keep.len() <= max_count);
                assert_eq!(plan.keep.len() + plan.drop.len(), len as usize);
            }
        }
    }

    #[test]
    fn age_is_applied_before_count() {
        let now = Utc::now();
        let records = vec![
            record_days_ago(now, 1, "fresh"),
            record_days_ago(now, 5, "recent"),
            record_days_ago(now, 40, "old"),
            record_days_ago(now, 50, "older"),
        ];
        let policy = RetentionPolicy::new(10, Some(30)).unwrap();
        let plan = apply(records, &policy, now);
        assert_eq!(ids(&plan.keep), vec!["fresh", "recent"]);
        assert_eq!(ids(&plan.drop), vec!["old", "older"]);
    }

    #[test]
    fn newest_survives_when_everything_is_too_old() {
        let now = Utc::now();
        let records = vec![
            record_days_ago(now, 90, "a"),
            record_days_ago(now, 100, "b"),
            record_days_ago(now, 200, "c"),
        ];
        let plan = apply(records, &RetentionPolicy::new(10, Some(30)).unwrap(), now);
        assert_eq!(ids(&plan.keep), vec!["a"]);
        assert_eq!(ids(&plan.drop), vec!["b", "c"]);
    }

    #[test]
    fn newest_survives_zero_day_age_limit() {
        let now = Utc::now();
        for len in 1..6 {
            let records: Vec<_> = (1..=len).map(|d| record_days_ago(now, d, &format!("r{d}"))).collect();
            let plan = apply(records, &RetentionPolicy::new(1, Some(0)).unwrap(), now);
            assert_eq!(ids(&plan.keep), vec!["r1"]);
            assert!(plan.drop.iter().all(|r| r.id != "r1"));
        }
    }

    #[test]
    fn input_order_does_not_matter() {
        let now = Utc::now();
        let records = vec![
            record_days_ago(now, 3, "mid"),
            record_days_ago(now, 9, "oldest"),
            record_days_ago(now, 0, "newest"),
        ];
        let plan = apply(records, &RetentionPolicy::count_only(2).unwrap(), now);
        assert_eq!(ids(&plan.keep), vec!["newest", "mid"]);
        assert_eq!(ids(&plan.drop), vec!["oldest"]);
    }

    #[test]
    fn empty_input_yields_empty_plan() {
        let plan = apply(Vec::new(), &RetentionPolicy::new(3, Some(1)).unwrap(), Utc::now());
        assert_eq!(plan, RetentionPlan::default());
    }

    #[test]
    fn zero_max_count_is_rejected() {
        assert!(RetentionPolicy::count_only(0).is_err());
    }
}
