use serde::Deserialize;
use std::fmt;

///
/// DbConfig
///
/// Engine-level knobs. Deserializable so deployments can load it from
/// whatever configuration source the host application uses.
///

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DbConfig {
    /// Max ids fetched together when filling the cache.
    pub prefetch_batch_size: usize,

    /// Default bucket for date/datetime group-by without a suffix.
    pub read_group_default_granularity: Granularity,

    /// If false, stored computed fields may remain stale until the next
    /// read that hits them.
    pub recompute_on_commit: bool,

    /// Missing translation falls back to the source language.
    pub translation_fallback: bool,

    /// Row-lock acquisition policy.
    pub lock_wait_policy: LockWaitPolicy,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            prefetch_batch_size: 200,
            read_group_default_granularity: Granularity::Month,
            recompute_on_commit: true,
            translation_fallback: true,
            lock_wait_policy: LockWaitPolicy::Nowait,
        }
    }
}

///
/// Granularity
///
/// Date/datetime group-by bucket size. Parsed from the `:suffix` of a
/// group-by spec, e.g. `date_order:month`.
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Granularity {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            "quarter" => Some(Self::Quarter),
            "year" => Some(Self::Year),
            _ => None,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
            Self::Year => "year",
        };
        write!(f, "{label}")
    }
}

///
/// LockWaitPolicy
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LockWaitPolicy {
    /// `SELECT ... FOR UPDATE NOWAIT`: raise a retryable conflict when the
    /// lock is not immediately grantable.
    #[default]
    Nowait,
    /// Block until the lock is granted. The in-memory store has no
    /// scheduler to suspend on, so it degrades to `Nowait` there.
    Wait,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = DbConfig::default();
        assert_eq!(cfg.prefetch_batch_size, 200);
        assert_eq!(cfg.read_group_default_granularity, Granularity::Month);
        assert!(cfg.recompute_on_commit);
        assert!(cfg.translation_fallback);
        assert_eq!(cfg.lock_wait_policy, LockWaitPolicy::Nowait);
    }

    #[test]
    fn config_deserializes_partial_overrides() {
        let cfg: DbConfig = serde_json::from_str(
            r#"{"prefetch_batch_size": 50, "read_group_default_granularity": "week"}"#,
        )
        .expect("partial config should deserialize");
        assert_eq!(cfg.prefetch_batch_size, 50);
        assert_eq!(cfg.read_group_default_granularity, Granularity::Week);
        assert_eq!(cfg.lock_wait_policy, LockWaitPolicy::Nowait);
    }

    #[test]
    fn granularity_parses_known_suffixes_only() {
        assert_eq!(Granularity::parse("quarter"), Some(Granularity::Quarter));
        assert_eq!(Granularity::parse("fortnight"), None);
    }
}
