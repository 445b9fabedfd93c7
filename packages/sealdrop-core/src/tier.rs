//! # Fee Tiers
//!
//! Size-tiered fee resolution. A tier is a fee bracket keyed by an
//! inclusive byte-size range; the schedule is an ordered list of
//! non-overlapping brackets. Sizes beyond the largest bracket resolve
//! to nothing, and callers must reject the transfer rather than default
//! to the largest tier.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One fee bracket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tier {
    /// Stable identifier carried in handshake messages and burn events
    pub id: String,
    /// Human-readable label
    pub label: String,
    /// Inclusive lower bound in bytes
    pub min_bytes: u64,
    /// Inclusive upper bound in bytes
    pub max_bytes: u64,
    /// Fee in the stable unit of account (cents)
    pub fee_cents: u64,
}

impl Tier {
    /// Whether a byte size falls inside this bracket.
    pub fn contains(&self, bytes: u64) -> bool {
        bytes >= self.min_bytes && bytes <= self.max_bytes
    }
}

/// An ordered, validated list of fee brackets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSchedule {
    tiers: Vec<Tier>,
}

const MIB: u64 = 1024 * 1024;

impl TierSchedule {
    /// Build a schedule, validating that ranges are ordered,
    /// non-overlapping, and not inverted.
    pub fn new(tiers: Vec<Tier>) -> Result<Self> {
        if tiers.is_empty() {
            return Err(Error::InvalidTierSchedule("No tiers configured".into()));
        }
        for tier in &tiers {
            if tier.min_bytes > tier.max_bytes {
                return Err(Error::InvalidTierSchedule(format!(
                    "Tier '{}' has inverted range",
                    tier.id
                )));
            }
        }
        for pair in tiers.windows(2) {
            if pair[1].min_bytes <= pair[0].max_bytes {
                return Err(Error::InvalidTierSchedule(format!(
                    "Tiers '{}' and '{}' overlap or are out of order",
                    pair[0].id, pair[1].id
                )));
            }
        }
        Ok(Self { tiers })
    }

    /// Resolve the tier for a byte size.
    ///
    /// Linear scan, first match. Returns `None` when the size exceeds
    /// the largest bracket; callers reject the transfer in that case.
    pub fn resolve_by_size(&self, bytes: u64) -> Option<&Tier> {
        self.tiers.iter().find(|t| t.contains(bytes))
    }

    /// Look up a tier by id.
    pub fn by_id(&self, id: &str) -> Option<&Tier> {
        self.tiers.iter().find(|t| t.id == id)
    }

    /// The smallest bracket. Free transfers are only permitted here.
    pub fn smallest(&self) -> &Tier {
        // new() rejects empty schedules
        &self.tiers[0]
    }

    /// All brackets in order.
    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }
}

impl Default for TierSchedule {
    /// The stock schedule: micro up to 50 MB, standard to 500 MB,
    /// jumbo to 2 GB. Gateways may override via configuration.
    fn default() -> Self {
        Self::new(vec![
            Tier {
                id: "micro".to_string(),
                label: "Micro".to_string(),
                min_bytes: 0,
                max_bytes: 50 * MIB - 1,
                fee_cents: 50,
            },
            Tier {
                id: "standard".to_string(),
                label: "Standard".to_string(),
                min_bytes: 50 * MIB,
                max_bytes: 500 * MIB - 1,
                fee_cents: 200,
            },
            Tier {
                id: "jumbo".to_string(),
                label: "Jumbo".to_string(),
                min_bytes: 500 * MIB,
                max_bytes: 2048 * MIB,
                fee_cents: 500,
            },
        ])
        .expect("stock schedule is valid")
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_is_total_within_bounds() {
        let schedule = TierSchedule::default();
        let top = schedule.tiers().last().unwrap().max_bytes;

        // Every size up to the top bound resolves to exactly one tier.
        for bytes in [0, 1, 50 * MIB - 1, 50 * MIB, 500 * MIB - 1, 500 * MIB, top] {
            let matches: Vec<_> = schedule
                .tiers()
                .iter()
                .filter(|t| t.contains(bytes))
                .collect();
            assert_eq!(matches.len(), 1, "size {} matched {} tiers", bytes, matches.len());
            assert_eq!(
                schedule.resolve_by_size(bytes).unwrap().id,
                matches[0].id
            );
        }
    }

    #[test]
    fn test_oversize_fails_closed() {
        let schedule = TierSchedule::default();
        let top = schedule.tiers().last().unwrap().max_bytes;
        assert!(schedule.resolve_by_size(top + 1).is_none());
    }

    #[test]
    fn test_ten_megabytes_is_micro() {
        let schedule = TierSchedule::default();
        assert_eq!(schedule.resolve_by_size(10 * MIB).unwrap().id, "micro");
    }

    #[test]
    fn test_boundary_sizes() {
        let schedule = TierSchedule::default();
        assert_eq!(schedule.resolve_by_size(50 * MIB - 1).unwrap().id, "micro");
        assert_eq!(schedule.resolve_by_size(50 * MIB).unwrap().id, "standard");
    }

    #[test]
    fn test_by_id() {
        let schedule = TierSchedule::default();
        assert_eq!(schedule.by_id("standard").unwrap().label, "Standard");
        assert!(schedule.by_id("mega").is_none());
    }

    #[test]
    fn test_smallest_is_first() {
        assert_eq!(TierSchedule::default().smallest().id, "micro");
    }

    #[test]
    fn test_overlapping_ranges_rejected() {
        let result = TierSchedule::new(vec![
            Tier {
                id: "a".into(),
                label: "A".into(),
                min_bytes: 0,
                max_bytes: 100,
                fee_cents: 1,
            },
            Tier {
                id: "b".into(),
                label: "B".into(),
                min_bytes: 100,
                max_bytes: 200,
                fee_cents: 2,
            },
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_inverted_range_rejected() {
        let result = TierSchedule::new(vec![Tier {
            id: "a".into(),
            label: "A".into(),
            min_bytes: 10,
            max_bytes: 5,
            fee_cents: 1,
        }]);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_schedule_rejected() {
        assert!(TierSchedule::new(vec![]).is_err());
    }
}
