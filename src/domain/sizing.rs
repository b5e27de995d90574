//! Target-size calculation
//!
//! Pure arithmetic: maps (current size, policy) to the size a resize should
//! request. All byte math is floor-division on non-negative integers with a
//! 128-bit intermediate product, so the growth of a near-max `u64` volume
//! cannot overflow.

use crate::domain::policy::ScalingPolicy;

/// Compute the resize target for a volume.
///
/// The percentage growth is clamped between the policy's minimum and maximum
/// increments and the result is capped at the absolute ceiling. A return
/// value at or below `current_bytes` means the volume is already at (or
/// beyond) its ceiling and must not be patched.
pub fn target_bytes(current_bytes: u64, policy: &ScalingPolicy) -> u64 {
    let grown = (current_bytes as u128) * (100 + policy.scale_up_percent as u128) / 100;
    let raw_delta = (grown.min(u64::MAX as u128) as u64).saturating_sub(current_bytes);

    let delta = raw_delta
        .max(policy.scale_up_min_increment)
        .min(policy.scale_up_max_increment);

    let candidate = current_bytes.saturating_add(delta);
    candidate.min(policy.scale_up_max_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(
        up_pct: u32,
        min_increment: u64,
        max_increment: u64,
        max_size: u64,
    ) -> ScalingPolicy {
        ScalingPolicy {
            scale_above_percent: 80,
            scale_after_intervals: 5,
            scale_up_percent: up_pct,
            scale_up_min_increment: min_increment,
            scale_up_max_increment: max_increment,
            scale_up_max_size: max_size,
            scale_cooldown_seconds: 22_200,
            ignore: false,
        }
    }

    #[test]
    fn test_percent_growth() {
        // 10G at 20% grows to 12G
        let p = policy(20, 1_000_000_000, 100_000_000_000, 10_000_000_000_000);
        assert_eq!(target_bytes(10_000_000_000, &p), 12_000_000_000);
    }

    #[test]
    fn test_min_increment_floor() {
        // 1G at 5% is only 50M of raw growth; the floor lifts it to a full 1G
        let p = policy(5, 1_000_000_000, 100_000_000_000, 10_000_000_000_000);
        assert_eq!(target_bytes(1_000_000_000, &p), 2_000_000_000);
    }

    #[test]
    fn test_max_increment_cap() {
        // 10T at 50% would add 5T; the cap holds the step to 1T
        let p = policy(50, 1_000_000_000, 1_000_000_000_000, u64::MAX);
        assert_eq!(
            target_bytes(10_000_000_000_000, &p),
            11_000_000_000_000
        );
    }

    #[test]
    fn test_ceiling_cap() {
        let p = policy(20, 1_000_000_000, 100_000_000_000_000, 16_000_000_000_000);
        assert_eq!(
            target_bytes(15_000_000_000_000, &p),
            16_000_000_000_000
        );
    }

    #[test]
    fn test_at_ceiling_returns_current() {
        let p = policy(20, 1_000_000_000, 16_000_000_000_000, 16_000_000_000_000);
        assert_eq!(
            target_bytes(16_000_000_000_000, &p),
            16_000_000_000_000
        );
    }

    #[test]
    fn test_beyond_ceiling_returns_less_than_current() {
        // Operator lowered max-size below the current request
        let p = policy(20, 1_000_000_000, 16_000_000_000_000, 5_000_000_000);
        let target = target_bytes(10_000_000_000, &p);
        assert!(target <= 10_000_000_000);
    }

    #[test]
    fn test_floor_division() {
        // 999 bytes at 10% is 99.9 raw growth; floor keeps it at 99
        let p = policy(10, 0, u64::MAX, u64::MAX);
        assert_eq!(target_bytes(999, &p), 999 + 99);
    }

    #[test]
    fn test_no_overflow_near_u64_max() {
        let p = policy(100, 1_000_000_000, u64::MAX, u64::MAX);
        // Must not panic; result saturates at the ceiling
        let target = target_bytes(u64::MAX / 2 + 7, &p);
        assert!(target >= u64::MAX / 2 + 7);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn policy_strategy() -> impl Strategy<Value = ScalingPolicy> {
            (
                0u32..=200,
                0u64..=10_000_000_000,
                0u64..=100_000_000_000_000,
                1u64..=100_000_000_000_000,
            )
                .prop_map(|(pct, min_inc, extra, max_size)| {
                    // max increment is generated at or above min increment
                    policy(pct, min_inc, min_inc.saturating_add(extra), max_size)
                })
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(256))]

            /// The target never exceeds the absolute ceiling.
            #[test]
            fn prop_never_above_max_size(
                current in 0u64..=50_000_000_000_000,
                p in policy_strategy(),
            ) {
                prop_assert!(target_bytes(current, &p) <= p.scale_up_max_size);
            }

            /// When a resize actually fires (target above current), the step
            /// respects both increment bounds unless the ceiling truncated it.
            #[test]
            fn prop_step_within_increment_bounds(
                current in 0u64..=50_000_000_000_000,
                p in policy_strategy(),
            ) {
                let target = target_bytes(current, &p);
                if target > current {
                    let step = target - current;
                    prop_assert!(step <= p.scale_up_max_increment);
                    let truncated_by_ceiling = target == p.scale_up_max_size;
                    if !truncated_by_ceiling {
                        prop_assert!(step >= p.scale_up_min_increment);
                    }
                }
            }

            /// Larger volumes never compute smaller targets under one policy.
            #[test]
            fn prop_monotone_in_current_size(
                a in 0u64..=50_000_000_000_000,
                b in 0u64..=50_000_000_000_000,
                p in policy_strategy(),
            ) {
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                prop_assert!(target_bytes(lo, &p) <= target_bytes(hi, &p));
            }

            /// Determinism: same inputs, same output.
            #[test]
            fn prop_deterministic(
                current in 0u64..=50_000_000_000_000,
                p in policy_strategy(),
            ) {
                prop_assert_eq!(target_bytes(current, &p), target_bytes(current, &p));
            }
        }
    }
}
