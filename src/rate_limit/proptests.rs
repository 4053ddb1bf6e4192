//! Property-Based Tests for the Sliding Window Limiter
//!
//! # Test Strategies
//!
//! - **Window bound**: for any arrival pattern, no interval of `window`
//!   length ever contains more than `max_requests` admissions
//! - **Reference model**: decisions match a naive recount over every
//!   admitted instant
//! - **Key isolation**: traffic on one key never changes another key's verdicts
//!
//! # Running the Tests
//!
//! ```bash
//! cargo test --lib rate_limit::proptests
//! ```

use proptest::prelude::*;
use std::time::{Duration, Instant};

use super::sliding_window::{CallerKey, SlidingWindowLimiter};

// Helper: arrival offsets in milliseconds, non-decreasing, with bursts of
// identical instants and gaps that straddle the window edge.
fn arb_arrivals(window_ms: u64) -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(
        prop_oneof![
            3 => Just(0u64),
            3 => 0u64..50,
            2 => Just(window_ms),
            1 => (window_ms - 1)..(window_ms + 2),
            1 => 0u64..(window_ms * 3),
        ],
        1..200,
    )
    .prop_map(|gaps| {
        let mut at = 0u64;
        gaps.into_iter()
            .map(|gap| {
                at += gap;
                at
            })
            .collect()
    })
}

proptest! {
    /// No half-open window of length `window` holds more than `max` admissions
    #[test]
    fn prop_window_never_exceeds_limit(
        max in 1u32..12,
        arrivals in arb_arrivals(1000),
    ) {
        let window = Duration::from_millis(1000);
        let limiter = SlidingWindowLimiter::new(max, window);
        let key = CallerKey::from("prop");
        let start = Instant::now();

        let admitted: Vec<u64> = arrivals
            .iter()
            .copied()
            .filter(|ms| limiter.admit(&key, start + Duration::from_millis(*ms)))
            .collect();

        for &end in &admitted {
            let in_window = admitted
                .iter()
                .filter(|&&t| t <= end && end - t < 1000)
                .count();
            prop_assert!(in_window <= max as usize, "{} admissions ending at {}ms", in_window, end);
        }
    }

    /// Decisions agree with a recount over all previously admitted instants
    #[test]
    fn prop_matches_reference_model(
        max in 1u32..8,
        window_ms in 1u64..500,
        arrivals in arb_arrivals(250),
    ) {
        let limiter = SlidingWindowLimiter::new(max, Duration::from_millis(window_ms));
        let key = CallerKey::from("model");
        let start = Instant::now();
        let mut model: Vec<u64> = Vec::new();

        for ms in arrivals {
            let live = model.iter().filter(|&&t| ms - t < window_ms).count();
            let expected = live < max as usize;
            let actual = limiter.admit(&key, start + Duration::from_millis(ms));
            prop_assert_eq!(expected, actual, "mismatch at {}ms", ms);
            if actual {
                model.push(ms);
            }
        }
    }

    /// Saturating one key leaves a fresh key's first request admitted
    #[test]
    fn prop_keys_are_isolated(
        max in 1u32..10,
        burst in 1usize..50,
    ) {
        let limiter = SlidingWindowLimiter::new(max, Duration::from_secs(60));
        let now = Instant::now();
        let noisy = CallerKey::from("noisy");

        for _ in 0..burst {
            limiter.admit(&noisy, now);
        }

        prop_assert!(limiter.admit(&CallerKey::from("quiet"), now));
        prop_assert!(limiter.recorded(&noisy) <= max as usize);
    }
}
