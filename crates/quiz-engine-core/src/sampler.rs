//! Weighted selection without replacement.

use rand::Rng;

use crate::EngineError;

/// Draw up to `k` candidates, each draw proportional to the remaining weights.
///
/// A drawn candidate leaves the pool together with its weight. When every
/// remaining weight is zero the draw falls back to a uniform choice, so the
/// result is short of `k` only when the pool runs out.
///
/// # Errors
/// Returns [`EngineError::Unexpected`] when `weights` does not pair up with
/// `candidates`, or holds a negative or non-finite value.
pub fn sample_without_replacement<T, R>(
    candidates: &[T],
    weights: &[f64],
    k: usize,
    rng: &mut R,
) -> Result<Vec<T>, EngineError>
where
    T: Clone,
    R: Rng + ?Sized,
{
    if candidates.len() != weights.len() {
        return Err(EngineError::Unexpected(format!(
            "sampler received {} weights for {} candidates",
            weights.len(),
            candidates.len()
        )));
    }
    if let Some(bad) = weights.iter().find(|weight| !weight.is_finite() || **weight < 0.0) {
        return Err(EngineError::Unexpected(format!(
            "sampler weights must be finite and non-negative, got {bad}"
        )));
    }

    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut remaining_weights = weights.to_vec();
    let mut chosen = Vec::with_capacity(k.min(candidates.len()));

    while chosen.len() < k && !remaining.is_empty() {
        let position = draw_position(&remaining_weights, rng);
        chosen.push(candidates[remaining[position]].clone());
        remaining.remove(position);
        remaining_weights.remove(position);
    }

    Ok(chosen)
}

fn draw_position<R>(weights: &[f64], rng: &mut R) -> usize
where
    R: Rng + ?Sized,
{
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return rng.gen_range(0..weights.len());
    }

    let target = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    for (position, weight) in weights.iter().enumerate() {
        cumulative += weight;
        if target < cumulative {
            return position;
        }
    }

    // Rounding can leave `target` at the very top of the range.
    weights.iter().rposition(|weight| *weight > 0.0).unwrap_or(weights.len() - 1)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn first_draw_frequency_follows_weights() {
        let mut rng = StdRng::seed_from_u64(7);
        let candidates = ["a", "b", "c", "d"];
        let weights = [3.0, 1.0, 0.0, 0.0];
        let trials = 10_000;
        let mut first_is_a = 0_u32;

        for _ in 0..trials {
            let drawn = match sample_without_replacement(&candidates, &weights, 1, &mut rng) {
                Ok(drawn) => drawn,
                Err(err) => panic!("sampling should succeed: {err}"),
            };
            if drawn == ["a"] {
                first_is_a += 1;
            }
        }

        let frequency = f64::from(first_is_a) / f64::from(trials);
        assert!((frequency - 0.75).abs() < 0.05, "frequency was {frequency}");
    }

    #[test]
    fn zero_weight_candidates_are_drawn_after_weighted_ones() {
        let mut rng = StdRng::seed_from_u64(11);
        let candidates = ["a", "b", "c", "d"];
        let weights = [3.0, 1.0, 0.0, 0.0];

        for _ in 0..200 {
            let drawn = match sample_without_replacement(&candidates, &weights, 4, &mut rng) {
                Ok(drawn) => drawn,
                Err(err) => panic!("sampling should succeed: {err}"),
            };
            assert_eq!(drawn.len(), 4);
            let mut head = drawn[..2].to_vec();
            head.sort_unstable();
            assert_eq!(head, ["a", "b"]);
            let mut tail = drawn[2..].to_vec();
            tail.sort_unstable();
            assert_eq!(tail, ["c", "d"]);
        }
    }

    #[test]
    fn all_zero_weights_fall_back_to_uniform() {
        let mut rng = StdRng::seed_from_u64(3);
        let drawn = match sample_without_replacement(&[1, 2, 3], &[0.0, 0.0, 0.0], 3, &mut rng) {
            Ok(drawn) => drawn,
            Err(err) => panic!("sampling should succeed: {err}"),
        };
        let mut sorted = drawn;
        sorted.sort_unstable();
        assert_eq!(sorted, vec![1, 2, 3]);
    }

    #[test]
    fn short_pool_returns_every_candidate() {
        let mut rng = StdRng::seed_from_u64(5);
        let drawn = match sample_without_replacement(&["x", "y"], &[1.0, 2.0], 10, &mut rng) {
            Ok(drawn) => drawn,
            Err(err) => panic!("sampling should succeed: {err}"),
        };
        assert_eq!(drawn.len(), 2);
    }

    #[test]
    fn mismatched_or_negative_weights_are_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(sample_without_replacement(&[1, 2], &[1.0], 1, &mut rng).is_err());
        assert!(sample_without_replacement(&[1, 2], &[1.0, -0.5], 1, &mut rng).is_err());
        assert!(sample_without_replacement(&[1], &[f64::NAN], 1, &mut rng).is_err());
    }

    proptest! {
        #[test]
        fn property_draws_are_distinct_and_bounded(
            weights in proptest::collection::vec(0.0_f64..5.0, 0..20),
            k in 0_usize..25,
            seed in any::<u64>(),
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let candidates: Vec<usize> = (0..weights.len()).collect();
            let drawn = match sample_without_replacement(&candidates, &weights, k, &mut rng) {
                Ok(drawn) => drawn,
                Err(err) => panic!("sampling should succeed: {err}"),
            };
            prop_assert_eq!(drawn.len(), k.min(candidates.len()));
            let mut unique = drawn.clone();
            unique.sort_unstable();
            unique.dedup();
            prop_assert_eq!(unique.len(), drawn.len());
        }
    }
}
