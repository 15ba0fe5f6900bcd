//! Incorrect-answer generation shared by every strategy.

use rand::Rng;

use crate::{Item, DISTRACTOR_COUNT};

/// Up to [`DISTRACTOR_COUNT`] distinct answer values that differ from `correct`'s answer.
///
/// Items are drawn without replacement from `primary_pool` (never `correct`
/// itself). If the primary pool runs dry first, `fallback_pool` tops the set up
/// the same way. The result is short whenever both pools together hold fewer
/// qualifying values, and callers must cope with that.
pub fn generate_distractors<R>(
    correct: &Item,
    primary_pool: &[Item],
    fallback_pool: Option<&[Item]>,
    rng: &mut R,
) -> Vec<String>
where
    R: Rng + ?Sized,
{
    let mut accepted: Vec<String> = Vec::with_capacity(DISTRACTOR_COUNT);
    draw_from_pool(correct, primary_pool, &mut accepted, rng);
    if accepted.len() < DISTRACTOR_COUNT {
        if let Some(fallback) = fallback_pool {
            draw_from_pool(correct, fallback, &mut accepted, rng);
        }
    }
    accepted
}

fn draw_from_pool<R>(correct: &Item, pool: &[Item], accepted: &mut Vec<String>, rng: &mut R)
where
    R: Rng + ?Sized,
{
    let mut remaining: Vec<&Item> = pool.iter().filter(|item| item.id != correct.id).collect();
    while accepted.len() < DISTRACTOR_COUNT && !remaining.is_empty() {
        let drawn = remaining.swap_remove(rng.gen_range(0..remaining.len()));
        let value = &drawn.correct_answer;
        if *value != correct.correct_answer && !accepted.contains(value) {
            accepted.push(value.clone());
        }
    }
}
