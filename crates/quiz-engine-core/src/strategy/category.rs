use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use super::{ItemFormatter, Rank, RunScope, Selection, StrategyName};
use crate::outcome::{CategorySummary, StrategySummary};
use crate::{
    round_to, CategoryAccuracy, EngineError, Item, QuizStore, CATEGORY_MIN_RESPONSES,
    MIN_CATALOG_ITEMS, QUIZ_LENGTH,
};

/// Ten draws with replacement from one category; distractors top up from outside it.
pub(super) fn category_exact<S, R>(scope: RunScope<'_, S, R>) -> Result<Selection, EngineError>
where
    S: QuizStore + ?Sized,
    R: Rng + ?Sized,
{
    let RunScope { store, rng, catalog, input, .. } = scope;
    let category_id = input.require_category(StrategyName::CategoryExact)?;
    let in_category = store.fetch_items_by_category(category_id)?;
    if in_category.is_empty() {
        return Err(EngineError::no_data(format!("category {category_id} has no items")));
    }

    let outside: Vec<Item> =
        catalog.iter().filter(|item| item.category_id != category_id).cloned().collect();
    debug!(category = %category_id, in_category = in_category.len(), outside = outside.len(), "category pool loaded");

    let mut formatter = ItemFormatter::new(&in_category, Some(&outside));
    draw_with_replacement(&in_category, &mut formatter, rng)?;
    let message = format!(
        "{QUIZ_LENGTH} items drawn from category {category_id} ({} available)",
        in_category.len()
    );
    Ok(formatter.finish(message, None))
}

/// Ten draws from the learner's most (or least) accurate qualifying category.
pub(super) fn category_ranked<S, R>(
    scope: RunScope<'_, S, R>,
    name: StrategyName,
    rank: Rank,
) -> Result<Selection, EngineError>
where
    S: QuizStore + ?Sized,
    R: Rng + ?Sized,
{
    let RunScope { store, rng, input, .. } = scope;
    let learner_id = input.require_learner(name)?;
    let accuracy = store.fetch_category_accuracy(learner_id)?;
    if accuracy.is_empty() {
        return Err(EngineError::no_data(format!("learner {learner_id} has no responses yet")));
    }

    let chosen = pick_category(&accuracy, rank).ok_or_else(|| {
        EngineError::below_threshold(format!(
            "learner {learner_id} needs at least {CATEGORY_MIN_RESPONSES} responses in a category"
        ))
    })?;

    let in_category = store.fetch_items_by_category(chosen.category_id)?;
    if in_category.len() < MIN_CATALOG_ITEMS {
        return Err(EngineError::below_threshold(format!(
            "category {} holds {} items; at least {MIN_CATALOG_ITEMS} are needed",
            chosen.category_id,
            in_category.len()
        )));
    }

    let mut formatter = ItemFormatter::new(&in_category, None);
    draw_with_replacement(&in_category, &mut formatter, rng)?;

    let percent = round_to(chosen.correct_rate * 100.0, 2);
    let qualifier = match rank {
        Rank::Best => "strongest",
        Rank::Worst => "weakest",
    };
    let message = format!(
        "{QUIZ_LENGTH} items drawn from the {qualifier} category {} ({percent}% correct over {} attempts)",
        chosen.category_id, chosen.attempts
    );
    let summary = StrategySummary::Category(CategorySummary {
        category_id: chosen.category_id,
        correct_rate: percent,
        category_attempts: chosen.attempts,
    });
    Ok(formatter.finish(message, Some(summary)))
}

fn draw_with_replacement<R>(
    pool: &[Item],
    formatter: &mut ItemFormatter<'_>,
    rng: &mut R,
) -> Result<(), EngineError>
where
    R: Rng + ?Sized,
{
    for _ in 0..QUIZ_LENGTH {
        let item = pool.choose(rng).ok_or_else(|| EngineError::no_data("item pool is empty"))?;
        formatter.push(item, None, rng);
    }
    Ok(())
}

/// Qualifying category with the extreme rate; ties go to more attempts, then the lower id.
fn pick_category(accuracy: &[CategoryAccuracy], rank: Rank) -> Option<&CategoryAccuracy> {
    accuracy
        .iter()
        .filter(|row| row.attempts >= CATEGORY_MIN_RESPONSES)
        .min_by(|left, right| {
            let by_rate = match rank {
                Rank::Best => right.correct_rate.total_cmp(&left.correct_rate),
                Rank::Worst => left.correct_rate.total_cmp(&right.correct_rate),
            };
            by_rate
                .then_with(|| right.attempts.cmp(&left.attempts))
                .then_with(|| left.category_id.cmp(&right.category_id))
        })
}
