use rand::seq::SliceRandom;
use rand::Rng;

use super::{ItemFormatter, RunScope, Selection};
use crate::{EngineError, QuizStore, QUIZ_LENGTH};

/// Ten draws with replacement over the whole catalog.
pub(super) fn uniform_random<S, R>(scope: RunScope<'_, S, R>) -> Result<Selection, EngineError>
where
    S: QuizStore + ?Sized,
    R: Rng + ?Sized,
{
    let RunScope { rng, catalog, .. } = scope;
    let mut formatter = ItemFormatter::new(catalog, None);
    for _ in 0..QUIZ_LENGTH {
        let item = catalog.choose(rng).ok_or_else(|| EngineError::no_data("catalog is empty"))?;
        formatter.push(item, None, rng);
    }

    let message = format!("{QUIZ_LENGTH} items drawn at random from {} in the catalog", catalog.len());
    Ok(formatter.finish(message, None))
}
