use tracing::instrument;

use crate::{CursorPosition, ResultSet, ScreenPoint, WordObservation};

/// Finds the observation containing `query` (case-insensitively) whose
/// center is closest to `anchor`. Equally close candidates resolve to the
/// one reported first.
#[instrument(level = "debug", skip(result_set), fields(generation = result_set.generation()))]
pub fn locate<'a>(
    query: &str,
    anchor: ScreenPoint,
    result_set: &'a ResultSet,
) -> Option<&'a WordObservation> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return None;
    }
    let nearest = result_set
        .observations()
        .iter()
        .filter(|it| it.text.to_lowercase().contains(&query))
        .min_by_key(|it| it.bounding_box.scaled_distance_squared(anchor));
    match nearest {
        Some(word) => log::debug!("Matched {query:?} to {:?} at {:?}", word.text, word.bounding_box),
        None => log::debug!(
            "No match for {query:?} among {} words",
            result_set.observations().len()
        ),
    }
    nearest
}

/// The point before, inside or after `observation`, vertically centred.
pub fn resolve(observation: &WordObservation, position: CursorPosition) -> ScreenPoint {
    let bounds = observation.bounding_box;
    let x = match position {
        CursorPosition::Before => bounds.left,
        CursorPosition::Middle => bounds.left + bounds.width / 2,
        CursorPosition::After => bounds.left + bounds.width,
    };
    ScreenPoint::new(x, bounds.top + bounds.height / 2)
}

pub fn locate_word(
    result_set: &ResultSet,
    query: &str,
    anchor: ScreenPoint,
    position: CursorPosition,
) -> Option<ScreenPoint> {
    locate(query, anchor, result_set).map(|word| resolve(word, position))
}

/// Start and end points for selecting from the start of `start` through the
/// end of `end` (or of `start` itself when `end` is omitted).
pub fn select_range(
    result_set: &ResultSet,
    start: &str,
    end: Option<&str>,
    anchor: ScreenPoint,
) -> Option<(ScreenPoint, ScreenPoint)> {
    let from = locate_word(result_set, start, anchor, CursorPosition::Before)?;
    let to = locate_word(result_set, end.unwrap_or(start), anchor, CursorPosition::After)?;
    Some((from, to))
}
