use rand::seq::SliceRandom;
use rand::Rng;

/// Picks an identity from `available`, preferring one that matches
/// `preferred` (either the full identity or its short suffix).
pub fn select_identity<'a, R: Rng + ?Sized>(
    available: &'a [String],
    preferred: Option<&str>,
    rng: &mut R,
) -> Option<&'a str> {
    if let Some(preferred) = preferred {
        let found = available.iter().find(|id| {
            id.as_str() == preferred || id.rsplit('/').next() == Some(preferred)
        });
        if let Some(id) = found {
            return Some(id.as_str());
        }
    }
    available.choose(rng).map(String::as_str)
}
