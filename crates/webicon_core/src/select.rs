use std::cmp::Reverse;

use crate::extract::FaviconCandidate;

/// Pick one icon per page.
///
/// The largest apple-touch icon wins (ties keep extraction order). Without any
/// apple-touch icon the first extracted candidate is used, regardless of size.
pub fn select_best(candidates: &[FaviconCandidate]) -> Option<&FaviconCandidate> {
    let mut by_area = candidates.iter().collect::<Vec<_>>();
    by_area.sort_by_key(|candidate| Reverse(candidate.size.area()));
    by_area
        .into_iter()
        .find(|candidate| candidate.kind.is_apple_touch())
        .or_else(|| candidates.first())
}
