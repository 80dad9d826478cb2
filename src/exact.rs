//! Exact-match pre-pass.
//!
//! Asks the index for records whose lowercased name equals the normalized
//! search text, then (when the cap is not yet reached) for names that
//! contain it. Both queries run against the raw `name_normalized` keyword
//! field under the query's structural predicates, so an old record with a
//! matching name is found no matter how many newer records exist. The
//! matches are emitted ahead of the ranked results.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;

use relay_search_core::document::IndexField;
use relay_search_core::prioritize::{name_match, NameMatch};
use relay_search_core::query::{QueryNode, WildcardPattern};

use crate::config::ResultOrder;
use crate::index::{IndexHit, SearchIndex};

/// Keeps name matches from `candidates`, equal names first, at most `cap`.
///
/// Candidate order is preserved within each match class.
pub fn select_exact(candidates: Vec<IndexHit>, needle: &str, cap: usize) -> Vec<IndexHit> {
    let mut ranked: Vec<(NameMatch, IndexHit)> = candidates
        .into_iter()
        .filter_map(|hit| {
            name_match(hit.name_normalized.as_deref(), hit.name.as_deref(), needle)
                .map(|found| (found, hit))
        })
        .collect();
    ranked.sort_by_key(|(found, _)| *found);
    ranked.into_iter().take(cap).map(|(_, hit)| hit).collect()
}

/// `structural` narrowed to names equal to `needle`.
pub fn equal_name_query(structural: &QueryNode, needle: &str) -> QueryNode {
    QueryNode::and(vec![
        structural.clone(),
        QueryNode::Keyword {
            field: IndexField::NameNormalized,
            value: needle.to_string(),
        },
    ])
}

/// `structural` narrowed to names containing `needle`.
pub fn containing_name_query(structural: &QueryNode, needle: &str) -> QueryNode {
    QueryNode::and(vec![
        structural.clone(),
        QueryNode::Wildcard {
            field: IndexField::NameNormalized,
            term: needle.to_string(),
            pattern: WildcardPattern::Contains,
            boost: 1.0,
        },
    ])
}

/// Runs the pre-pass on a blocking thread.
pub async fn exact_matches(
    index: Arc<SearchIndex>,
    structural: QueryNode,
    needle: String,
    cap: usize,
) -> anyhow::Result<Vec<IndexHit>> {
    if cap == 0 || needle.is_empty() {
        return Ok(Vec::new());
    }
    tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<IndexHit>> {
        let mut candidates =
            index.search(&equal_name_query(&structural, &needle), cap, ResultOrder::Recency)?;
        if candidates.len() < cap {
            // Equal names match the contains query too; fetch enough to
            // still fill the cap after they are dropped.
            let limit = cap + candidates.len();
            let containing =
                index.search(&containing_name_query(&structural, &needle), limit, ResultOrder::Recency)?;
            let mut seen: HashSet<String> = candidates.iter().map(|h| h.id.clone()).collect();
            candidates.extend(containing.into_iter().filter(|h| seen.insert(h.id.clone())));
        }
        Ok(select_exact(candidates, &needle, cap))
    })
    .await
    .context("exact-match task failed")?
}
