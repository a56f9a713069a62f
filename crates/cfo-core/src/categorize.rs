//! Category resolution
//!
//! Keyword rules first, then the intelligence service constrained to the
//! user's existing category ids, then the `Uncategorized` category. A run
//! works against an immutable snapshot of the user's categories taken at
//! stage start.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::ai::{with_timeout, AIBackend, AIClient, ClassificationRequest};
use crate::model_router::TaskType;
use crate::models::{Category, CategorySource, TransactionCandidate};
use crate::normalize::{compact, normalize_description};

/// Consecutive classification failures after which a run stops calling out
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Shortest keyword allowed to match inside a longer word
const MIN_SUBSTRING_KEYWORD: usize = 3;

#[derive(Debug, Clone)]
struct KeywordEntry {
    category: usize,
    keyword: String,
    normalized: String,
    compact: String,
}

/// Read-only view of a user's categories for one run
#[derive(Debug, Clone)]
pub struct CategorySnapshot {
    categories: Vec<Category>,
    uncategorized: Category,
    keywords: Vec<KeywordEntry>,
}

/// A keyword rule hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordMatch {
    pub category_id: i64,
    pub keyword: String,
}

impl CategorySnapshot {
    /// Build a snapshot; system categories in `categories` are ignored
    pub fn new(categories: Vec<Category>, uncategorized: Category) -> Self {
        let mut categories: Vec<Category> =
            categories.into_iter().filter(|c| !c.is_system).collect();
        categories.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let keywords = categories
            .iter()
            .enumerate()
            .flat_map(|(idx, category)| {
                category.keywords.iter().filter_map(move |keyword| {
                    let normalized = normalize_description(keyword);
                    if normalized.is_empty() {
                        return None;
                    }
                    Some(KeywordEntry {
                        category: idx,
                        keyword: keyword.clone(),
                        compact: compact(&normalized),
                        normalized,
                    })
                })
            })
            .collect();

        Self {
            categories,
            uncategorized,
            keywords,
        }
    }

    /// Categories the resolver may assign, in creation order
    pub fn assignable(&self) -> &[Category] {
        &self.categories
    }

    pub fn uncategorized(&self) -> &Category {
        &self.uncategorized
    }

    pub fn get(&self, id: i64) -> Option<&Category> {
        if id == self.uncategorized.id {
            return Some(&self.uncategorized);
        }
        self.categories.iter().find(|c| c.id == id)
    }

    fn is_assignable(&self, id: i64) -> bool {
        self.categories.iter().any(|c| c.id == id)
    }

    /// Keyword rule lookup
    ///
    /// The longest matching keyword wins; equal lengths go to the category
    /// created first, then the lowest id.
    pub fn match_keywords(&self, description: &str) -> Option<KeywordMatch> {
        let normalized = normalize_description(description);
        if normalized.is_empty() {
            return None;
        }
        let padded = format!(" {} ", normalized);
        let compacted = compact(&normalized);

        let mut best: Option<&KeywordEntry> = None;
        for entry in &self.keywords {
            let len = entry.compact.chars().count();
            let hit = padded.contains(&format!(" {} ", entry.normalized))
                || (len >= MIN_SUBSTRING_KEYWORD
                    && (normalized.contains(&entry.normalized) || compacted.contains(&entry.compact)));
            if !hit {
                continue;
            }
            // Entries are in creation order, so only a strictly longer keyword replaces
            if best.map_or(true, |b| len > b.compact.chars().count()) {
                best = Some(entry);
            }
        }

        best.map(|entry| KeywordMatch {
            category_id: self.categories[entry.category].id,
            keyword: entry.keyword.clone(),
        })
    }
}

/// Outcome for one candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub category_id: i64,
    pub source: CategorySource,
    pub matched_keyword: Option<String>,
}

/// Resolves candidates to categories for one run
pub struct CategoryResolver<'a> {
    snapshot: &'a CategorySnapshot,
    ai: Option<&'a AIClient>,
    /// Normalized description to classified id, `None` for failed lookups
    cache: HashMap<String, Option<i64>>,
    consecutive_failures: u32,
}

impl<'a> CategoryResolver<'a> {
    pub fn new(snapshot: &'a CategorySnapshot, ai: Option<&'a AIClient>) -> Self {
        Self {
            snapshot,
            ai,
            cache: HashMap::new(),
            consecutive_failures: 0,
        }
    }

    /// Number of distinct descriptions sent to the intelligence service
    pub fn classified(&self) -> usize {
        self.cache.len()
    }

    pub async fn resolve(&mut self, candidate: &TransactionCandidate) -> Resolution {
        if let Some(hit) = self.snapshot.match_keywords(&candidate.description) {
            debug!(
                description = %candidate.description,
                keyword = %hit.keyword,
                "Keyword rule matched"
            );
            return Resolution {
                category_id: hit.category_id,
                source: CategorySource::Rule,
                matched_keyword: Some(hit.keyword),
            };
        }

        match self.classify(candidate).await {
            Some(category_id) => Resolution {
                category_id,
                source: CategorySource::Inferred,
                matched_keyword: None,
            },
            None => Resolution {
                category_id: self.snapshot.uncategorized().id,
                source: CategorySource::None,
                matched_keyword: None,
            },
        }
    }

    async fn classify(&mut self, candidate: &TransactionCandidate) -> Option<i64> {
        let ai = self.ai?;
        if self.snapshot.assignable().is_empty() {
            return None;
        }

        let key = normalize_description(&candidate.description);
        if let Some(cached) = self.cache.get(&key) {
            return *cached;
        }
        if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
            return None;
        }

        let request = ClassificationRequest {
            description: &candidate.description,
            amount: candidate.amount,
            currency: &candidate.currency,
            categories: self.snapshot.assignable(),
        };
        let answer = match with_timeout(ai, TaskType::Classification, ai.classify_transaction(&request))
            .await
        {
            Ok(id) if self.snapshot.is_assignable(id) => {
                self.consecutive_failures = 0;
                Some(id)
            }
            Ok(id) => {
                warn!(
                    description = %candidate.description,
                    category_id = id,
                    "Classifier answered with an unknown category, using Uncategorized"
                );
                None
            }
            Err(e) => {
                self.consecutive_failures += 1;
                warn!(
                    description = %candidate.description,
                    error = %e,
                    "Classification failed, using Uncategorized"
                );
                if self.consecutive_failures == MAX_CONSECUTIVE_FAILURES {
                    warn!("Classifier failed repeatedly, skipping it for the rest of this run");
                }
                None
            }
        };

        self.cache.insert(key, answer);
        answer
    }
}
