//! DIVER Search - Candidate Posts
//!
//! The relay's source of work: a [`SearchProvider`] returns posts with text
//! and an attached image. [`RecentSearchClient`] implements it against the
//! v2 recent-search API.

mod recent;

pub use recent::RecentSearchClient;

use async_trait::async_trait;
use diver_core::{Candidate, RunResult};

/// Source of candidate posts.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Posts matching `query`, in provider order. May be empty.
    async fn search(&self, query: &str) -> RunResult<Vec<Candidate>>;
}
