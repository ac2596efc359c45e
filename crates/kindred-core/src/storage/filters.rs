use crate::types::{LinkSource, MatchOutcome, Pid};

/// Filter criteria for querying links.
///
/// Replaces the example-object queries of older link stores with an explicit
/// optional-filter struct: every attribute a lookup may constrain is named
/// here, and unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct LinkFilter {
    pub person: Option<Pid>,
    pub target: Option<Pid>,
    pub outcome: Option<MatchOutcome>,
    pub source: Option<LinkSource>,
    pub limit: Option<usize>,
}

impl LinkFilter {
    /// Create a new empty filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Constrain to links whose person end is this pid
    pub fn with_person(mut self, person: Pid) -> Self {
        self.person = Some(person);
        self
    }

    /// Constrain to links whose target end is this pid
    pub fn with_target(mut self, target: Pid) -> Self {
        self.target = Some(target);
        self
    }

    /// Constrain to links with this outcome
    pub fn with_outcome(mut self, outcome: MatchOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Constrain to links with this source
    pub fn with_source(mut self, source: LinkSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Limit number of results
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
