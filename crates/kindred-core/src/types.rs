use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable internal identifier for a stored record.
///
/// Pids are opaque and assigned by the reference-resolution collaborator;
/// they are never shown to end users and are distinct from the external
/// reference string a caller hands in. UUIDv7 for time-sortability.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Pid(Uuid);

impl Pid {
    /// Mint a fresh pid.
    pub fn new() -> Self {
        Pid(Uuid::now_v7())
    }

    /// The nil pid. Invalid as input to any lookup.
    pub fn nil() -> Self {
        Pid(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Raw bytes, used as storage keys.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Pid(Uuid::from_bytes(bytes))
    }
}

impl Default for Pid {
    fn default() -> Self {
        Pid::new()
    }
}

impl std::fmt::Display for Pid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Externally supplied record reference, e.g. "Patient/123".
///
/// References mean nothing to this engine until the resolver collaborator
/// maps them to a pid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordRef(String);

impl RecordRef {
    pub fn new(reference: impl Into<String>) -> Self {
        RecordRef(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RecordRef {
    fn from(s: &str) -> Self {
        RecordRef(s.to_string())
    }
}

/// Verdict on a person/target link, in increasing confidence order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatchOutcome {
    /// Asserted non-match. Only a manual actor may record this — an
    /// automatic non-match is indistinguishable from "not yet evaluated".
    NoMatch,

    /// The matcher considers the pair similar but not conclusive.
    PossibleMatch,

    /// Two canonical persons suspected of being the same identity.
    /// Never used for person-to-record links.
    PossibleDuplicate,

    /// Confirmed match. The only outcome projected onto the person's
    /// denormalized target list.
    Match,
}

impl MatchOutcome {
    /// Stable string form, used in storage indexes and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchOutcome::NoMatch => "NO_MATCH",
            MatchOutcome::PossibleMatch => "POSSIBLE_MATCH",
            MatchOutcome::PossibleDuplicate => "POSSIBLE_DUPLICATE",
            MatchOutcome::Match => "MATCH",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "NO_MATCH" => Some(MatchOutcome::NoMatch),
            "POSSIBLE_MATCH" => Some(MatchOutcome::PossibleMatch),
            "POSSIBLE_DUPLICATE" => Some(MatchOutcome::PossibleDuplicate),
            "MATCH" => Some(MatchOutcome::Match),
            _ => None,
        }
    }
}

impl std::fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Provenance of a link's current outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LinkSource {
    /// Computed by the matching black box.
    Automatic,

    /// Asserted by a human. Authoritative; cannot be overwritten by a
    /// subsequent automatic pass.
    Manual,
}

impl LinkSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkSource::Automatic => "AUTO",
            LinkSource::Manual => "MANUAL",
        }
    }
}

impl std::fmt::Display for LinkSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A directed link between a canonical person and a target record.
///
/// The store keeps at most one link per ordered `(person_pid, target_pid)`
/// pair. Duplicate-detection links between two persons may have been created
/// in either direction, so callers that cannot guarantee orientation must
/// probe both — see `LinkStore::find_either_orientation`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Link {
    /// Canonical person end. Immutable once the link exists.
    pub person_pid: Pid,

    /// Linked record end. Immutable once the link exists.
    pub target_pid: Pid,

    /// Current verdict. Mutable.
    pub outcome: MatchOutcome,

    /// Provenance of the current verdict. Mutable, governed by the
    /// precedence policy.
    pub source: LinkSource,

    /// Set once on first persistence.
    pub created_at: DateTime<Utc>,

    /// Refreshed on every save.
    pub updated_at: DateTime<Utc>,
}

impl Link {
    pub fn new(person_pid: Pid, target_pid: Pid, outcome: MatchOutcome, source: LinkSource) -> Self {
        let now = Utc::now();
        Link {
            person_pid,
            target_pid,
            outcome,
            source,
            created_at: now,
            updated_at: now,
        }
    }

    /// Unpersisted skeleton for a pair with no stored link yet. The engine
    /// assigns the real outcome and source before saving; until then the
    /// draft reads as an automatic possible match.
    pub fn draft(person_pid: Pid, target_pid: Pid) -> Self {
        Link::new(
            person_pid,
            target_pid,
            MatchOutcome::PossibleMatch,
            LinkSource::Automatic,
        )
    }

    /// True if this link connects the same unordered pair, in either
    /// direction.
    pub fn connects(&self, a: Pid, b: Pid) -> bool {
        (self.person_pid == a && self.target_pid == b)
            || (self.person_pid == b && self.target_pid == a)
    }
}

/// Canonical person record as seen by this engine: the pid plus the
/// denormalized list of confirmed-match targets.
///
/// The projector owns the content of `link_targets`; persistence of the
/// record itself is delegated to the `PersonDirectory` collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersonRecord {
    pub pid: Pid,
    pub link_targets: Vec<Pid>,
}

impl PersonRecord {
    pub fn new(pid: Pid) -> Self {
        PersonRecord {
            pid,
            link_targets: Vec::new(),
        }
    }

    pub fn has_target(&self, target: Pid) -> bool {
        self.link_targets.contains(&target)
    }
}

/// Per-request audit accumulator.
///
/// The engine appends one human-readable line per state change; the caller
/// flushes the lines into its own audit infrastructure when the enclosing
/// request completes.
#[derive(Debug, Default, Clone, Serialize)]
pub struct TransactionContext {
    messages: Vec<String>,
}

impl TransactionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// JSON export for callers that ship audit lines over a boundary.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.messages).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_string_round_trip() {
        for outcome in [
            MatchOutcome::NoMatch,
            MatchOutcome::PossibleMatch,
            MatchOutcome::PossibleDuplicate,
            MatchOutcome::Match,
        ] {
            assert_eq!(MatchOutcome::from_str(outcome.as_str()), Some(outcome));
        }
        assert_eq!(MatchOutcome::from_str("SOMETHING_ELSE"), None);
    }

    #[test]
    fn test_outcome_confidence_order() {
        assert!(MatchOutcome::NoMatch < MatchOutcome::PossibleMatch);
        assert!(MatchOutcome::PossibleMatch < MatchOutcome::PossibleDuplicate);
        assert!(MatchOutcome::PossibleDuplicate < MatchOutcome::Match);
    }

    #[test]
    fn test_link_connects_either_direction() {
        let a = Pid::new();
        let b = Pid::new();
        let c = Pid::new();
        let link = Link::new(a, b, MatchOutcome::NoMatch, LinkSource::Manual);

        assert!(link.connects(a, b));
        assert!(link.connects(b, a));
        assert!(!link.connects(a, c));
    }

    #[test]
    fn test_transaction_context_json_export() {
        let mut ctx = TransactionContext::new();
        assert_eq!(ctx.to_json(), "[]");

        ctx.add_message("Creating Link from Person/1 to Patient/1 -> MATCH");
        ctx.add_message("Syncing links to person abc: 1 added, 0 removed, 1 total");

        let parsed: Vec<String> = serde_json::from_str(&ctx.to_json()).unwrap();
        assert_eq!(parsed, ctx.messages());
    }

    #[test]
    fn test_pid_bytes_round_trip() {
        let pid = Pid::new();
        assert_eq!(Pid::from_bytes(*pid.as_bytes()), pid);
        assert!(!pid.is_nil());
        assert!(Pid::nil().is_nil());
    }
}
