//! Precedence policy: who may change a link, and when.
//!
//! Pure decision logic. The engine loads whatever link exists for the pair
//! (and, for duplicate proposals, its reverse orientation) and asks this
//! module what to do with the proposal; no storage access happens here.

use crate::types::{Link, LinkSource, MatchOutcome};

pub const AUTO_NO_MATCH_DENIED: &str =
    "EMPI system is not allowed to automatically NO_MATCH a resource";
pub const MANUAL_LINK_PROTECTED: &str =
    "EMPI system is not allowed to modify links on manually created links";

/// Verdict on a proposed link update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Create or update the link with the proposed outcome and source.
    Apply,

    /// Legitimate silent outcome: return the existing record unchanged,
    /// write nothing, no audit line.
    NoOp,

    /// Business-rule violation. Surfaced to the caller as a fatal
    /// `PrecedenceViolation`, never silently swallowed.
    Reject(&'static str),
}

/// Decide what a proposed `(outcome, source)` may do to the link state for a
/// pair.
///
/// `existing` is the link stored for the ordered pair, if any; `reversed` is
/// the link stored for the opposite orientation. Rules, in order:
///
/// 1. An automatic `NoMatch` is never recorded. A machine non-match is
///    indistinguishable from "not yet evaluated", and persisting it would
///    permanently suppress re-evaluation.
/// 2. A `NoMatch` assertion between the two entities, in either orientation,
///    silently blocks a `PossibleDuplicate` proposal. Checked before manual
///    precedence so a duplicate re-proposal against a manually curated
///    no-match stays silent rather than erroring.
/// 3. No existing link: create.
/// 4. A proposal that repeats the existing outcome is an idempotent no-op
///    when its provenance is no stronger than what is stored: identical
///    source, or an automatic pass confirming any existing verdict. No
///    write, no timestamp churn. (A manual proposal over an automatic link
///    with the same outcome does apply — the human takes over provenance.)
/// 5. A human decision is authoritative: an automatic proposal cannot
///    modify a manually sourced link.
/// 6. Otherwise: update in place.
pub fn decide(
    existing: Option<&Link>,
    reversed: Option<&Link>,
    outcome: MatchOutcome,
    source: LinkSource,
) -> Decision {
    if source == LinkSource::Automatic && outcome == MatchOutcome::NoMatch {
        return Decision::Reject(AUTO_NO_MATCH_DENIED);
    }

    if outcome == MatchOutcome::PossibleDuplicate {
        let no_match_asserted = existing
            .map(|l| l.outcome == MatchOutcome::NoMatch)
            .unwrap_or(false)
            || reversed
                .map(|l| l.outcome == MatchOutcome::NoMatch)
                .unwrap_or(false);
        if no_match_asserted {
            return Decision::NoOp;
        }
    }

    let existing = match existing {
        Some(link) => link,
        None => return Decision::Apply,
    };

    if existing.outcome == outcome
        && (existing.source == source || source == LinkSource::Automatic)
    {
        return Decision::NoOp;
    }

    if existing.source == LinkSource::Manual && source == LinkSource::Automatic {
        return Decision::Reject(MANUAL_LINK_PROTECTED);
    }

    Decision::Apply
}
