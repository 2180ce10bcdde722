// ivr-core/src/resolve/conflict.rs
use std::collections::BTreeSet;

use ivr_common::config::ConflictManagerKind;
use ivr_common::error::{IvrError, Result};
use ivr_common::model::{ModuleId, ModuleRevision, Revision};
use ivr_common::VersionConstraint;

/// One caller's wish for a module: the revision its constraint points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub revision: Revision,
    pub constraint: VersionConstraint,
    pub caller: ModuleRevision,
    pub forced: bool,
}

impl Candidate {
    pub fn describe(&self, id: &ModuleId) -> String {
        format!(
            "{} -> {}{} (selects {})",
            self.caller,
            id,
            if self.forced {
                format!(";{} [forced]", self.constraint)
            } else {
                format!(";{}", self.constraint)
            },
            self.revision
        )
    }
}

/// Picks the winning revision when callers disagree. Forced candidates are
/// handled before a manager is consulted.
pub trait ConflictManager: Send + Sync {
    fn name(&self) -> &'static str;

    /// `candidates` is never empty. `known` lists every revision the
    /// repositories offer for the module, ascending, and may be empty when
    /// only static constraints were seen.
    fn select(&self, id: &ModuleId, candidates: &[Candidate], known: &[Revision])
        -> Result<Revision>;

    /// True when the manager needs `known` to decide.
    fn needs_known_revisions(&self) -> bool {
        false
    }
}

pub fn conflict_error(id: &ModuleId, candidates: &[Candidate]) -> IvrError {
    IvrError::UnresolvableConflict {
        module: id.to_string(),
        paths: candidates.iter().map(|c| c.describe(id)).collect(),
    }
}

/// Highest requested revision wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct LatestRevision;

impl ConflictManager for LatestRevision {
    fn name(&self) -> &'static str {
        "latest-revision"
    }

    fn select(&self, id: &ModuleId, candidates: &[Candidate], _known: &[Revision]) -> Result<Revision> {
        candidates
            .iter()
            .map(|c| &c.revision)
            .max()
            .cloned()
            .ok_or_else(|| conflict_error(id, candidates))
    }
}

/// Highest revision every constraint accepts.
#[derive(Debug, Default, Clone, Copy)]
pub struct LatestCompatible;

impl ConflictManager for LatestCompatible {
    fn name(&self) -> &'static str {
        "latest-compatible"
    }

    fn select(&self, id: &ModuleId, candidates: &[Candidate], known: &[Revision]) -> Result<Revision> {
        let pool: BTreeSet<&Revision> = known
            .iter()
            .chain(candidates.iter().map(|c| &c.revision))
            .collect();
        pool.into_iter()
            .rev()
            .find(|rev| candidates.iter().all(|c| c.constraint.matches(rev)))
            .cloned()
            .ok_or_else(|| conflict_error(id, candidates))
    }

    fn needs_known_revisions(&self) -> bool {
        true
    }
}

/// Any disagreement is an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct Strict;

impl ConflictManager for Strict {
    fn name(&self) -> &'static str {
        "strict"
    }

    fn select(&self, id: &ModuleId, candidates: &[Candidate], _known: &[Revision]) -> Result<Revision> {
        let distinct: BTreeSet<&Revision> = candidates.iter().map(|c| &c.revision).collect();
        match distinct.into_iter().collect::<Vec<_>>().as_slice() {
            [only] => Ok((*only).clone()),
            _ => Err(conflict_error(id, candidates)),
        }
    }
}

pub fn conflict_manager(kind: ConflictManagerKind) -> Box<dyn ConflictManager> {
    match kind {
        ConflictManagerKind::LatestRevision => Box::new(LatestRevision),
        ConflictManagerKind::LatestCompatible => Box::new(LatestCompatible),
        ConflictManagerKind::Strict => Box::new(Strict),
    }
}

/// Applies forced pins, then the manager.
pub fn choose(
    manager: &dyn ConflictManager,
    id: &ModuleId,
    candidates: &[Candidate],
    known: &[Revision],
) -> Result<Revision> {
    let forced: BTreeSet<&Revision> = candidates
        .iter()
        .filter(|c| c.forced)
        .map(|c| &c.revision)
        .collect();
    let mut pins = forced.into_iter();
    match (pins.next(), pins.next()) {
        (None, _) => manager.select(id, candidates, known),
        (Some(pin), None) => Ok(pin.clone()),
        _ => {
            let pinned: Vec<Candidate> = candidates.iter().filter(|c| c.forced).cloned().collect();
            Err(conflict_error(id, &pinned))
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn candidate(caller: &str, constraint: &str, revision: &str, forced: bool) -> Candidate {
        Candidate {
            revision: Revision::new(revision),
            constraint: VersionConstraint::parse(constraint).unwrap(),
            caller: ModuleRevision::parse(caller).unwrap(),
            forced,
        }
    }

    fn util() -> ModuleId {
        ModuleId::new("org", "util")
    }

    #[test]
    fn latest_revision_picks_highest() {
        let candidates = [
            candidate("org#app;1.0", "1.0", "1.0", false),
            candidate("org#lib;1.5", "1.2", "1.2", false),
        ];
        let winner = choose(&LatestRevision, &util(), &candidates, &[]).unwrap();
        assert_eq!(winner, Revision::new("1.2"));
    }

    #[test]
    fn forced_pin_beats_latest() {
        let candidates = [
            candidate("org#app;1.0", "1.0", "1.0", true),
            candidate("org#lib;1.5", "[1.0,2.0)", "1.9", false),
        ];
        let winner = choose(&LatestRevision, &util(), &candidates, &[]).unwrap();
        assert_eq!(winner, Revision::new("1.0"));
    }

    #[test]
    fn disagreeing_pins_are_unresolvable() {
        let candidates = [
            candidate("org#app;1.0", "1.0", "1.0", true),
            candidate("org#lib;1.5", "1.1", "1.1", true),
            candidate("org#other;1.0", "latest.integration", "2.0", false),
        ];
        let err = choose(&LatestRevision, &util(), &candidates, &[]).unwrap_err();
        match err {
            IvrError::UnresolvableConflict { module, paths } => {
                assert_eq!(module, "org#util");
                assert_eq!(paths.len(), 2);
                assert!(paths[0].contains("[forced]"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn latest_compatible_intersects_constraints() {
        let known: Vec<Revision> = ["1.0", "1.4", "1.9", "2.1"].map(Revision::new).to_vec();
        let candidates = [
            candidate("org#app;1.0", "[1.0,2.0)", "1.9", false),
            candidate("org#lib;1.5", "(,1.5]", "1.4", false),
        ];
        assert_eq!(
            LatestCompatible.select(&util(), &candidates, &known).unwrap(),
            Revision::new("1.4")
        );
        let incompatible = [
            candidate("org#app;1.0", "1.0", "1.0", false),
            candidate("org#lib;1.5", "1.2", "1.2", false),
        ];
        assert!(LatestCompatible
            .select(&util(), &incompatible, &known)
            .is_err());
    }

    #[test]
    fn strict_rejects_any_difference() {
        let same = [
            candidate("org#a;1", "1.0", "1.0", false),
            candidate("org#b;1", "[1.0]", "1.0", false),
        ];
        assert!(Strict.select(&util(), &same, &[]).is_ok());
        let different = [
            candidate("org#a;1", "1.0", "1.0", false),
            candidate("org#b;1", "1.1", "1.1", false),
        ];
        assert!(Strict.select(&util(), &different, &[]).is_err());
    }

    proptest! {
        #[test]
        fn latest_revision_ignores_request_order(
            revisions in prop::collection::vec("[0-9]\\.[0-9]{1,2}(-rc[0-9])?", 1..6),
        ) {
            let candidates: Vec<Candidate> = revisions
                .iter()
                .enumerate()
                .map(|(i, rev)| candidate(&format!("org#caller{i};1.0"), rev, rev, false))
                .collect();
            let mut reversed = candidates.clone();
            reversed.reverse();

            let winner = choose(&LatestRevision, &util(), &candidates, &[]).unwrap();
            let expected = candidates.iter().map(|c| c.revision.clone()).max().unwrap();
            prop_assert_eq!(&winner, &expected);
            prop_assert_eq!(choose(&LatestRevision, &util(), &reversed, &[]).unwrap(), winner);
        }
    }
}
