// ivr-common/src/model/module.rs
// Module coordinates and Ivy-style revision ordering.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{IvrError, Result};

/// Checks one coordinate (organisation, name or revision). Coordinates become
/// path segments in the cache and in repositories, so anything that could
/// leave its directory is refused.
pub fn check_coordinate(field: &str, value: &str) -> Result<()> {
    let problem = if value.is_empty() {
        "must not be empty"
    } else if value.contains(['/', '\\']) {
        "must not contain path separators"
    } else if value.starts_with('.') {
        "must not start with '.'"
    } else if value.contains("..") {
        "must not contain '..'"
    } else if value.chars().any(char::is_control) {
        "must not contain control characters"
    } else {
        return Ok(());
    };
    Err(IvrError::malformed(field, format!("'{value}' {problem}")))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId {
    pub organisation: String,
    pub name: String,
}

impl ModuleId {
    pub fn new(organisation: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            organisation: organisation.into(),
            name: name.into(),
        }
    }

    /// Parses `org#name`.
    pub fn parse(s: &str) -> Result<Self> {
        match s.split_once('#') {
            Some((org, name)) if !org.is_empty() && !name.is_empty() => {
                let id = Self::new(org, name);
                id.check()?;
                Ok(id)
            }
            _ => Err(IvrError::Config(format!(
                "invalid module id '{s}', expected 'organisation#name'"
            ))),
        }
    }

    pub fn check(&self) -> Result<()> {
        check_coordinate("organisation", &self.organisation)?;
        check_coordinate("name", &self.name)
    }

    pub fn revision(&self, revision: Revision) -> ModuleRevision {
        ModuleRevision {
            id: self.clone(),
            revision,
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.organisation, self.name)
    }
}

/// A revision string. Ordering follows the usual Ivy conventions: numeric
/// tokens compare numerically, pre-release qualifiers sort before the bare
/// release, unknown qualifiers sort after it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Num(&'a str),
    Alpha(String),
}

/// dev < alpha < beta < milestone < rc < snapshot < (release) < other
fn qualifier_rank(q: &str) -> Option<i8> {
    match q {
        "dev" => Some(-6),
        "alpha" | "a" => Some(-5),
        "beta" | "b" => Some(-4),
        "milestone" | "m" => Some(-3),
        "rc" | "cr" => Some(-2),
        "snapshot" => Some(-1),
        "final" | "ga" | "release" => Some(0),
        _ => None,
    }
}

impl Revision {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn tokens(&self) -> Vec<Token<'_>> {
        let mut tokens = Vec::new();
        for part in self.0.split(['.', '-', '_', '+']) {
            let bytes = part.as_bytes();
            let mut start = 0;
            while start < bytes.len() {
                let numeric = bytes[start].is_ascii_digit();
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() == numeric {
                    end += 1;
                }
                let piece = &part[start..end];
                tokens.push(if numeric {
                    Token::Num(piece)
                } else {
                    Token::Alpha(piece.to_ascii_lowercase())
                });
                start = end;
            }
        }
        // "final"/"ga" carry no ordering weight of their own
        while matches!(tokens.last(), Some(Token::Alpha(a)) if qualifier_rank(a) == Some(0)) {
            tokens.pop();
        }
        tokens
    }

    /// True when the revision carries no pre-release qualifier.
    pub fn is_release(&self) -> bool {
        !self.tokens().iter().any(|t| match t {
            Token::Alpha(a) => qualifier_rank(a).is_some_and(|r| r < 0),
            Token::Num(_) => false,
        })
    }

    /// True unless the revision is a development build or snapshot.
    pub fn is_milestone(&self) -> bool {
        !self.tokens().iter().any(|t| match t {
            Token::Alpha(a) => matches!(a.as_str(), "dev" | "snapshot"),
            Token::Num(_) => false,
        })
    }
}

fn cmp_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn cmp_alpha(a: &str, b: &str) -> Ordering {
    match (qualifier_rank(a), qualifier_rank(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(x), None) => x.cmp(&1),
        (None, Some(y)) => 1.cmp(&y),
        (None, None) => a.cmp(b),
    }
}

/// How a revision that has run out of tokens compares to the other's next token.
fn cmp_missing(other: &Token<'_>) -> Ordering {
    match other {
        Token::Num(_) => Ordering::Less,
        Token::Alpha(a) => match qualifier_rank(a) {
            Some(r) if r < 0 => Ordering::Greater,
            _ => Ordering::Less,
        },
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        let left = self.tokens();
        let right = other.tokens();
        let mut i = 0;
        loop {
            let ord = match (left.get(i), right.get(i)) {
                (None, None) => break,
                (None, Some(r)) => cmp_missing(r),
                (Some(l), None) => cmp_missing(l).reverse(),
                (Some(Token::Num(a)), Some(Token::Num(b))) => cmp_numeric(a, b),
                (Some(Token::Alpha(a)), Some(Token::Alpha(b))) => cmp_alpha(a, b),
                (Some(Token::Num(_)), Some(Token::Alpha(_))) => Ordering::Greater,
                (Some(Token::Alpha(_)), Some(Token::Num(_))) => Ordering::Less,
            };
            if ord != Ordering::Equal {
                return ord;
            }
            i += 1;
        }
        // keep Ord consistent with Eq for spellings like "1.0" / "1.00"
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Revision {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleRevision {
    pub id: ModuleId,
    pub revision: Revision,
}

impl ModuleRevision {
    pub fn new(
        organisation: impl Into<String>,
        name: impl Into<String>,
        revision: impl Into<String>,
    ) -> Self {
        Self {
            id: ModuleId::new(organisation, name),
            revision: Revision::new(revision),
        }
    }

    /// Parses `org#name;rev`.
    pub fn parse(s: &str) -> Result<Self> {
        let (id, rev) = s.split_once(';').ok_or_else(|| {
            IvrError::Config(format!(
                "invalid module revision '{s}', expected 'organisation#name;revision'"
            ))
        })?;
        if rev.is_empty() {
            return Err(IvrError::Config(format!("missing revision in '{s}'")));
        }
        let mrid = ModuleId::parse(id)?.revision(Revision::new(rev));
        mrid.check()?;
        Ok(mrid)
    }

    /// Refuses coordinates that are unsafe as path segments.
    pub fn check(&self) -> Result<()> {
        self.id.check()?;
        check_coordinate("revision", self.revision.as_str())
    }
}

impl fmt::Display for ModuleRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{}", self.id, self.revision)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn r(s: &str) -> Revision {
        Revision::new(s)
    }

    #[test]
    fn numeric_tokens_compare_numerically() {
        assert!(r("1.10") > r("1.9"));
        assert!(r("2.0") > r("1.99.99"));
        assert!(r("1.0.1") > r("1.0"));
    }

    #[test]
    fn prerelease_sorts_before_release() {
        assert!(r("1.0-rc1") < r("1.0"));
        assert!(r("1.0-alpha") < r("1.0-beta"));
        assert!(r("1.0-beta2") < r("1.0-rc1"));
        assert!(r("1.0-SNAPSHOT") < r("1.0"));
        assert!(r("1.0-dev") < r("1.0-alpha"));
        assert!(r("1.0-final") > r("1.0-rc3"));
    }

    #[test]
    fn unknown_qualifiers_sort_after_release() {
        assert!(r("1.0-patch1") > r("1.0"));
        assert!(r("1.0-patch1") < r("1.0.1"));
    }

    #[test]
    fn release_detection() {
        assert!(r("1.2.3").is_release());
        assert!(!r("1.2.3-RC1").is_release());
        assert!(r("1.2.3-RC1").is_milestone());
        assert!(!r("1.2.3-SNAPSHOT").is_milestone());
    }

    #[test]
    fn equal_weight_spellings_stay_distinct() {
        assert_ne!(r("1.0").cmp(&r("1.00")), Ordering::Equal);
        assert_ne!(r("1.0").cmp(&r("1.0-final")), Ordering::Equal);
    }

    #[test]
    fn parses_coordinates() {
        let mrid = ModuleRevision::parse("org.acme#lib;1.5").unwrap();
        assert_eq!(mrid.id, ModuleId::new("org.acme", "lib"));
        assert_eq!(mrid.revision, r("1.5"));
        assert_eq!(mrid.to_string(), "org.acme#lib;1.5");
        assert!(ModuleRevision::parse("org.acme#lib").is_err());
        assert!(ModuleId::parse("lib").is_err());
    }

    #[test]
    fn coordinates_that_leave_their_directory_are_refused() {
        for bad in ["..#lib;1.0", "org#../x;1.0", "org#lib;..", "a/b#lib;1.0", "org#li\\b;1.0", "org#.hidden;1.0"] {
            let err = ModuleRevision::parse(bad).unwrap_err();
            assert!(
                matches!(err, IvrError::MalformedDescriptor { .. }),
                "{bad}: {err:?}"
            );
        }
        assert!(ModuleRevision::new("..", "..", "escaped").check().is_err());
        assert!(ModuleRevision::parse("org.acme#lib-core;1.0-rc.1").is_ok());
    }

    fn revision_strategy() -> impl Strategy<Value = Revision> {
        "[0-9]{1,2}(\\.[0-9]{1,2}){0,2}(-(rc|beta|SNAPSHOT|patch)[0-9]?)?".prop_map(Revision::new)
    }

    proptest! {
        #[test]
        fn ordering_is_antisymmetric(a in revision_strategy(), b in revision_strategy()) {
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
            prop_assert_eq!(a.cmp(&b) == Ordering::Equal, a == b);
        }

        #[test]
        fn ordering_is_transitive(
            a in revision_strategy(),
            b in revision_strategy(),
            c in revision_strategy(),
        ) {
            let mut v = vec![a, b, c];
            v.sort();
            prop_assert!(v[0] <= v[1] && v[1] <= v[2] && v[0] <= v[2]);
        }
    }
}
