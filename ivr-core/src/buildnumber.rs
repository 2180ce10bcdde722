// ivr-core/src/buildnumber.rs
// Next build number of a module from the revisions already published.

use ivr_common::error::{IvrError, Result};
use ivr_common::model::module::check_coordinate;
use ivr_common::model::Revision;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildNumberOptions {
    /// Only revisions `<prefix>` or `<prefix><separator>...` count. Empty
    /// means every revision.
    pub prefix: String,
    /// Build number used when nothing is published yet.
    pub default_build_number: u64,
    pub separator: String,
}

impl Default for BuildNumberOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            default_build_number: 0,
            separator: ".".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildNumber {
    /// Highest published revision under the prefix.
    pub revision: Option<Revision>,
    pub build_number: Option<u64>,
    pub new_build_number: u64,
    pub new_revision: Revision,
}

/// Trailing run of ASCII digits: its start and value.
fn trailing_number(s: &str) -> Option<(usize, u64)> {
    let start = s
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    s[start..].parse().ok().map(|n| (start, n))
}

pub fn next_build_number(known: &[Revision], options: &BuildNumberOptions) -> Result<BuildNumber> {
    let prefix = options.prefix.as_str();
    let sep = options.separator.as_str();
    let under_prefix = |r: &&Revision| {
        prefix.is_empty()
            || r.as_str() == prefix
            || r.as_str()
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with(sep))
    };
    let latest = known.iter().filter(under_prefix).max().cloned();

    let number = latest.as_ref().and_then(|latest| {
        let s = latest.as_str();
        if prefix.is_empty() {
            trailing_number(s)
        } else {
            let rest = s.strip_prefix(prefix)?.strip_prefix(sep)?;
            let n = rest.parse().ok().filter(|_| rest.bytes().all(|b| b.is_ascii_digit()))?;
            Some((s.len() - rest.len(), n))
        }
    });
    let build_number = number.map(|(_, n)| n);
    let new_build_number = match build_number {
        Some(n) => n.checked_add(1).ok_or_else(|| {
            IvrError::Generic(format!("build number {n} cannot be incremented"))
        })?,
        None => options.default_build_number,
    };

    let new_revision = match (&latest, number) {
        (_, _) if !prefix.is_empty() => format!("{prefix}{sep}{new_build_number}"),
        (Some(latest), Some((start, _))) => format!("{}{new_build_number}", &latest.as_str()[..start]),
        (Some(latest), None) => format!("{latest}{sep}{new_build_number}"),
        (None, _) => new_build_number.to_string(),
    };
    check_coordinate("revision", &new_revision)?;

    Ok(BuildNumber {
        revision: latest,
        build_number,
        new_build_number,
        new_revision: Revision::new(new_revision),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn revisions(list: &[&str]) -> Vec<Revision> {
        list.iter().map(|r| Revision::new(*r)).collect()
    }

    fn with_prefix(prefix: &str) -> BuildNumberOptions {
        BuildNumberOptions {
            prefix: prefix.to_string(),
            ..BuildNumberOptions::default()
        }
    }

    #[test]
    fn increments_the_highest_build_under_the_prefix() {
        let known = revisions(&["1.2.3", "1.2.10", "1.20.1", "1.3.0"]);
        let next = next_build_number(&known, &with_prefix("1.2")).unwrap();
        assert_eq!(next.revision, Some(Revision::new("1.2.10")));
        assert_eq!(next.build_number, Some(10));
        assert_eq!(next.new_build_number, 11);
        assert_eq!(next.new_revision, Revision::new("1.2.11"));
    }

    #[test]
    fn without_a_prefix_the_last_number_is_bumped() {
        let known = revisions(&["1.0", "1.9", "1.10-rc1", "1.10"]);
        let next = next_build_number(&known, &BuildNumberOptions::default()).unwrap();
        assert_eq!(next.revision, Some(Revision::new("1.10")));
        assert_eq!(next.new_revision, Revision::new("1.11"));

        let named = next_build_number(&revisions(&["final"]), &BuildNumberOptions::default()).unwrap();
        assert_eq!(named.build_number, None);
        assert_eq!(named.new_revision, Revision::new("final.0"));
    }

    #[test]
    fn nothing_published_starts_at_the_default() {
        let options = BuildNumberOptions {
            prefix: "2.0".to_string(),
            default_build_number: 1,
            separator: "-".to_string(),
        };
        let next = next_build_number(&revisions(&["1.0-4"]), &options).unwrap();
        assert_eq!(next.revision, None);
        assert_eq!(next.new_revision, Revision::new("2.0-1"));
        let empty = next_build_number(&[], &BuildNumberOptions::default()).unwrap();
        assert_eq!(empty.new_revision, Revision::new("0"));
    }

    #[test]
    fn bare_prefix_revision_has_no_build_number() {
        let next = next_build_number(&revisions(&["1.2"]), &with_prefix("1.2")).unwrap();
        assert_eq!(next.revision, Some(Revision::new("1.2")));
        assert_eq!(next.build_number, None);
        assert_eq!(next.new_revision, Revision::new("1.2.0"));
    }

    #[test]
    fn unsafe_prefix_is_refused() {
        assert!(next_build_number(&[], &with_prefix("../1")).is_err());
    }
}
