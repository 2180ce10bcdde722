// ivr-common/src/model/version.rs
// Version constraints: static revisions, ranges, prefixes and latest.* markers.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::module::Revision;
use crate::error::{IvrError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Bound {
    Unbounded,
    Inclusive(Revision),
    Exclusive(Revision),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LatestStatus {
    Integration,
    Milestone,
    Release,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionConstraint {
    Exact(Revision),
    Range { lower: Bound, upper: Bound },
    /// `1.+` style: any revision starting with the prefix.
    Prefix(String),
    Latest(LatestStatus),
}

impl VersionConstraint {
    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim();
        if s.is_empty() {
            return Err(IvrError::Config("empty version constraint".to_string()));
        }

        if let Some(status) = s.strip_prefix("latest.") {
            let status = match status {
                "integration" => LatestStatus::Integration,
                "milestone" => LatestStatus::Milestone,
                "release" => LatestStatus::Release,
                other => {
                    return Err(IvrError::Config(format!(
                        "unknown latest status '{other}' in '{s}'"
                    )))
                }
            };
            return Ok(Self::Latest(status));
        }

        if s == "+" {
            return Ok(Self::Prefix(String::new()));
        }
        if let Some(prefix) = s.strip_suffix('+') {
            if prefix.contains(['[', ']', '(', ')', ',']) {
                return Err(IvrError::Config(format!("invalid prefix constraint '{s}'")));
            }
            return Ok(Self::Prefix(prefix.to_string()));
        }

        let first = s.chars().next().unwrap_or_default();
        let last = s.chars().next_back().unwrap_or_default();
        let opens = matches!(first, '[' | '(' | ']');
        let closes = matches!(last, ']' | ')' | '[');
        if opens || closes {
            if !(opens && closes) || s.len() < 2 {
                return Err(IvrError::Config(format!("unbalanced version range '{s}'")));
            }
            return Self::parse_range(s, first, last);
        }

        if s.contains([',', ' ', '\t']) {
            return Err(IvrError::Config(format!("invalid revision '{s}'")));
        }
        Ok(Self::Exact(Revision::new(s)))
    }

    fn parse_range(s: &str, first: char, last: char) -> Result<Self> {
        let inner = &s[1..s.len() - 1];
        let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
        let bound = |value: &str, inclusive: bool| {
            if value.is_empty() {
                Bound::Unbounded
            } else if inclusive {
                Bound::Inclusive(Revision::new(value))
            } else {
                Bound::Exclusive(Revision::new(value))
            }
        };
        match parts.as_slice() {
            [single] if first == '[' && last == ']' && !single.is_empty() => Ok(Self::Range {
                lower: Bound::Inclusive(Revision::new(*single)),
                upper: Bound::Inclusive(Revision::new(*single)),
            }),
            [lower, upper] => {
                let lower = bound(lower, first == '[');
                let upper = bound(upper, last == ']');
                if let (
                    Bound::Inclusive(l) | Bound::Exclusive(l),
                    Bound::Inclusive(u) | Bound::Exclusive(u),
                ) = (&lower, &upper)
                {
                    if l > u {
                        return Err(IvrError::Config(format!(
                            "version range '{s}' has lower bound above upper bound"
                        )));
                    }
                }
                Ok(Self::Range { lower, upper })
            }
            _ => Err(IvrError::Config(format!("invalid version range '{s}'"))),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        !matches!(self, Self::Exact(_))
    }

    pub fn matches(&self, revision: &Revision) -> bool {
        match self {
            Self::Exact(r) => r == revision,
            Self::Range { lower, upper } => {
                let above = match lower {
                    Bound::Unbounded => true,
                    Bound::Inclusive(l) => revision >= l,
                    Bound::Exclusive(l) => revision > l,
                };
                let below = match upper {
                    Bound::Unbounded => true,
                    Bound::Inclusive(u) => revision <= u,
                    Bound::Exclusive(u) => revision < u,
                };
                above && below
            }
            Self::Prefix(prefix) => revision.as_str().starts_with(prefix.as_str()),
            Self::Latest(LatestStatus::Integration) => true,
            Self::Latest(LatestStatus::Milestone) => revision.is_milestone(),
            Self::Latest(LatestStatus::Release) => revision.is_release(),
        }
    }

    /// Highest known revision satisfying the constraint.
    pub fn best_match<'a, I>(&self, known: I) -> Option<Revision>
    where
        I: IntoIterator<Item = &'a Revision>,
    {
        known.into_iter().filter(|r| self.matches(r)).max().cloned()
    }

    /// The pinned revision of a static constraint.
    pub fn exact(&self) -> Option<&Revision> {
        match self {
            Self::Exact(r) => Some(r),
            _ => None,
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(r) => write!(f, "{r}"),
            Self::Range { lower, upper } => {
                match lower {
                    Bound::Unbounded => write!(f, "(,")?,
                    Bound::Inclusive(r) => write!(f, "[{r},")?,
                    Bound::Exclusive(r) => write!(f, "({r},")?,
                }
                match upper {
                    Bound::Unbounded => write!(f, ")"),
                    Bound::Inclusive(r) => write!(f, "{r}]"),
                    Bound::Exclusive(r) => write!(f, "{r})"),
                }
            }
            Self::Prefix(p) => write!(f, "{p}+"),
            Self::Latest(LatestStatus::Integration) => write!(f, "latest.integration"),
            Self::Latest(LatestStatus::Milestone) => write!(f, "latest.milestone"),
            Self::Latest(LatestStatus::Release) => write!(f, "latest.release"),
        }
    }
}

impl Serialize for VersionConstraint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionConstraint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        VersionConstraint::parse(&s).map_err(serde::de::Error::custom)
    }
}
