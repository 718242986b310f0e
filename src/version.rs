//! The `MAJOR.MINOR.PATCH[-PRE][+BUILD]` tuple and its total order.
//!
//! Ordering follows semver 2.0.0: `BUILD` never participates, pre-release
//! identifiers compare component-wise (numeric < alphanumeric, numeric
//! identifiers compare numerically, alphanumeric lexically), and a version
//! without a pre-release outranks one with the same major/minor/patch that
//! has one.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use compact_str::{CompactString, ToCompactString};
use serde::{de, Deserialize, Serialize};

use crate::error::ResolveError;

#[derive(Debug, Clone, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Vec<Identifier>,
    pub build: Vec<CompactString>,
}

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum Identifier {
    Numeric(u64),
    AlphaNumeric(CompactString),
}

impl Identifier {
    pub(crate) fn parse(s: &str) -> Identifier {
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = s.parse() {
                return Identifier::Numeric(n);
            }
        }
        Identifier::AlphaNumeric(s.to_compact_string())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Numeric(n) => write!(f, "{n}"),
            Identifier::AlphaNumeric(s) => write!(f, "{s}"),
        }
    }
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: Vec::new(),
            build: Vec::new(),
        }
    }

    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }

    /// Whether `self` and `other` share the same `(major, minor, patch)`.
    pub fn same_triple(&self, other: &Version) -> bool {
        (self.major, self.minor, self.patch) == (other.major, other.minor, other.patch)
    }

    /// `self` with the pre-release tag (but not major/minor/patch/build)
    /// cleared. Used by the caret range's zero-major/zero-minor ceiling.
    pub fn without_prerelease(&self) -> Version {
        Version {
            pre: Vec::new(),
            ..self.clone()
        }
    }
}

impl FromStr for Version {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_version(s).ok_or_else(|| ResolveError::InvalidVersion(s.to_compact_string()))
    }
}

fn parse_version(s: &str) -> Option<Version> {
    let s = s.strip_prefix('v').unwrap_or(s);

    let (numeric, pre, build) = split_qualifier(s);

    let mut parts = numeric.splitn(3, '.');
    let major = parts.next()?;
    let minor = parts.next()?;
    let patch = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let major = parse_numeric_component(major)?;
    let minor = parse_numeric_component(minor)?;
    let patch = parse_numeric_component(patch)?;

    let pre = pre
        .map(|p| p.split('.').map(Identifier::parse).collect())
        .unwrap_or_default();
    let build = build
        .map(|b| b.split('.').map(|s| s.to_compact_string()).collect())
        .unwrap_or_default();

    Some(Version {
        major,
        minor,
        patch,
        pre,
        build,
    })
}

fn parse_numeric_component(s: &str) -> Option<u64> {
    if s.is_empty() || (s.len() > 1 && s.starts_with('0')) {
        return None;
    }
    s.parse().ok()
}

/// Splits `major.minor.patch-pre+build` into its numeric part and the
/// optional pre-release/build suffixes. A `-` before the first `+` starts
/// the pre-release; a `+` starts the build, whichever comes first.
pub(crate) fn split_qualifier(s: &str) -> (&str, Option<&str>, Option<&str>) {
    let dash = s.find('-');
    let plus = s.find('+');
    match (dash, plus) {
        (None, None) => (s, None, None),
        (Some(d), None) => (&s[..d], Some(&s[d + 1..]), None),
        (None, Some(p)) => (&s[..p], None, Some(&s[p + 1..])),
        (Some(d), Some(p)) if d < p => (&s[..d], Some(&s[d + 1..p]), Some(&s[p + 1..])),
        (Some(_), Some(p)) => (&s[..p], None, Some(&s[p + 1..])),
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.pre.is_empty() {
            write!(f, "-")?;
            for (i, id) in self.pre.iter().enumerate() {
                if i > 0 {
                    write!(f, ".")?;
                }
                write!(f, "{id}")?;
            }
        }
        if !self.build.is_empty() {
            write!(f, "+{}", self.build.join("."))?;
        }
        Ok(())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.same_triple(other) && self.pre == other.pre
    }
}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
        self.patch.hash(state);
        self.pre.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| compare_prerelease(&self.pre, &other.pre))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn compare_prerelease(a: &[Identifier], b: &[Identifier]) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => Ordering::Equal,
        // No pre-release outranks having one, for the same major.minor.patch.
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            for (x, y) in a.iter().zip(b.iter()) {
                let c = x.cmp(y);
                if c != Ordering::Equal {
                    return c;
                }
            }
            a.len().cmp(&b.len())
        }
    }
}

impl Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = CompactString::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
