//! The node-semver range grammar: comparators, X-ranges, tilde, caret,
//! hyphen ranges, and `||` unions, compiled into a `RequirementSet` and
//! evaluated against concrete versions.
//!
//! The grammar is reproduced in full in the crate's design notes; this
//! module implements the composition table directly rather than porting
//! the original prototype's tokenizer loop, which left tilde/caret
//! unimplemented and mishandled the bare hyphen token.

use std::fmt;
use std::str::FromStr;

use compact_str::{CompactString, ToCompactString};
use serde::{de, Deserialize, Serialize};

use crate::error::ResolveError;
use crate::version::{split_qualifier, Identifier, Version};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Eq => "=",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub op: Op,
    pub version: Version,
}

impl Requirement {
    fn new(op: Op, version: Version) -> Self {
        Self { op, version }
    }

    fn holds(&self, sv: &Version) -> bool {
        match self.op {
            Op::Lt => sv < &self.version,
            Op::Lte => sv <= &self.version,
            Op::Gt => sv > &self.version,
            Op::Gte => sv >= &self.version,
            Op::Eq => sv == &self.version,
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conjunction(pub Vec<Requirement>);

impl Conjunction {
    /// A version with a pre-release tag is rejected unless some comparator
    /// in this conjunction also carries a pre-release tag on the same
    /// `(major, minor, patch)` tuple. This is evaluated once per
    /// conjunction (not per-requirement): it is the rule that makes
    /// `^0.0.3-beta` admit `0.0.3-pr.2` even though the low-bound
    /// comparator alone wouldn't.
    fn holds(&self, sv: &Version) -> bool {
        if self.0.is_empty() {
            return true;
        }
        if sv.is_prerelease() {
            let admitted = self
                .0
                .iter()
                .any(|r| r.version.is_prerelease() && r.version.same_triple(sv));
            if !admitted {
                return false;
            }
        }
        self.0.iter().all(|r| r.holds(sv))
    }
}

impl fmt::Display for Conjunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", rendered.join(" "))
    }
}

/// A compiled range expression: a disjunction of conjunctions. An empty
/// set (zero conjunctions) accepts every version.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequirementSet(pub Vec<Conjunction>);

impl RequirementSet {
    pub fn satisfied_by(&self, sv: &Version) -> bool {
        if self.0.is_empty() {
            return true;
        }
        self.0.iter().any(|c| c.holds(sv))
    }
}

impl fmt::Display for RequirementSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", rendered.join(" || "))
    }
}

impl FromStr for RequirementSet {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_range_set(s)
    }
}

impl Serialize for RequirementSet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RequirementSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = CompactString::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// A single numeric slot of a partial version: a literal or a wildcard
/// (`x`, `X`, `*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comp {
    Num(u64),
    Wildcard,
}

impl Comp {
    fn value(self) -> u64 {
        match self {
            Comp::Num(n) => n,
            Comp::Wildcard => 0,
        }
    }

    fn is_wildcard(self) -> bool {
        matches!(self, Comp::Wildcard)
    }
}

/// A parsed (but not yet rounded) partial version, e.g. `1.2.x-beta`.
#[derive(Debug, Clone)]
struct RawPartial {
    major: Comp,
    minor: Option<Comp>,
    patch: Option<Comp>,
    pre: Option<Vec<Identifier>>,
    #[allow(dead_code)]
    build: Option<Vec<CompactString>>,
}

/// Fills missing or wildcard components with zero and drops build
/// metadata. Pre-release identifiers, if any, are kept.
fn parse_down(partial: &RawPartial) -> Version {
    Version {
        major: partial.major.value(),
        minor: partial.minor.map(Comp::value).unwrap_or(0),
        patch: partial.patch.map(Comp::value).unwrap_or(0),
        pre: partial.pre.clone().unwrap_or_default(),
        build: Vec::new(),
    }
}

/// Rounds a partial up to the version just past the widest unspecified
/// component, flagging whether rounding actually occurred.
fn parse_up(partial: &RawPartial) -> (Version, bool) {
    let minor_missing = partial.minor.is_none() || partial.minor.is_some_and(Comp::is_wildcard);
    if minor_missing {
        return (Version::new(partial.major.value() + 1, 0, 0), true);
    }
    let minor = partial.minor.unwrap().value();
    let patch_missing = partial.patch.is_none() || partial.patch.is_some_and(Comp::is_wildcard);
    if patch_missing {
        return (Version::new(partial.major.value(), minor + 1, 0), true);
    }
    let patch = partial.patch.unwrap().value();
    (
        Version {
            major: partial.major.value(),
            minor,
            patch,
            pre: partial.pre.clone().unwrap_or_default(),
            build: Vec::new(),
        },
        false,
    )
}

fn parse_comp(tok: &str) -> Result<Comp, CompactString> {
    if tok == "*" || tok.eq_ignore_ascii_case("x") {
        return Ok(Comp::Wildcard);
    }
    if !tok.is_empty() && tok.bytes().all(|b| b.is_ascii_digit()) {
        return tok
            .parse()
            .map(Comp::Num)
            .map_err(|_| format!("version component out of range: {tok:?}").to_compact_string());
    }
    Err(format!("invalid version component: {tok:?}").to_compact_string())
}

/// Splits the third dot-separated partial component (the patch slot)
/// from any attached `-pre+build` qualifier, which per the grammar can
/// only appear once all three numeric slots are present.
fn split_patch_and_qualifier(tok: &str) -> (&str, Option<&str>) {
    match tok.find(['-', '+']) {
        Some(idx) => (&tok[..idx], Some(&tok[idx..])),
        None => (tok, None),
    }
}

fn parse_qualifier(tail: &str) -> (Option<Vec<Identifier>>, Option<Vec<CompactString>>) {
    let (_, pre, build) = split_qualifier(tail);
    let pre = pre.map(|p| p.split('.').map(Identifier::parse).collect());
    let build = build.map(|b| b.split('.').map(|s| s.to_compact_string()).collect());
    (pre, build)
}

fn parse_partial(s: &str) -> Result<RawPartial, CompactString> {
    let stripped = s.strip_prefix('v').unwrap_or(s);
    if stripped.is_empty() {
        return Ok(RawPartial {
            major: Comp::Wildcard,
            minor: None,
            patch: None,
            pre: None,
            build: None,
        });
    }

    let mut comps = stripped.splitn(3, '.');
    let major = parse_comp(comps.next().unwrap())?;

    let minor = match comps.next() {
        None => None,
        Some(t) => Some(parse_comp(t)?),
    };

    let (patch, pre, build) = match comps.next() {
        None => (None, None, None),
        Some(t) => {
            let (xr, qualifier) = split_patch_and_qualifier(t);
            let patch = Some(parse_comp(xr)?);
            let (pre, build) = qualifier.map(parse_qualifier).unwrap_or((None, None));
            (patch, pre, build)
        }
    };

    Ok(RawPartial {
        major,
        minor,
        patch,
        pre,
        build,
    })
}

/// The ceiling of a caret range. Zero-major and zero-minor ranges shrink
/// the admitted window to the left-most non-zero component; once both are
/// zero the range falls back to the upper bound of the partial itself,
/// with its pre-release tag stripped (`^0.0.3-beta` must still admit
/// `0.0.3-pr.2`, which only the conjunction-level pre-release rule plus
/// this stripped-tag ceiling together allow).
fn caret_requirement(low: &Version, high: &Version, rounded: bool) -> Requirement {
    if low.major != 0 {
        Requirement::new(Op::Lt, Version::new(low.major + 1, 0, 0))
    } else if low.minor != 0 {
        Requirement::new(Op::Lt, Version::new(0, low.minor + 1, 0))
    } else {
        let op = if rounded { Op::Lt } else { Op::Lte };
        Requirement::new(op, high.without_prerelease())
    }
}

/// The ceiling of a tilde range: `parseUp(major)` if minor was never
/// given, else `parseUp(major.minor)`. Reusing `parse_up` on a partial
/// with patch (and pre/build) cleared gets both cases for free, since
/// `parse_up` already treats a missing/wildcard component as the thing to
/// round past.
fn tilde_requirement(partial: &RawPartial) -> Requirement {
    let restricted = RawPartial {
        major: partial.major,
        minor: partial.minor,
        patch: None,
        pre: None,
        build: None,
    };
    let (ceil, _rounded) = parse_up(&restricted);
    Requirement::new(Op::Lt, ceil)
}

#[derive(Debug, Clone, Copy)]
enum Prefix {
    None,
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    Caret,
    Tilde,
}

fn strip_prefix_operator(tok: &str) -> (Prefix, &str) {
    if let Some(rest) = tok.strip_prefix(">=") {
        (Prefix::Gte, rest)
    } else if let Some(rest) = tok.strip_prefix("<=") {
        (Prefix::Lte, rest)
    } else if let Some(rest) = tok.strip_prefix('>') {
        (Prefix::Gt, rest)
    } else if let Some(rest) = tok.strip_prefix('<') {
        (Prefix::Lt, rest)
    } else if let Some(rest) = tok.strip_prefix('=') {
        (Prefix::Eq, rest)
    } else if let Some(rest) = tok.strip_prefix('^') {
        (Prefix::Caret, rest)
    } else if let Some(rest) = tok.strip_prefix('~') {
        (Prefix::Tilde, rest)
    } else {
        (Prefix::None, tok)
    }
}

fn push_simple(current: &mut Vec<Requirement>, tok: &str) -> Result<(), CompactString> {
    let (prefix, rest) = strip_prefix_operator(tok);
    let partial = parse_partial(rest)?;
    let low = parse_down(&partial);
    let (high, rounded) = parse_up(&partial);

    match prefix {
        Prefix::Gt => current.push(Requirement::new(Op::Gt, low)),
        Prefix::Gte => current.push(Requirement::new(Op::Gte, low)),
        Prefix::Lt => current.push(Requirement::new(Op::Lt, low)),
        Prefix::Lte => current.push(Requirement::new(Op::Lte, low)),
        // `=` collapses to the bare-partial (X-range) path.
        Prefix::Eq | Prefix::None => {
            current.push(Requirement::new(Op::Gte, low));
            let op = if rounded { Op::Lt } else { Op::Lte };
            current.push(Requirement::new(op, high));
        }
        Prefix::Caret => {
            current.push(Requirement::new(Op::Gte, low.clone()));
            current.push(caret_requirement(&low, &high, rounded));
        }
        Prefix::Tilde => {
            current.push(Requirement::new(Op::Gte, low));
            current.push(tilde_requirement(&partial));
        }
    }
    Ok(())
}

fn parse_range_set_inner(input: &str) -> Result<RequirementSet, CompactString> {
    let tokens: Vec<&str> = input.split_whitespace().collect();
    let mut conjunctions = Vec::new();
    let mut current = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        let tok = tokens[i];

        if tok == "||" {
            conjunctions.push(Conjunction(std::mem::take(&mut current)));
            i += 1;
            continue;
        }
        if tok.is_empty() || tok == "*" {
            i += 1;
            continue;
        }

        if i + 2 < tokens.len() && tokens[i + 1] == "-" {
            let low_partial = parse_partial(tok)?;
            let high_partial = parse_partial(tokens[i + 2])?;
            let low = parse_down(&low_partial);
            let (high, rounded) = parse_up(&high_partial);
            current.push(Requirement::new(Op::Gte, low));
            let op = if rounded { Op::Lt } else { Op::Lte };
            current.push(Requirement::new(op, high));
            i += 3;
            continue;
        }

        push_simple(&mut current, tok)?;
        i += 1;
    }
    conjunctions.push(Conjunction(current));

    Ok(RequirementSet(conjunctions))
}

pub fn parse_range_set(input: &str) -> Result<RequirementSet, ResolveError> {
    parse_range_set_inner(input)
        .map_err(|reason| ResolveError::InvalidRange(input.to_compact_string(), reason))
}

/// Exposed for testing against the composition table directly (see
/// the seed scenario fixing `parseDown`/`parseUp` on `"1.x"` and `""`).
pub fn parse_down_str(partial: &str) -> Result<Version, ResolveError> {
    parse_partial(partial)
        .map(|p| parse_down(&p))
        .map_err(|reason| ResolveError::InvalidRange(partial.to_compact_string(), reason))
}

pub fn parse_up_str(partial: &str) -> Result<(Version, bool), ResolveError> {
    parse_partial(partial)
        .map(|p| parse_up(&p))
        .map_err(|reason| ResolveError::InvalidRange(partial.to_compact_string(), reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    fn accepts(range: &str, version: &str) -> bool {
        parse_range_set(range).unwrap().satisfied_by(&v(version))
    }

    #[test]
    fn parse_down_up_seed_scenario() {
        assert_eq!(parse_down_str("1.x").unwrap(), Version::new(1, 0, 0));
        let (up, rounded) = parse_up_str("1.x").unwrap();
        assert_eq!(up, Version::new(2, 0, 0));
        assert!(rounded);
        assert_eq!(parse_down_str("").unwrap(), Version::new(0, 0, 0));
    }

    #[test]
    fn scenario_gte() {
        assert!(accepts(">=1.2.7", "1.2.7"));
        assert!(accepts(">=1.2.7", "1.2.8"));
        assert!(accepts(">=1.2.7", "2.5.3"));
        assert!(accepts(">=1.2.7", "1.3.9"));
        assert!(!accepts(">=1.2.7", "1.2.6"));
        assert!(!accepts(">=1.2.7", "1.1.0"));
    }

    #[test]
    fn scenario_union() {
        let r = "1.2.7 || >=1.2.9 <2.0.0";
        assert!(accepts(r, "1.2.7"));
        assert!(accepts(r, "1.2.9"));
        assert!(accepts(r, "1.4.6"));
        assert!(!accepts(r, "1.2.8"));
        assert!(!accepts(r, "2.0.0"));
    }

    #[test]
    fn scenario_prerelease_exclusion() {
        let r = ">1.2.3-alpha.3";
        assert!(accepts(r, "1.2.3-alpha.7"));
        assert!(accepts(r, "3.4.5"));
        assert!(!accepts(r, "3.4.5-alpha.9"));
    }

    #[test]
    fn scenario_hyphen_range() {
        let r = "1.2 - 2.3.4";
        assert!(accepts(r, "1.2.0"));
        assert!(accepts(r, "1.2.3"));
        assert!(accepts(r, "2.0.0"));
        assert!(accepts(r, "2.3.4"));
        assert!(!accepts(r, "2.0.0-alpha"));
        assert!(!accepts(r, "2.3.5"));
        assert!(!accepts(r, "3.0.0"));
    }

    #[test]
    fn scenario_hyphen_range_rounds_upper_partial() {
        let set = parse_range_set("1.2 - 2").unwrap();
        assert_eq!(set.to_string(), ">=1.2.0 <3.0.0");
    }

    #[test]
    fn scenario_caret() {
        let r = "^0.2.3";
        assert!(accepts(r, "0.2.3"));
        assert!(accepts(r, "0.2.4"));
        assert!(accepts(r, "0.2.9"));
        assert!(!accepts(r, "0.3.0"));
        assert!(!accepts(r, "1.2.4-alpha"));
        assert!(!accepts(r, "2.0.0"));
    }

    #[test]
    fn scenario_tilde() {
        let r = "~1.2.3";
        assert!(accepts(r, "1.2.3"));
        assert!(accepts(r, "1.2.4"));
        assert!(accepts(r, "1.2.99"));
        assert!(!accepts(r, "1.3.0"));
        assert!(!accepts(r, "1.2.3-alpha"));
    }

    #[test]
    fn caret_zero_zero_pins_exact_release() {
        assert!(accepts("^0.0.3", "0.0.3"));
        assert!(!accepts("^0.0.3", "0.0.4"));
        assert!(!accepts("^0.0.3", "0.0.3-beta"));
    }

    #[test]
    fn caret_zero_zero_prerelease_admits_sibling_prereleases() {
        let r = "^0.0.3-beta";
        assert!(accepts(r, "0.0.3"));
        assert!(accepts(r, "0.0.3-beta"));
        assert!(accepts(r, "0.0.3-pr.2"));
        assert!(!accepts(r, "0.0.4"));
    }

    #[test]
    fn empty_range_accepts_everything() {
        let set = parse_range_set("").unwrap();
        assert!(set.satisfied_by(&v("0.0.0")));
        assert!(set.satisfied_by(&v("99.99.99")));
        assert!(set.satisfied_by(&v("1.0.0-alpha")));
    }

    #[test]
    fn bare_wildcard_token_also_accepts_everything() {
        let set = parse_range_set("*").unwrap();
        assert!(set.satisfied_by(&v("1.2.3-alpha")));
    }

    #[test]
    fn display_round_trips_through_parse() {
        let set = parse_range_set(">=1.2.9 <2.0.0").unwrap();
        let rendered = set.to_string();
        let reparsed = parse_range_set(&rendered).unwrap();
        assert_eq!(set, reparsed);
    }

    #[test]
    fn invalid_range_reports_offending_substring() {
        let err = parse_range_set("not-a-range").unwrap_err();
        match err {
            ResolveError::InvalidRange(expr, _) => assert_eq!(expr, "not-a-range"),
            other => panic!("unexpected error variant: {other:?}"),
        }
    }
}
