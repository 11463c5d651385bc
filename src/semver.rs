//! Semantic version parsing and range matching.
//!
//! Ranges follow the comparator-set grammar package descriptors use:
//! `||`-separated sets of whitespace-separated comparators, with `^`, `~`,
//! hyphen ranges and `x`/`*` wildcard segments desugared into primitive
//! `<`, `<=`, `>`, `>=`, `=` comparators.

use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Errors that can occur during semver parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SemverError {
    /// Invalid version format
    #[error("Invalid version format: {0}")]
    InvalidVersion(String),

    /// Invalid range format
    #[error("Invalid range format: {0}")]
    InvalidRange(String),

    /// Invalid pre-release tag
    #[error("Invalid pre-release tag: {0}")]
    InvalidPrerelease(String),
}

/// One dot-separated pre-release identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Numeric(u64),
    AlphaNumeric(String),
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Identifier::Numeric(a), Identifier::Numeric(b)) => a.cmp(b),
            (Identifier::Numeric(_), Identifier::AlphaNumeric(_)) => Ordering::Less,
            (Identifier::AlphaNumeric(_), Identifier::Numeric(_)) => Ordering::Greater,
            (Identifier::AlphaNumeric(a), Identifier::AlphaNumeric(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
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

/// Semantic version (MAJOR.MINOR.PATCH[-PRERELEASE][+BUILD])
#[derive(Debug, Clone, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Vec<Identifier>,
    pub build: Option<String>,
}

impl Version {
    /// Parse a version string
    pub fn parse(s: &str) -> Result<Self, SemverError> {
        let trimmed = s.trim();
        let text = trimmed
            .strip_prefix('=')
            .unwrap_or(trimmed)
            .trim_start()
            .trim_start_matches('v');

        let (version_part, build) = match text.split_once('+') {
            Some((v, b)) => (v, Some(b.to_string())),
            None => (text, None),
        };
        let (core, prerelease) = match version_part.split_once('-') {
            Some((v, p)) => (v, parse_prerelease(p)?),
            None => (version_part, Vec::new()),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            return Err(SemverError::InvalidVersion(format!(
                "Expected MAJOR.MINOR.PATCH, got '{trimmed}'"
            )));
        }
        let number = |part: &str, label: &str| {
            parse_segment(part).ok_or_else(|| {
                SemverError::InvalidVersion(format!("Invalid {label} version: '{part}'"))
            })
        };

        Ok(Version {
            major: number(parts[0], "major")?,
            minor: number(parts[1], "minor")?,
            patch: number(parts[2], "patch")?,
            prerelease,
            build,
        })
    }

    /// Create a new version
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version {
            major,
            minor,
            patch,
            prerelease: Vec::new(),
            build: None,
        }
    }

    /// Check if this is a prerelease version
    pub fn is_prerelease(&self) -> bool {
        !self.prerelease.is_empty()
    }

    fn same_release(&self, other: &Version) -> bool {
        self.major == other.major && self.minor == other.minor && self.patch == other.patch
    }

    /// Lowest prerelease of a release tuple, used as an exclusive upper bound
    /// so that prereleases of the next release do not slip into a range.
    fn floor(major: u64, minor: u64, patch: u64) -> Self {
        Version {
            prerelease: vec![Identifier::Numeric(0)],
            ..Version::new(major, minor, patch)
        }
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
        self.patch.hash(state);
        self.prerelease.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| {
                // A version with a prerelease sorts before the release itself.
                match (self.prerelease.is_empty(), other.prerelease.is_empty()) {
                    (true, true) => Ordering::Equal,
                    (false, true) => Ordering::Less,
                    (true, false) => Ordering::Greater,
                    (false, false) => self.prerelease.cmp(&other.prerelease),
                }
            })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.prerelease.is_empty() {
            let pre: Vec<String> = self.prerelease.iter().map(|i| i.to_string()).collect();
            write!(f, "-{}", pre.join("."))?;
        }
        if let Some(ref build) = self.build {
            write!(f, "+{build}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Version {
    type Err = SemverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

/// Compare two version strings.
pub fn compare(v1: &str, v2: &str) -> Result<Ordering, SemverError> {
    Ok(Version::parse(v1)?.cmp(&Version::parse(v2)?))
}

/// Parse `version` and `range` and check whether the version satisfies it.
pub fn satisfies(version: &str, range: &str) -> Result<bool, SemverError> {
    Ok(Range::parse(range)?.satisfies(&Version::parse(version)?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

/// Primitive comparator produced by desugaring range syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparator {
    pub op: Op,
    pub version: Version,
    /// Exclusive upper bound added by desugaring rather than written out.
    pub implied: bool,
}

impl Comparator {
    fn new(op: Op, version: Version) -> Self {
        Self {
            op,
            version,
            implied: false,
        }
    }

    /// `<MAJOR.MINOR.PATCH-0`, the bound closing a caret, tilde or
    /// wildcard range.
    fn below(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            op: Op::Lt,
            version: Version::floor(major, minor, patch),
            implied: true,
        }
    }

    pub fn test(&self, version: &Version) -> bool {
        let ord = version.cmp(&self.version);
        match self.op {
            Op::Lt => ord == Ordering::Less,
            Op::Le => ord != Ordering::Greater,
            Op::Gt => ord == Ordering::Greater,
            Op::Ge => ord != Ordering::Less,
            Op::Eq => ord == Ordering::Equal,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Eq => "",
        };
        write!(f, "{op}{}", self.version)
    }
}

/// A parsed version range: a disjunction of comparator sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    raw: String,
    sets: Vec<Vec<Comparator>>,
}

impl Range {
    /// Parse a range string. An empty string is equivalent to `*`.
    pub fn parse(text: &str) -> Result<Self, SemverError> {
        let mut sets = Vec::new();
        for alternative in text.split("||") {
            sets.push(parse_comparator_set(alternative.trim()).map_err(|e| match e {
                SemverError::InvalidRange(_) => e,
                other => SemverError::InvalidRange(format!("'{}': {other}", text.trim())),
            })?);
        }
        Ok(Self {
            raw: text.trim().to_string(),
            sets,
        })
    }

    /// Range accepting every release version.
    pub fn any() -> Self {
        Self {
            raw: "*".to_string(),
            sets: vec![Vec::new()],
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn comparator_sets(&self) -> &[Vec<Comparator>] {
        &self.sets
    }

    /// Check if a version satisfies this range.
    ///
    /// Prerelease versions only match a set that names a prerelease of the
    /// same `MAJOR.MINOR.PATCH` tuple.
    pub fn satisfies(&self, version: &Version) -> bool {
        self.sets.iter().any(|set| {
            if !set.iter().all(|c| c.test(version)) {
                return false;
            }
            if !version.is_prerelease() {
                return true;
            }
            set.iter()
                .any(|c| !c.implied && c.version.is_prerelease() && c.version.same_release(version))
        })
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl std::str::FromStr for Range {
    type Err = SemverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Range::parse(s)
    }
}

/// Version with optional (wildcard or omitted) segments.
#[derive(Debug, Clone)]
struct Partial {
    major: Option<u64>,
    minor: Option<u64>,
    patch: Option<u64>,
    prerelease: Vec<Identifier>,
}

impl Partial {
    fn parse(text: &str) -> Result<Self, SemverError> {
        let text = text.trim_start_matches(['v', '=']);
        if text.is_empty() {
            return Err(SemverError::InvalidRange("missing version".to_string()));
        }
        let text = text.split_once('+').map_or(text, |(v, _)| v);
        let (core, prerelease) = match text.split_once('-') {
            Some((v, p)) => (v, parse_prerelease(p)?),
            None => (text, Vec::new()),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() > 3 {
            return Err(SemverError::InvalidRange(format!(
                "too many version segments in '{text}'"
            )));
        }
        let mut segments = [None; 3];
        let mut wildcard_seen = false;
        for (i, part) in parts.iter().enumerate() {
            if matches!(*part, "x" | "X" | "*") {
                wildcard_seen = true;
                continue;
            }
            if wildcard_seen {
                return Err(SemverError::InvalidRange(format!(
                    "numeric segment after wildcard in '{text}'"
                )));
            }
            segments[i] = Some(parse_segment(part).ok_or_else(|| {
                SemverError::InvalidRange(format!("invalid version segment '{part}' in '{text}'"))
            })?);
        }

        Ok(Self {
            major: segments[0],
            minor: segments[1],
            patch: segments[2],
            prerelease,
        })
    }

    fn is_any(&self) -> bool {
        self.major.is_none()
    }

    /// Fill missing segments with zero.
    fn lower(&self) -> Version {
        Version {
            prerelease: self.prerelease.clone(),
            ..Version::new(
                self.major.unwrap_or(0),
                self.minor.unwrap_or(0),
                self.patch.unwrap_or(0),
            )
        }
    }

    fn full(&self) -> Option<Version> {
        self.patch.map(|_| self.lower())
    }
}

/// Largest accepted `MAJOR`, `MINOR` or `PATCH` segment, matching the
/// integer range package tooling supports.
pub const MAX_SEGMENT: u64 = (1 << 53) - 1;

fn parse_number(part: &str) -> Option<u64> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

fn parse_segment(part: &str) -> Option<u64> {
    parse_number(part).filter(|n| *n <= MAX_SEGMENT)
}

fn parse_prerelease(text: &str) -> Result<Vec<Identifier>, SemverError> {
    text.split('.')
        .map(|id| {
            if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                Err(SemverError::InvalidPrerelease(text.to_string()))
            } else if let Some(n) = parse_number(id) {
                Ok(Identifier::Numeric(n))
            } else {
                Ok(Identifier::AlphaNumeric(id.to_string()))
            }
        })
        .collect()
}

fn parse_comparator_set(text: &str) -> Result<Vec<Comparator>, SemverError> {
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let tokens = tokenize(text);
    if let Some(pos) = tokens.iter().position(|t| t == "-") {
        if pos != 1 || tokens.len() != 3 {
            return Err(SemverError::InvalidRange(format!(
                "malformed hyphen range '{text}'"
            )));
        }
        return hyphen_range(&tokens[0], &tokens[2]);
    }

    let mut comparators = Vec::new();
    for token in &tokens {
        comparators.extend(desugar(token)?);
    }
    Ok(comparators)
}

/// Split on whitespace, attaching operators separated from their version
/// (`>= 1.2.3`) back onto it.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut pending_op: Option<String> = None;
    for word in text.split_whitespace() {
        if matches!(word, ">" | ">=" | "<" | "<=" | "=" | "^" | "~" | "~>") {
            pending_op = Some(word.to_string());
            continue;
        }
        match pending_op.take() {
            Some(op) => tokens.push(format!("{op}{word}")),
            None => tokens.push(word.to_string()),
        }
    }
    if let Some(op) = pending_op {
        tokens.push(op);
    }
    tokens
}

fn hyphen_range(from: &str, to: &str) -> Result<Vec<Comparator>, SemverError> {
    let from = Partial::parse(from)?;
    let to = Partial::parse(to)?;
    let mut comparators = Vec::new();
    if !from.is_any() {
        comparators.push(Comparator::new(Op::Ge, from.lower()));
    }
    match (to.major, to.minor, to.patch) {
        (None, _, _) => {}
        (Some(major), None, _) => {
            comparators.push(Comparator::below(major + 1, 0, 0))
        }
        (Some(major), Some(minor), None) => {
            comparators.push(Comparator::below(major, minor + 1, 0))
        }
        (Some(_), Some(_), Some(_)) => comparators.push(Comparator::new(Op::Le, to.lower())),
    }
    Ok(comparators)
}

fn desugar(token: &str) -> Result<Vec<Comparator>, SemverError> {
    let (op, rest) = split_operator(token);
    let partial = Partial::parse(rest)?;
    match op {
        "^" => Ok(caret(&partial)),
        "~" | "~>" => Ok(tilde(&partial)),
        "" | "=" => Ok(x_range(&partial)),
        ">" => Ok(greater(&partial)),
        ">=" => Ok(if partial.is_any() {
            Vec::new()
        } else {
            vec![Comparator::new(Op::Ge, partial.lower())]
        }),
        "<" => Ok(vec![if partial.is_any() {
            Comparator::below(0, 0, 0)
        } else if partial.patch.is_none() {
            Comparator::below(partial.major.unwrap_or(0), partial.minor.unwrap_or(0), 0)
        } else {
            Comparator::new(Op::Lt, partial.lower())
        }]),
        "<=" => Ok(less_or_equal(&partial)),
        other => Err(SemverError::InvalidRange(format!("unknown operator '{other}'"))),
    }
}

fn split_operator(token: &str) -> (&str, &str) {
    for op in [">=", "<=", "~>", ">", "<", "=", "^", "~"] {
        if let Some(rest) = token.strip_prefix(op) {
            return (op, rest.trim());
        }
    }
    ("", token)
}

fn caret(p: &Partial) -> Vec<Comparator> {
    let Some(major) = p.major else {
        return Vec::new();
    };
    let lower = Comparator::new(Op::Ge, p.lower());
    let upper = match (p.minor, p.patch) {
        (None, _) => Comparator::below(major + 1, 0, 0),
        (Some(minor), None) if major == 0 => Comparator::below(0, minor + 1, 0),
        (Some(_), None) => Comparator::below(major + 1, 0, 0),
        (Some(minor), Some(patch)) => {
            if major > 0 {
                Comparator::below(major + 1, 0, 0)
            } else if minor > 0 {
                Comparator::below(0, minor + 1, 0)
            } else {
                Comparator::below(0, 0, patch + 1)
            }
        }
    };
    vec![lower, upper]
}

fn tilde(p: &Partial) -> Vec<Comparator> {
    let Some(major) = p.major else {
        return Vec::new();
    };
    let upper = match p.minor {
        None => Comparator::below(major + 1, 0, 0),
        Some(minor) => Comparator::below(major, minor + 1, 0),
    };
    vec![Comparator::new(Op::Ge, p.lower()), upper]
}

fn x_range(p: &Partial) -> Vec<Comparator> {
    match (p.major, p.minor) {
        (None, _) => Vec::new(),
        (Some(major), None) => vec![
            Comparator::new(Op::Ge, Version::new(major, 0, 0)),
            Comparator::below(major + 1, 0, 0),
        ],
        (Some(major), Some(minor)) => match p.full() {
            Some(version) => vec![Comparator::new(Op::Eq, version)],
            None => vec![
                Comparator::new(Op::Ge, Version::new(major, minor, 0)),
                Comparator::below(major, minor + 1, 0),
            ],
        },
    }
}

fn greater(p: &Partial) -> Vec<Comparator> {
    match (p.major, p.minor) {
        // `>*` can never be satisfied.
        (None, _) => vec![Comparator::below(0, 0, 0)],
        (Some(major), None) => vec![Comparator::new(Op::Ge, Version::new(major + 1, 0, 0))],
        (Some(major), Some(minor)) => match p.full() {
            Some(version) => vec![Comparator::new(Op::Gt, version)],
            None => vec![Comparator::new(Op::Ge, Version::new(major, minor + 1, 0))],
        },
    }
}

fn less_or_equal(p: &Partial) -> Vec<Comparator> {
    match (p.major, p.minor) {
        (None, _) => Vec::new(),
        (Some(major), None) => vec![Comparator::below(major + 1, 0, 0)],
        (Some(major), Some(minor)) => match p.full() {
            Some(version) => vec![Comparator::new(Op::Le, version)],
            None => vec![Comparator::below(major, minor + 1, 0)],
        },
    }
}
