//! Version selectors as written in a manifest's dependency table.
//!
//! Full range resolution belongs to the resolver. The store only needs to
//! answer one question cheaply: does a version it already knows about still
//! satisfy what the manifest asks for?

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What a wanted dependency asks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum VersionSelector {
    /// A version, range or dist-tag (`1.3.0`, `^1.0.0`, `latest`).
    Spec(String),
    /// A `file:` or `link:` reference to a directory on disk.
    Local(PathBuf),
}

impl VersionSelector {
    /// Parse a raw selector, recognising `file:` and `link:` prefixes.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(path) = raw
            .strip_prefix("link:")
            .or_else(|| raw.strip_prefix("file:"))
        {
            return Self::Local(PathBuf::from(path));
        }
        Self::Spec(raw.to_string())
    }

    /// The raw spec string, or `None` for local paths.
    pub fn spec(&self) -> Option<&str> {
        match self {
            Self::Spec(s) => Some(s),
            Self::Local(_) => None,
        }
    }

    /// Whether `version` satisfies this selector.
    ///
    /// Ranges are read the way npm reads them, not Cargo: an exact version
    /// only matches itself, a partial version is an x-range (`1.2` is
    /// `>=1.2.0 <1.3.0`), comparators are separated by spaces, and `||`
    /// separates alternatives. Tags, unparsable ranges and local paths never
    /// match, which makes callers fall back to a real resolution.
    pub fn is_satisfied_by(&self, version: &str) -> bool {
        let Self::Spec(spec) = self else {
            return false;
        };
        let Ok(version) = semver::Version::parse(version) else {
            return false;
        };
        let spec = spec.trim();
        if spec.is_empty() || spec == "*" {
            return version.pre.is_empty();
        }
        if let Ok(exact) = semver::Version::parse(spec.trim_start_matches(['=', 'v'])) {
            return exact == version;
        }
        npm_range(spec).is_some_and(|sets| sets.iter().any(|req| req.matches(&version)))
    }

    /// Whether this selector is a dist-tag rather than a version or range.
    pub fn is_tag(&self) -> bool {
        match self {
            Self::Spec(spec) => {
                let spec = spec.trim();
                !spec.is_empty()
                    && spec != "*"
                    && semver::Version::parse(spec.trim_start_matches(['=', 'v'])).is_err()
                    && npm_range(spec).is_none()
            }
            Self::Local(_) => false,
        }
    }
}

/// One requirement per `||` alternative, or `None` if any fails to parse.
fn npm_range(spec: &str) -> Option<Vec<semver::VersionReq>> {
    spec.split("||")
        .map(|set| semver::VersionReq::parse(&comparator_set(set)?).ok())
        .collect()
}

/// Rewrite one space-separated npm comparator set in Cargo's comma syntax.
fn comparator_set(set: &str) -> Option<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut operator = String::new();
    for token in set.split_whitespace() {
        // `>= 1.2.0` is one comparator.
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            operator.push_str(token);
            continue;
        }
        tokens.push(format!("{}{token}", std::mem::take(&mut operator)));
    }
    if !operator.is_empty() {
        return None;
    }

    match tokens.as_slice() {
        [] => Some("*".to_string()),
        [low, dash, high] if dash == "-" => {
            let low = numeric_parts(low)?;
            let floor = format!(
                "{}.{}.{}",
                low[0],
                low.get(1).unwrap_or(&0),
                low.get(2).unwrap_or(&0)
            );
            Some(format!(">={floor}, {}", upper_bound(high)?))
        }
        _ => {
            let comparators: Option<Vec<String>> = tokens.iter().map(|t| comparator(t)).collect();
            Some(comparators?.join(", "))
        }
    }
}

/// A single npm comparator in Cargo syntax.
fn comparator(token: &str) -> Option<String> {
    if token.starts_with(['<', '>', '~', '^']) {
        return Some(token.to_string());
    }
    let bare = token.trim_start_matches('=').trim_start_matches('v');
    if semver::Version::parse(bare).is_ok() {
        return Some(format!("={bare}"));
    }
    match numeric_parts(bare).as_deref() {
        Some([major]) => Some(format!(">={major}.0.0, <{}.0.0", major.checked_add(1)?)),
        Some([major, minor]) => Some(format!(
            ">={major}.{minor}.0, <{major}.{}.0",
            minor.checked_add(1)?
        )),
        // Wildcards (`1.2.x`) and `*` mean the same in both dialects.
        _ => Some(bare.to_string()),
    }
}

/// Upper end of a hyphen range. A partial version covers its whole x-range.
fn upper_bound(high: &str) -> Option<String> {
    match numeric_parts(high)?.as_slice() {
        [major] => Some(format!("<{}.0.0", major.checked_add(1)?)),
        [major, minor] => Some(format!("<{major}.{}.0", minor.checked_add(1)?)),
        [major, minor, patch] => Some(format!("<={major}.{minor}.{patch}")),
        _ => None,
    }
}

/// `1`, `1.2` or `1.2.3` as numbers; anything else is `None`.
fn numeric_parts(version: &str) -> Option<Vec<u64>> {
    let version = version.trim_start_matches('=').trim_start_matches('v');
    let parts: Option<Vec<u64>> = version.split('.').map(|p| p.parse().ok()).collect();
    parts.filter(|p| (1..=3).contains(&p.len()))
}

impl std::fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spec(s) => write!(f, "{s}"),
            Self::Local(p) => write!(f, "link:{}", p.display()),
        }
    }
}

impl From<&str> for VersionSelector {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caret_range_matches_compatible_versions() {
        let sel = VersionSelector::parse("^1.0.0");
        assert!(sel.is_satisfied_by("1.3.0"));
        assert!(!sel.is_satisfied_by("2.0.0"));
    }

    #[test]
    fn bare_version_is_exact() {
        let sel = VersionSelector::parse("1.2.0");
        assert!(sel.is_satisfied_by("1.2.0"));
        assert!(!sel.is_satisfied_by("1.3.0"));
    }

    #[test]
    fn partial_versions_are_x_ranges() {
        let minor = VersionSelector::parse("1.2");
        assert!(minor.is_satisfied_by("1.2.0"));
        assert!(minor.is_satisfied_by("1.2.7"));
        assert!(!minor.is_satisfied_by("1.5.0"));
        assert!(!minor.is_satisfied_by("1.1.9"));

        let major = VersionSelector::parse("1");
        assert!(major.is_satisfied_by("1.9.0"));
        assert!(!major.is_satisfied_by("2.0.0"));

        let zero = VersionSelector::parse("0");
        assert!(zero.is_satisfied_by("0.5.0"));
        assert!(!zero.is_satisfied_by("1.0.0"));

        let wildcard = VersionSelector::parse("1.2.x");
        assert!(wildcard.is_satisfied_by("1.2.3"));
        assert!(!wildcard.is_satisfied_by("1.5.0"));
        assert!(!minor.is_tag());
    }

    #[test]
    fn space_separated_comparators_all_apply() {
        let sel = VersionSelector::parse(">=1.2.0 <2.0.0");
        assert!(sel.is_satisfied_by("1.9.9"));
        assert!(!sel.is_satisfied_by("2.0.0"));
        assert!(!sel.is_satisfied_by("1.1.0"));

        assert!(VersionSelector::parse(">= 1.2.0").is_satisfied_by("1.3.0"));
    }

    #[test]
    fn alternatives_match_if_any_does() {
        let sel = VersionSelector::parse("1.2 || 3");
        assert!(sel.is_satisfied_by("1.2.4"));
        assert!(sel.is_satisfied_by("3.1.0"));
        assert!(!sel.is_satisfied_by("2.0.0"));
        assert!(!sel.is_tag());

        let exact = VersionSelector::parse("1.2.3 || 2.0.0");
        assert!(exact.is_satisfied_by("2.0.0"));
        assert!(!exact.is_satisfied_by("1.2.4"));
    }

    #[test]
    fn hyphen_ranges_are_inclusive() {
        let sel = VersionSelector::parse("1.2.3 - 1.4");
        assert!(sel.is_satisfied_by("1.2.3"));
        assert!(sel.is_satisfied_by("1.4.9"));
        assert!(!sel.is_satisfied_by("1.5.0"));
        assert!(!sel.is_satisfied_by("1.2.2"));

        let full = VersionSelector::parse("1.0.0 - 2.0.0");
        assert!(full.is_satisfied_by("2.0.0"));
        assert!(!full.is_satisfied_by("2.0.1"));
    }

    #[test]
    fn tags_never_match() {
        let sel = VersionSelector::parse("latest");
        assert!(sel.is_tag());
        assert!(!sel.is_satisfied_by("1.0.0"));
    }

    #[test]
    fn local_prefixes_are_recognised() {
        assert_eq!(
            VersionSelector::parse("link:../foo"),
            VersionSelector::Local(PathBuf::from("../foo"))
        );
        assert_eq!(
            VersionSelector::parse("file:packages/bar"),
            VersionSelector::Local(PathBuf::from("packages/bar"))
        );
    }

    #[test]
    fn wildcard_skips_prereleases() {
        let sel = VersionSelector::parse("*");
        assert!(sel.is_satisfied_by("4.0.0"));
        assert!(!sel.is_satisfied_by("4.0.0-beta.1"));
    }
}
