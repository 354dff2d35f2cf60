//! npm range semantics on top of `semver`.
//!
//! The `semver` crate speaks Cargo's dialect. npm differs in a few places
//! that matter for candidate selection:
//! - `||` alternatives
//! - hyphen ranges (`1.0.0 - 2.0.0`)
//! - space-separated comparators (`>= 2.1.2 < 3`)
//! - a bare full version means exact, a bare partial version means `x.y.*`

use super::error::PkgError;
use super::registry::get_versions;
use semver::{Version, VersionReq};
use serde_json::Value;

/// A parsed npm range: matches when any alternative matches.
#[derive(Debug, Clone)]
pub struct NpmRange {
    alternatives: Vec<VersionReq>,
}

impl NpmRange {
    /// Parse an npm range.
    ///
    /// # Errors
    /// Returns `PKG_PARSE_ERROR` if any alternative is not a valid range.
    pub fn parse(range: &str) -> Result<Self, PkgError> {
        let alternatives = range
            .split("||")
            .map(parse_alternative)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { alternatives })
    }

    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }
}

/// Whether `range` parses as an npm range.
#[must_use]
pub fn is_valid_range(range: &str) -> bool {
    NpmRange::parse(range).is_ok()
}

/// All published versions of a packument satisfying `range`, highest first.
///
/// # Errors
/// Returns `PKG_PARSE_ERROR` if the range is malformed.
pub fn matching_versions(packument: &Value, range: &str) -> Result<Vec<Version>, PkgError> {
    let range = NpmRange::parse(range)?;

    let mut versions: Vec<Version> = get_versions(packument)
        .into_iter()
        .filter_map(|v| Version::parse(v).ok())
        .filter(|v| range.matches(v))
        .collect();

    versions.sort_by(|a, b| b.cmp(a));
    Ok(versions)
}

fn parse_alternative(range: &str) -> Result<VersionReq, PkgError> {
    let range = range.trim();
    let invalid = |e: semver::Error| PkgError::parse(format!("Invalid version range '{range}': {e}"));

    if range.is_empty() || range == "*" || range.eq_ignore_ascii_case("x") {
        return Ok(VersionReq::STAR);
    }

    if let Some((start, end)) = range.split_once(" - ") {
        let converted = format!(">={}, <={}", start.trim(), end.trim());
        return VersionReq::parse(&converted).map_err(invalid);
    }

    let comparators = join_comparators(range)
        .into_iter()
        .map(|token| convert_comparator(&token))
        .collect::<Vec<_>>()
        .join(", ");

    VersionReq::parse(&comparators).map_err(invalid)
}

/// Split on whitespace, gluing a dangling operator to the version after it.
fn join_comparators(range: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut pending = String::new();

    for part in range.split_whitespace() {
        pending.push_str(part);
        if part.chars().any(|c| c.is_ascii_digit() || matches!(c, 'x' | 'X' | '*')) {
            tokens.push(std::mem::take(&mut pending));
        }
    }
    if !pending.is_empty() {
        tokens.push(pending);
    }
    tokens
}

fn convert_comparator(token: &str) -> String {
    let operator_len = token
        .find(|c: char| !matches!(c, '>' | '<' | '=' | '~' | '^'))
        .unwrap_or(token.len());
    let (operator, version) = token.split_at(operator_len);
    let version = version.strip_prefix('v').unwrap_or(version);

    // `1.x`, `1.2.X` -> `1.*`, `1.2.*`
    let version = version
        .split('.')
        .map(|segment| if matches!(segment, "x" | "X") { "*" } else { segment })
        .collect::<Vec<_>>()
        .join(".");

    if !operator.is_empty() {
        return format!("{operator}{version}");
    }

    if version.contains('*') || Version::parse(&version).is_ok() {
        // `semver` reads a bare version as a caret requirement
        if version.contains('*') {
            version
        } else {
            format!("={version}")
        }
    } else {
        // Partial bare versions: `1` is `1.x`, `1.2` is `1.2.x`
        format!("~{version}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions(packument: &Value, range: &str) -> Vec<String> {
        matching_versions(packument, range)
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    fn packument() -> Value {
        serde_json::json!({
            "name": "lodash",
            "versions": {
                "1.0.0": {}, "1.2.0": {}, "1.2.5": {}, "2.0.0": {},
                "2.1.3": {}, "3.0.0-beta.1": {}, "3.0.0": {}, "not-semver": {}
            }
        })
    }

    #[test]
    fn test_caret_sorted_descending() {
        assert_eq!(versions(&packument(), "^1.0.0"), vec!["1.2.5", "1.2.0", "1.0.0"]);
    }

    #[test]
    fn test_exact_version_is_exact() {
        assert_eq!(versions(&packument(), "1.2.0"), vec!["1.2.0"]);
        assert_eq!(versions(&packument(), "v2.0.0"), vec!["2.0.0"]);
    }

    #[test]
    fn test_partial_versions() {
        assert_eq!(versions(&packument(), "1.2"), vec!["1.2.5", "1.2.0"]);
        assert_eq!(versions(&packument(), "2"), vec!["2.1.3", "2.0.0"]);
        assert_eq!(versions(&packument(), "1.x"), vec!["1.2.5", "1.2.0", "1.0.0"]);
    }

    #[test]
    fn test_or_and_hyphen_ranges() {
        assert_eq!(versions(&packument(), "^1.2.1 || ^3"), vec!["3.0.0", "1.2.5"]);
        assert_eq!(versions(&packument(), "1.2.0 - 2.0.0"), vec!["2.0.0", "1.2.5", "1.2.0"]);
    }

    #[test]
    fn test_space_separated_comparators() {
        assert_eq!(versions(&packument(), ">= 1.2.1 < 2.1.0"), vec!["2.0.0", "1.2.5"]);
        assert_eq!(versions(&packument(), ">=1.2.1 <2.1.0"), vec!["2.0.0", "1.2.5"]);
    }

    #[test]
    fn test_star_matches_all_stable() {
        assert_eq!(versions(&packument(), "*").len(), 6);
        assert_eq!(versions(&packument(), "").len(), 6);
    }

    #[test]
    fn test_invalid_range() {
        assert!(!is_valid_range("latest"));
        assert!(!is_valid_range("^1.0.0 || next"));
        assert!(is_valid_range("~1.2.3"));
        assert_eq!(
            NpmRange::parse("banana").unwrap_err().code(),
            "PKG_PARSE_ERROR"
        );
    }
}
