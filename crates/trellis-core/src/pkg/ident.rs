//! Package identity: idents, descriptors and locators.
//!
//! - An [`Ident`] names a package (`react`, `@types/node`).
//! - A [`Descriptor`] requests a package: ident + range (`react@^18.0.0`).
//! - A [`Locator`] pins a package: ident + reference (`react@npm:18.2.0`).
//!
//! Each carries a hash derived only from its canonical parts. Equality,
//! ordering and hashing all go through that field, so two spellings of the
//! same request collapse to one key.

use super::error::PkgError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use trellis_util::hash::blake3_parts;

/// Prefix of references and ranges produced by the peer-dependency pass.
pub const VIRTUAL_PROTOCOL: &str = "virtual:";

macro_rules! hash_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

hash_newtype!(
    /// Hash of `(scope, name)`.
    IdentHash
);
hash_newtype!(
    /// Hash of `(ident hash, range)`.
    DescriptorHash
);
hash_newtype!(
    /// Hash of `(ident hash, reference)`.
    LocatorHash
);

/// Scope + name of a package.
#[derive(Debug, Clone)]
pub struct Ident {
    ident_hash: IdentHash,
    /// Scope without the leading `@`.
    scope: Option<String>,
    name: String,
}

impl Ident {
    /// Build an ident from already-validated parts.
    #[must_use]
    pub fn new(scope: Option<&str>, name: &str) -> Self {
        let scope_part = scope.map_or_else(String::new, |s| format!("@{s}"));
        let ident_hash = IdentHash(blake3_parts(&["ident", &scope_part, name]));

        Self {
            ident_hash,
            scope: scope.map(String::from),
            name: name.to_string(),
        }
    }

    /// Parse `name` or `@scope/name`.
    ///
    /// # Errors
    /// Returns `PKG_PARSE_ERROR` if the scope or name is malformed.
    pub fn parse(input: &str) -> Result<Self, PkgError> {
        if let Some(scoped) = input.strip_prefix('@') {
            let Some((scope, name)) = scoped.split_once('/') else {
                return Err(PkgError::parse(format!(
                    "Invalid scoped ident: missing '/' in '{input}'"
                )));
            };
            validate_segment(scope, "scope", input)?;
            validate_segment(name, "name", input)?;
            Ok(Self::new(Some(scope), name))
        } else {
            validate_segment(input, "name", input)?;
            Ok(Self::new(None, input))
        }
    }

    #[must_use]
    pub fn ident_hash(&self) -> &IdentHash {
        &self.ident_hash
    }

    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The string code uses to require this package (`@scope/name` or `name`).
    #[must_use]
    pub fn requirable_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "@{scope}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A request for a package: ident + range.
#[derive(Debug, Clone)]
pub struct Descriptor {
    ident: Ident,
    descriptor_hash: DescriptorHash,
    range: String,
}

impl Descriptor {
    /// Build a descriptor; the range is canonicalized before hashing.
    #[must_use]
    pub fn new(ident: Ident, range: &str) -> Self {
        let range = canonical_range(range);
        let descriptor_hash = DescriptorHash(blake3_parts(&[
            "descriptor",
            ident.ident_hash.as_str(),
            &range,
        ]));

        Self {
            ident,
            descriptor_hash,
            range,
        }
    }

    /// Parse `name@range` or `@scope/name@range`.
    ///
    /// # Errors
    /// Returns `PKG_PARSE_ERROR` if the ident is malformed or the range is missing.
    pub fn parse(input: &str) -> Result<Self, PkgError> {
        let (ident, range) = split_ident_and_suffix(input, "range")?;
        Ok(Self::new(ident, range))
    }

    #[must_use]
    pub fn ident(&self) -> &Ident {
        &self.ident
    }

    #[must_use]
    pub fn descriptor_hash(&self) -> &DescriptorHash {
        &self.descriptor_hash
    }

    #[must_use]
    pub fn range(&self) -> &str {
        &self.range
    }

    /// Same ident, different range.
    #[must_use]
    pub fn with_range(&self, range: &str) -> Self {
        Self::new(self.ident.clone(), range)
    }

    /// The descriptor that can only ever resolve to `locator`.
    #[must_use]
    pub fn from_locator(locator: &Locator) -> Self {
        Self::new(locator.ident.clone(), &locator.reference)
    }

    /// Wrap this descriptor into a virtual one keyed by `entropy`.
    #[must_use]
    pub fn virtualize(&self, entropy: &str) -> Self {
        self.with_range(&format!("{VIRTUAL_PROTOCOL}{entropy}#{}", self.range))
    }

    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.range.starts_with(VIRTUAL_PROTOCOL)
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ident, self.range)
    }
}

/// A resolved package: ident + concrete reference.
#[derive(Debug, Clone)]
pub struct Locator {
    ident: Ident,
    locator_hash: LocatorHash,
    reference: String,
}

impl Locator {
    #[must_use]
    pub fn new(ident: Ident, reference: &str) -> Self {
        let locator_hash = LocatorHash(blake3_parts(&[
            "locator",
            ident.ident_hash.as_str(),
            reference,
        ]));

        Self {
            ident,
            locator_hash,
            reference: reference.to_string(),
        }
    }

    /// Parse `name@reference` or `@scope/name@reference`.
    ///
    /// # Errors
    /// Returns `PKG_PARSE_ERROR` if the ident is malformed or the reference is missing.
    pub fn parse(input: &str) -> Result<Self, PkgError> {
        let (ident, reference) = split_ident_and_suffix(input, "reference")?;
        if reference.trim() != reference {
            return Err(PkgError::parse(format!(
                "Invalid locator: reference has surrounding whitespace in '{input}'"
            )));
        }
        Ok(Self::new(ident, reference))
    }

    #[must_use]
    pub fn ident(&self) -> &Ident {
        &self.ident
    }

    #[must_use]
    pub fn locator_hash(&self) -> &LocatorHash {
        &self.locator_hash
    }

    #[must_use]
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Wrap this locator into a virtual one keyed by `entropy`.
    #[must_use]
    pub fn virtualize(&self, entropy: &str) -> Self {
        Self::new(
            self.ident.clone(),
            &format!("{VIRTUAL_PROTOCOL}{entropy}#{}", self.reference),
        )
    }

    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.reference.starts_with(VIRTUAL_PROTOCOL)
    }

    /// Strip the virtual wrapper, if any.
    #[must_use]
    pub fn devirtualize(&self) -> Self {
        match self
            .reference
            .strip_prefix(VIRTUAL_PROTOCOL)
            .and_then(|rest| rest.split_once('#'))
        {
            Some((_, inner)) => Self::new(self.ident.clone(), inner),
            None => self.clone(),
        }
    }

    /// Filesystem-safe, deterministic directory name for this locator.
    #[must_use]
    pub fn slug(&self) -> String {
        let name = match &self.ident.scope {
            Some(scope) => format!("@{scope}-{}", self.ident.name),
            None => self.ident.name.clone(),
        };

        let mut reference: String = self
            .reference
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '-' })
            .collect();
        reference.truncate(48);
        let reference = reference.trim_matches('-');

        format!("{name}-{reference}-{}", &self.locator_hash.as_str()[..10])
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ident, self.reference)
    }
}

macro_rules! keyed_by_hash {
    ($ty:ident, $field:ident) => {
        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                self.$field == other.$field
            }
        }

        impl Eq for $ty {}

        impl Hash for $ty {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.$field.hash(state);
            }
        }

        impl PartialOrd for $ty {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        // Human-readable order for deterministic output; ties broken by hash.
        impl Ord for $ty {
            fn cmp(&self, other: &Self) -> Ordering {
                self.to_string()
                    .cmp(&other.to_string())
                    .then_with(|| self.$field.cmp(&other.$field))
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Self::parse(&raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

keyed_by_hash!(Ident, ident_hash);
keyed_by_hash!(Descriptor, descriptor_hash);
keyed_by_hash!(Locator, locator_hash);

/// Collapse insignificant whitespace in a range.
fn canonical_range(range: &str) -> String {
    range.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn split_ident_and_suffix<'a>(input: &'a str, what: &str) -> Result<(Ident, &'a str), PkgError> {
    // The ident ends at the first `@` that is not the scope marker
    let search_from = usize::from(input.starts_with('@'));
    let Some(at) = input[search_from..].find('@').map(|i| i + search_from) else {
        return Err(PkgError::parse(format!("Invalid {what} in '{input}': missing '@'")));
    };

    let ident = Ident::parse(&input[..at])?;
    let suffix = &input[at + 1..];

    if suffix.trim().is_empty() {
        return Err(PkgError::parse(format!("Invalid {what} in '{input}': empty {what}")));
    }

    Ok((ident, suffix))
}

fn validate_segment(segment: &str, what: &str, input: &str) -> Result<(), PkgError> {
    if segment.is_empty() {
        return Err(PkgError::parse(format!("Invalid ident: empty {what} in '{input}'")));
    }

    if segment.starts_with('.') || segment.starts_with('_') {
        return Err(PkgError::parse(format!(
            "Invalid ident: {what} cannot start with '{}' in '{input}'",
            &segment[..1]
        )));
    }

    for c in segment.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.' {
            return Err(PkgError::parse(format!(
                "Invalid character '{c}' in {what} of '{input}'"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_parse_ident() {
        let ident = Ident::parse("react").unwrap();
        assert_eq!(ident.scope(), None);
        assert_eq!(ident.name(), "react");

        let ident = Ident::parse("@types/node").unwrap();
        assert_eq!(ident.scope(), Some("types"));
        assert_eq!(ident.name(), "node");
        assert_eq!(ident.requirable_name(), "@types/node");
    }

    #[test]
    fn test_parse_ident_rejects_malformed() {
        for input in ["", "@", "@scope", "@scope/", "@/name", "re act", "a/b", ".hidden"] {
            let err = Ident::parse(input).unwrap_err();
            assert_eq!(err.code(), "PKG_PARSE_ERROR", "input: {input:?}");
        }
    }

    #[test]
    fn test_parse_descriptor() {
        let descriptor = Descriptor::parse("@types/node@^20").unwrap();
        assert_eq!(descriptor.ident().requirable_name(), "@types/node");
        assert_eq!(descriptor.range(), "^20");

        let descriptor = Descriptor::parse("alias@npm:react@18.2.0").unwrap();
        assert_eq!(descriptor.ident().name(), "alias");
        assert_eq!(descriptor.range(), "npm:react@18.2.0");
    }

    #[test]
    fn test_parse_descriptor_requires_range() {
        assert!(Descriptor::parse("react").is_err());
        assert!(Descriptor::parse("react@").is_err());
        assert!(Descriptor::parse("@types/node@  ").is_err());
    }

    #[test]
    fn test_round_trip() {
        let descriptors = [
            "react@^18.0.0",
            "@types/node@>=20.1.0 <21.0.0",
            "left-pad@file:./vendor/left-pad.tgz?locator=app%40workspace%3A.",
            "app@workspace:packages/app",
            "peer@virtual:abc123#npm:1.0.0",
        ];
        for input in descriptors {
            assert_eq!(Descriptor::parse(input).unwrap().to_string(), input);
        }

        let locators = ["react@npm:18.2.0", "@babel/core@npm:7.24.0", "root@workspace:."];
        for input in locators {
            assert_eq!(Locator::parse(input).unwrap().to_string(), input);
        }
    }

    #[test]
    fn test_hashes_are_deterministic() {
        let a = Locator::parse("react@npm:18.2.0").unwrap();
        let b = Locator::new(Ident::new(None, "react"), "npm:18.2.0");
        assert_eq!(a.locator_hash(), b.locator_hash());
        assert_eq!(a.ident().ident_hash(), b.ident().ident_hash());
    }

    #[test]
    fn test_hashes_do_not_collide() {
        let inputs = [
            "a@1", "a@2", "b@1", "@a/b@1", "@ab/c@1", "@a/bc@1", "ab@1", "a@npm:1", "a@ 1",
        ];
        let hashes: HashSet<_> = inputs
            .iter()
            .map(|s| Descriptor::parse(s).unwrap().descriptor_hash().clone())
            .collect();
        // "a@1" and "a@ 1" are the same request
        assert_eq!(hashes.len(), inputs.len() - 1);

        // Idents, descriptors and locators never share a hash space
        let descriptor = Descriptor::parse("a@1").unwrap();
        let locator = Locator::parse("a@1").unwrap();
        assert_ne!(descriptor.descriptor_hash().as_str(), locator.locator_hash().as_str());
    }

    #[test]
    fn test_whitespace_insensitive_equality() {
        let a = Descriptor::parse("lodash@>=4.0.0   <5.0.0").unwrap();
        let b = Descriptor::parse("lodash@>=4.0.0 <5.0.0").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.range(), ">=4.0.0 <5.0.0");
    }

    #[test]
    fn test_virtualize_and_devirtualize() {
        let locator = Locator::parse("plugin@npm:1.0.0").unwrap();
        let virtual_locator = locator.virtualize("deadbeef");
        assert!(virtual_locator.is_virtual());
        assert_eq!(virtual_locator.reference(), "virtual:deadbeef#npm:1.0.0");
        assert_eq!(virtual_locator.devirtualize(), locator);
        assert_ne!(virtual_locator, locator);
    }

    #[test]
    fn test_slug_is_filesystem_safe() {
        let locator = Locator::parse("@babel/core@npm:7.24.0").unwrap();
        let slug = locator.slug();
        assert!(slug.starts_with("@babel-core-npm-7.24.0-"));
        assert!(!slug.contains('/'));
        assert_eq!(slug, locator.slug());

        let other = Locator::parse("@babel/core@npm:7.24.1").unwrap();
        assert_ne!(slug, other.slug());
    }

    #[test]
    fn test_serde_as_string() {
        let locator = Locator::parse("@types/node@npm:20.0.0").unwrap();
        let json = serde_json::to_string(&locator).unwrap();
        assert_eq!(json, "\"@types/node@npm:20.0.0\"");
        let back: Locator = serde_json::from_str(&json).unwrap();
        assert_eq!(back, locator);
    }
}
