//! Centralized mod directory naming.
//!
//! This module is the single source of truth for managed directory names.
//! A name is a fixed token layout joined with `-`:
//!
//! ```text
//! ml-{slug}-{version}-{variant8}-{package32}    current scheme
//! ml-{slug}-{version}-{package32}               legacy scheme (no variant)
//! ```
//!
//! The slug may itself contain `-`; it is everything between the prefix and
//! the version. The version never contains `-` because [`encode_version`]
//! writes `_` in its place, so parsing works from the right.

use std::fmt;

use uuid::Uuid;

/// Leading token of every managed directory.
pub const DIR_PREFIX: &str = "ml";

/// Hex digits of the variant id kept in the directory name.
pub const SHORT_VARIANT_LEN: usize = 8;

const PACKAGE_ID_LEN: usize = 32;

/// Characters that are not allowed in file names on at least one platform.
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Which naming generation a directory uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingScheme {
    /// No variant discriminator.
    Legacy,
    /// Includes the short variant id.
    Current,
}

/// A directory name split back into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDirName {
    pub slug: String,
    /// Version as decoded by [`decode_version`].
    pub version: String,
    pub variant_short_id: Option<String>,
    pub package_id: Uuid,
}

impl ParsedDirName {
    pub fn scheme(&self) -> NamingScheme {
        if self.variant_short_id.is_some() {
            NamingScheme::Current
        } else {
            NamingScheme::Legacy
        }
    }
}

impl fmt::Display for ParsedDirName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant_short_id {
            Some(short) => f.write_str(&canonical_dir_name(
                self.package_id,
                short,
                &self.slug,
                &self.version,
            )),
            None => f.write_str(&legacy_dir_name(self.package_id, &self.slug, &self.version)),
        }
    }
}

fn is_invalid(c: char) -> bool {
    c.is_control() || INVALID_CHARS.contains(&c)
}

/// Make a display name safe for use as a directory name component.
///
/// Invalid characters become `-`; trailing dots and spaces are trimmed
/// because some filesystems drop them silently.
///
/// # Examples
///
/// ```
/// use modlayer::package::slugify;
///
/// assert_eq!(slugify("Cool Hat"), "Cool Hat");
/// assert_eq!(slugify("Hats/Gloves: \"Deluxe\""), "Hats-Gloves- -Deluxe-");
/// assert_eq!(slugify("..."), "mod");
/// ```
pub fn slugify(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if is_invalid(c) { '-' } else { c })
        .collect();
    let trimmed = replaced.trim().trim_end_matches(['.', ' ']);
    if trimmed.is_empty() {
        "mod".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Escape character for the version token.
const VERSION_ESCAPE: char = '~';

/// Encode a version string for the version token.
///
/// The encoding is reversible for any trimmed, non-empty version: `-`
/// becomes `_`, a literal `_` or `~` is written as `~_` or `~~`, and
/// whitespace or characters invalid in file names become `~<hex>;`. Surrounding
/// whitespace is dropped and an empty version is written as `0`.
///
/// # Examples
///
/// ```
/// use modlayer::package::{decode_version, encode_version};
///
/// assert_eq!(encode_version("1.2.0-beta"), "1.2.0_beta");
/// assert_eq!(encode_version("1.2.0_beta"), "1.2.0~_beta");
/// assert_eq!(decode_version("1.2.0_beta"), "1.2.0-beta");
/// assert_eq!(decode_version("1.2.0~_beta"), "1.2.0_beta");
/// ```
pub fn encode_version(version: &str) -> String {
    let mut encoded = String::with_capacity(version.len());
    for c in version.trim().chars() {
        match c {
            '-' => encoded.push('_'),
            '_' | VERSION_ESCAPE => {
                encoded.push(VERSION_ESCAPE);
                encoded.push(if c == '_' { '_' } else { VERSION_ESCAPE });
            }
            c if is_invalid(c) || c.is_whitespace() => {
                encoded.push_str(&format!("{}{:x};", VERSION_ESCAPE, c as u32));
            }
            c => encoded.push(c),
        }
    }
    if encoded.is_empty() {
        "0".to_string()
    } else {
        encoded
    }
}

/// Reverse [`encode_version`].
///
/// Names written before `_` and `~` were escaped decode the same way, since
/// they only ever used `_` for `-`. A malformed escape is kept as written.
pub fn decode_version(token: &str) -> String {
    let mut decoded = String::with_capacity(token.len());
    let mut rest = token;
    while let Some(c) = rest.chars().next() {
        rest = &rest[c.len_utf8()..];
        match c {
            '_' => decoded.push('-'),
            VERSION_ESCAPE => match rest.chars().next() {
                Some(next @ ('_' | VERSION_ESCAPE)) => {
                    decoded.push(next);
                    rest = &rest[1..];
                }
                _ => match decode_escape(rest) {
                    Some((ch, used)) => {
                        decoded.push(ch);
                        rest = &rest[used..];
                    }
                    None => decoded.push(c),
                },
            },
            c => decoded.push(c),
        }
    }
    decoded
}

/// Parse `<hex>;` at the start of `rest`, returning the char and the bytes
/// consumed.
fn decode_escape(rest: &str) -> Option<(char, usize)> {
    let end = rest.find(';')?;
    let hex = &rest[..end];
    if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let ch = char::from_u32(u32::from_str_radix(hex, 16).ok()?)?;
    Some((ch, end + 1))
}

/// First [`SHORT_VARIANT_LEN`] hex digits of a variant id.
pub fn short_variant_id(variant_id: &Uuid) -> String {
    variant_id.simple().to_string()[..SHORT_VARIANT_LEN].to_string()
}

/// Canonical (current-scheme) directory name.
///
/// # Examples
///
/// ```
/// use uuid::Uuid;
/// use modlayer::package::canonical_dir_name;
///
/// let package = Uuid::parse_str("0123456789abcdef0123456789abcdef").unwrap();
/// assert_eq!(
///     canonical_dir_name(package, "deadbeef", "Cool Hat", "1.0.0"),
///     "ml-Cool Hat-1.0.0-deadbeef-0123456789abcdef0123456789abcdef"
/// );
/// ```
pub fn canonical_dir_name(package_id: Uuid, variant_short_id: &str, slug: &str, version: &str) -> String {
    format!(
        "{}-{}-{}-{}-{}",
        DIR_PREFIX,
        slugify(slug),
        encode_version(version),
        variant_short_id,
        package_id.simple()
    )
}

/// Legacy directory name without a variant discriminator.
pub fn legacy_dir_name(package_id: Uuid, slug: &str, version: &str) -> String {
    format!(
        "{}-{}-{}-{}",
        DIR_PREFIX,
        slugify(slug),
        encode_version(version),
        package_id.simple()
    )
}

fn is_hex(token: &str, len: usize) -> bool {
    token.len() == len && token.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Parse a managed directory name.
///
/// Returns `None` for anything that does not follow either scheme.
///
/// A legacy name whose version token happens to be eight hex digits is read
/// as a current-scheme name; sidecar manifests settle such cases.
pub fn parse_dir_name(name: &str) -> Option<ParsedDirName> {
    let tokens: Vec<&str> = name.split('-').collect();
    if tokens.len() < 4 || tokens[0] != DIR_PREFIX {
        return None;
    }

    let last = tokens.len() - 1;
    if !is_hex(tokens[last], PACKAGE_ID_LEN) {
        return None;
    }
    let package_id = Uuid::parse_str(tokens[last]).ok()?;

    let (variant_short_id, version_idx) =
        if tokens.len() >= 5 && is_hex(tokens[last - 1], SHORT_VARIANT_LEN) {
            (Some(tokens[last - 1].to_ascii_lowercase()), last - 2)
        } else {
            (None, last - 1)
        };

    let version = tokens[version_idx];
    let slug = tokens[1..version_idx].join("-");
    if version.is_empty() || slug.is_empty() {
        return None;
    }

    Some(ParsedDirName {
        slug,
        version: decode_version(version),
        variant_short_id,
        package_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn package() -> Uuid {
        Uuid::parse_str("0123456789abcdef0123456789abcdef").unwrap()
    }

    #[test]
    fn test_short_variant_id() {
        let variant = Uuid::parse_str("deadbeef-0000-4000-8000-000000000000").unwrap();
        assert_eq!(short_variant_id(&variant), "deadbeef");
    }

    #[test]
    fn test_parse_current_scheme() {
        let name = canonical_dir_name(package(), "deadbeef", "My-Cool Mod", "2.0.1-rc1");
        let parsed = parse_dir_name(&name).unwrap();

        assert_eq!(parsed.slug, "My-Cool Mod");
        assert_eq!(parsed.version, "2.0.1-rc1");
        assert_eq!(parsed.variant_short_id.as_deref(), Some("deadbeef"));
        assert_eq!(parsed.package_id, package());
        assert_eq!(parsed.scheme(), NamingScheme::Current);
        assert_eq!(parsed.to_string(), name);
    }

    #[test]
    fn test_parse_legacy_scheme() {
        let name = legacy_dir_name(package(), "Old Mod", "1.0");
        let parsed = parse_dir_name(&name).unwrap();

        assert_eq!(parsed.slug, "Old Mod");
        assert_eq!(parsed.version, "1.0");
        assert_eq!(parsed.variant_short_id, None);
        assert_eq!(parsed.scheme(), NamingScheme::Legacy);
        assert_eq!(parsed.to_string(), name);
    }

    #[test]
    fn test_parse_rejects_unmanaged() {
        assert!(parse_dir_name("Some Random Mod").is_none());
        assert!(parse_dir_name("ml-x-1.0-nothex").is_none());
        assert!(parse_dir_name("xx-slug-1.0-0123456789abcdef0123456789abcdef").is_none());
        assert!(parse_dir_name("ml-1.0-0123456789abcdef0123456789abcdef").is_none());
    }

    #[test]
    fn test_slugify_replaces_invalid() {
        assert_eq!(slugify("a<b>c"), "a-b-c");
        assert_eq!(slugify("tab\there"), "tab-here");
        assert_eq!(slugify("trailing. "), "trailing");
    }

    #[test]
    fn test_encode_version_empty() {
        assert_eq!(encode_version(""), "0");
        assert_eq!(encode_version("  "), "0");
    }

    #[test]
    fn test_encode_version_escapes() {
        assert_eq!(encode_version("1 / 2"), "1~20;~2f;~20;2");
        assert_eq!(encode_version("a~b"), "a~~b");
        assert_eq!(decode_version("1~20;~2f;~20;2"), "1 / 2");
        assert_eq!(decode_version("a~~b"), "a~b");
    }

    #[test]
    fn test_underscore_and_dash_stay_distinct() {
        let dash = encode_version("1.0-rc_1");
        let underscore = encode_version("1.0_rc-1");
        assert_ne!(dash, underscore);
        assert_eq!(decode_version(&dash), "1.0-rc_1");
        assert_eq!(decode_version(&underscore), "1.0_rc-1");
        assert!(!dash.contains('-'));
    }

    #[test]
    fn test_decode_version_keeps_malformed_escape() {
        assert_eq!(decode_version("1~zz"), "1~zz");
        assert_eq!(decode_version("1~"), "1~");
        assert_eq!(decode_version("1~110000;"), "1~110000;");
    }

    #[test]
    fn test_decode_version_reads_old_names() {
        assert_eq!(decode_version("2.0.1_rc1"), "2.0.1-rc1");
    }

    proptest! {
        #[test]
        fn prop_canonical_name_round_trip(
            name in "[ -~]{1,40}",
            version in "[0-9a-z.+]{1,6}(-[0-9a-z.]{1,6})?",
            variant in any::<u128>(),
            pkg in any::<u128>(),
        ) {
            let package_id = Uuid::from_u128(pkg);
            let variant_id = Uuid::from_u128(variant);
            let short = short_variant_id(&variant_id);

            let dir = canonical_dir_name(package_id, &short, &name, &version);
            let parsed = parse_dir_name(&dir).expect("canonical name must parse");

            prop_assert_eq!(parsed.package_id, package_id);
            prop_assert_eq!(parsed.variant_short_id, Some(short));
            prop_assert_eq!(parsed.version, version);
            prop_assert_eq!(parsed.slug, slugify(&name));
        }

        #[test]
        fn prop_version_round_trip(version in "[!-~]([ -~]{0,20}[!-~])?") {
            let token = encode_version(&version);
            prop_assert!(!token.contains('-'));
            prop_assert!(!token.chars().any(|c| INVALID_CHARS.contains(&c) || c.is_whitespace()));
            prop_assert_eq!(decode_version(&token), version);
        }
    }
}
