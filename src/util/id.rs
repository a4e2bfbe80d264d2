//! Provisional identifier generation and reference remapping.
//!
//! Issues created offline get a provisional id: the reserved `T` prefix
//! plus 8 hex chars from a CSPRNG. Random rather than sequential so
//! concurrent offline creation across clones cannot collide. Once the
//! remote tracker assigns a permanent number, every use of the provisional
//! id across the local record set is rewritten via [`rewrite_references`].

use crate::model::{Issue, IssueNumber, IssueRef, PROVISIONAL_PREFIX};
use once_cell::sync::Lazy;
use rand::RngCore;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Number of random bytes in a provisional id (8 hex chars).
const ID_BYTES: usize = 4;

/// Mapping from provisional id to permanent id, keyed by the bare id
/// string (without the `#` reference marker).
pub type IdMapping = BTreeMap<String, String>;

/// Generate the random suffix of a provisional id.
#[must_use]
pub fn generate_suffix() -> String {
    let mut bytes = [0u8; ID_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(ID_BYTES * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Generate a fresh provisional issue number (`T` + 8 hex chars).
#[must_use]
pub fn provisional_number() -> IssueNumber {
    IssueNumber::new(format!("{PROVISIONAL_PREFIX}{}", generate_suffix()))
}

// A reference token is `#` followed by a maximal alphanumeric run, so a
// mapping for `T1` can never rewrite part of `T10`.
static REF_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#([A-Za-z0-9]+)").expect("valid regex"));

/// Rewrite inline `#<id>` reference tokens in free text.
#[must_use]
pub fn rewrite_text(text: &str, mapping: &IdMapping) -> String {
    REF_TOKEN_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let token = &caps[1];
            mapping
                .get(token)
                .map_or_else(|| caps[0].to_string(), |new| format!("#{new}"))
        })
        .into_owned()
}

/// Apply an identifier mapping to one issue in place.
///
/// Rewrites the issue's own number, its parent reference, the blocked-by
/// and blocks sets, and inline `#<id>` tokens in title and body. Returns
/// whether anything changed.
pub fn rewrite_references(issue: &mut Issue, mapping: &IdMapping) -> bool {
    let mut changed = false;

    if let Some(new) = mapping.get(issue.number.as_str()) {
        issue.number = IssueNumber::new(new.clone());
        changed = true;
    }

    if let Some(parent) = &issue.parent {
        if let Some(new) = mapping.get(parent.as_str()) {
            issue.parent = Some(IssueRef::new(new.clone()));
            changed = true;
        }
    }

    for refs in [&mut issue.blocked_by, &mut issue.blocks] {
        for r in refs.iter_mut() {
            if let Some(new) = mapping.get(r.as_str()) {
                *r = IssueRef::new(new.clone());
                changed = true;
            }
        }
    }

    let title = rewrite_text(&issue.title, mapping);
    if title != issue.title {
        issue.title = title;
        changed = true;
    }
    let body = rewrite_text(&issue.body, mapping);
    if body != issue.body {
        issue.body = body;
        changed = true;
    }

    changed
}
