//! SCRAM Attribute Lists — `a=v,b=v,…` per RFC 5802 §5.
//!
//! Attribute names are single US-ASCII letters; values run to the next comma
//! and may be empty at the grammar level (consumers enforce per-field
//! non-emptiness). A repeated name is rejected outright rather than letting a
//! second occurrence overwrite the first.

use std::collections::BTreeMap;

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AttrListError {
    #[error("attribute name is not a single ASCII letter")]
    InvalidName,
    #[error("attribute '{0}' has no '=' separator")]
    MissingValue(char),
    #[error("duplicate attribute '{0}'")]
    Duplicate(char),
    #[error("empty attribute list")]
    Empty,
}

// ─── Attribute list ─────────────────────────────────────────────────────────

/// A parsed attribute list. Iteration and emission are in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttrList {
    attrs: BTreeMap<char, String>,
}

impl AttrList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an RFC 5802 §5 attribute list.
    pub fn parse(s: &str) -> Result<Self, AttrListError> {
        if s.is_empty() {
            return Err(AttrListError::Empty);
        }

        let mut attrs = BTreeMap::new();
        for part in s.split(',') {
            let mut chars = part.chars();
            let name = chars.next().ok_or(AttrListError::InvalidName)?;
            if !name.is_ascii_alphabetic() {
                return Err(AttrListError::InvalidName);
            }
            if chars.next() != Some('=') {
                return Err(AttrListError::MissingValue(name));
            }
            // name and '=' are one byte each
            let value = &part[2..];
            if attrs.insert(name, value.to_string()).is_some() {
                return Err(AttrListError::Duplicate(name));
            }
        }
        Ok(Self { attrs })
    }

    pub fn get(&self, name: char) -> Option<&str> {
        self.attrs.get(&name).map(String::as_str)
    }

    pub fn has(&self, name: char) -> bool {
        self.attrs.contains_key(&name)
    }

    /// A value that is present and non-empty, the way the SCRAM messages
    /// require their mandatory attributes.
    pub fn get_non_empty(&self, name: char) -> Option<&str> {
        self.get(name).filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, name: char, value: impl Into<String>) {
        self.attrs.insert(name, value.into());
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Emit the list back to wire form.
    pub fn emit(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.attrs {
            if !out.is_empty() {
                out.push(',');
            }
            out.push(*name);
            out.push('=');
            out.push_str(value);
        }
        out
    }
}
