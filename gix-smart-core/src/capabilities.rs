//! Capability detection from the ref advertisement.

use bstr::{BStr, BString, ByteSlice};

use crate::packet::RefRecord;

/// The set of capability tokens announced by the remote.
///
/// Detected from the NUL-separated suffix of the first advertised ref. An
/// empty advertisement yields an empty set, which is a valid state rather
/// than an error.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    tokens: Vec<BString>,
}

impl CapabilitySet {
    /// Detect capabilities from the first advertised ref, if any.
    pub fn detect(first_ref: Option<&RefRecord>) -> Self {
        match first_ref.and_then(|r| r.capabilities.as_ref()) {
            Some(caps) => Self::from_bytes(caps.as_bstr()),
            None => Self::default(),
        }
    }

    /// Parse a whitespace-separated capability listing.
    pub fn from_bytes(input: &BStr) -> Self {
        Self {
            tokens: input
                .fields_with(|c| c.is_whitespace())
                .map(BString::from)
                .collect(),
        }
    }

    /// Return `true` if the named capability is present, either as a bare
    /// token or as the key of a `key=value` token.
    pub fn contains(&self, name: &str) -> bool {
        self.tokens.iter().any(|token| {
            let token: &[u8] = token.as_ref();
            token == name.as_bytes()
                || (token.len() > name.len()
                    && token.starts_with(name.as_bytes())
                    && token[name.len()] == b'=')
        })
    }

    /// Return the value of a `key=value` capability such as `agent=`.
    pub fn value_of(&self, key: &str) -> Option<&BStr> {
        self.tokens.iter().find_map(|token| {
            token
                .strip_prefix(key.as_bytes())?
                .strip_prefix(b"=")
                .map(ByteSlice::as_bstr)
        })
    }

    /// Iterate all tokens in announcement order.
    pub fn iter(&self) -> impl Iterator<Item = &BStr> {
        self.tokens.iter().map(|t| t.as_bstr())
    }

    /// Return `true` if no capabilities were announced.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
