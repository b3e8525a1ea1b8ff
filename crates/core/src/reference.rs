//! Archive references.
//!
//! Callers may address an archive three ways: `id:<archive-id>`,
//! `name:<name>`, or a bare name. The string form is parsed exactly once at
//! the boundary into [`Reference`]; nothing deeper in the system inspects
//! prefixes again.

use std::fmt;

/// A parsed archive reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    /// Addressed by the remote-assigned archive identifier.
    ById(String),
    /// Addressed by the human-assigned name (explicit `name:` or bare).
    ByName(String),
}

impl Reference {
    /// Parse a reference string. A bare string is a name reference.
    pub fn parse(raw: &str) -> Self {
        if let Some(id) = raw.strip_prefix("id:") {
            Reference::ById(id.to_string())
        } else if let Some(name) = raw.strip_prefix("name:") {
            Reference::ByName(name.to_string())
        } else {
            Reference::ByName(raw.to_string())
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::ById(id) => write!(f, "id:{id}"),
            Reference::ByName(name) => write!(f, "name:{name}"),
        }
    }
}

/// Reference string for an archive whose name is unique among live records.
///
/// Bare names are preferred; a name that itself looks like a qualified
/// reference is emitted in `name:` form so it round-trips through
/// [`Reference::parse`]. An unnamed archive can only be addressed by id.
pub fn live_ref(name: Option<&str>, archive_id: &str) -> String {
    match name {
        Some(name) if !name.is_empty() => {
            if name.starts_with("name:") || name.starts_with("id:") {
                format!("name:{name}")
            } else {
                name.to_string()
            }
        }
        _ => format!("id:{archive_id}"),
    }
}

/// Id-qualified, tab-separated listing form: `id:<archive-id>\t<name>`.
///
/// Used for every record whose name is shared by two or more live records,
/// and for the forced-id listing variant. Qualifying every sharer (not just
/// the duplicates beyond the first) keeps each emitted reference unambiguous
/// for a later caller.
pub fn id_qualified_ref(name: Option<&str>, archive_id: &str) -> String {
    format!("id:{archive_id}\t{}", name.unwrap_or_default())
}
