//! Address string validation.
//!
//! Services and interfaces share the dotted domain grammar, object paths use
//! the slash grammar, and members are bare identifiers. These are pure
//! predicates; the `require_*` helpers turn a failed check into a
//! [`BusError::Validation`].

use crate::error::{BusError, Result};

/// Dotted name such as `org.example.Service`.
///
/// Rejects names that start or end with `.`, contain `/`, or have no `.` at all.
pub fn domain_valid(name: &str) -> bool {
    !(name.starts_with('.') || name.ends_with('.') || name.contains('/') || !name.contains('.'))
}

/// Object path such as `/org/example/object`.
///
/// Rejects empty paths, paths not rooted at `/`, and paths containing `.`.
pub fn path_valid(path: &str) -> bool {
    !(path.is_empty() || !path.starts_with('/') || path.contains('.'))
}

/// Method or signal name. Must be non-empty and free of `-`, `.` and `/`.
pub fn member_valid(member: &str) -> bool {
    !member.is_empty() && !member.contains(['-', '.', '/'])
}

pub fn require_domain(field: &str, value: &str) -> Result<()> {
    if domain_valid(value) {
        Ok(())
    } else {
        Err(BusError::validation(field, value))
    }
}

pub fn require_path(field: &str, value: &str) -> Result<()> {
    if path_valid(value) {
        Ok(())
    } else {
        Err(BusError::validation(field, value))
    }
}

pub fn require_member(field: &str, value: &str) -> Result<()> {
    if member_valid(value) {
        Ok(())
    } else {
        Err(BusError::validation(field, value))
    }
}
