//! Field validation helpers for inbound payloads.
//!
//! Validators push into a [`FieldErrors`] collector so a request can report
//! every failing field at once.

use crate::error::DomainError;

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 50;
pub const PASSWORD_MIN: usize = 6;

/// Accumulates per-field validation failures.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FieldErrors {
    errors: Vec<String>,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &str, message: impl AsRef<str>) {
        self.errors.push(format!("{field} {}", message.as_ref()));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn messages(&self) -> &[String] {
        &self.errors
    }

    /// Ok when nothing was recorded, otherwise a `Validation` error whose
    /// message joins every entry with `; `.
    pub fn into_result(self) -> Result<(), DomainError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(DomainError::Validation(self.errors.join("; ")))
        }
    }

    pub fn require(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.push(field, "is required");
        }
    }

    pub fn username(&mut self, field: &str, value: &str) {
        let len = value.chars().count();
        if value.trim().is_empty() {
            self.push(field, "is required");
        } else if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
            self.push(
                field,
                format!("must be between {USERNAME_MIN} and {USERNAME_MAX} characters"),
            );
        }
    }

    pub fn email(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.push(field, "is required");
        } else if !is_valid_email(value) {
            self.push(field, "must be a valid email address");
        }
    }

    pub fn password(&mut self, field: &str, value: &str) {
        if value.is_empty() {
            self.push(field, "is required");
        } else if value.chars().count() < PASSWORD_MIN {
            self.push(field, format!("must be at least {PASSWORD_MIN} characters"));
        }
    }

    /// Like [`FieldErrors::username`], but an empty value means "leave unchanged".
    pub fn optional_username(&mut self, field: &str, value: Option<&str>) {
        if let Some(v) = value.filter(|v| !v.is_empty()) {
            self.username(field, v);
        }
    }

    pub fn optional_email(&mut self, field: &str, value: Option<&str>) {
        if let Some(v) = value.filter(|v| !v.is_empty()) {
            self.email(field, v);
        }
    }
}

/// Pragmatic address check: `local@domain`, no whitespace, a single `@`,
/// and no empty dot-separated label in the domain.
pub fn is_valid_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    !domain.is_empty() && domain.split('.').all(|label| !label.is_empty())
}
