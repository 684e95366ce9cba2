// 📐 Field validation shared by every entity
// Rules accumulate; a record is saved only when the list is empty.

use serde::Serialize;

// ============================================================================
// VALIDATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        FieldError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.field, self.message)
    }
}

pub type ValidationResult = Result<(), Vec<FieldError>>;

// ============================================================================
// VALIDATOR
// ============================================================================

#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Validator::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    /// Record a missing value and hand it back for later use
    pub fn required<T>(&mut self, field: &str, value: Option<T>) -> Option<T> {
        if value.is_none() {
            self.add(field, "can't be blank");
        }
        value
    }

    pub fn presence(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.add(field, "can't be blank");
        }
    }

    pub fn max_length(&mut self, field: &str, value: &str, max: usize) {
        if value.chars().count() > max {
            self.add(field, format!("is too long (maximum is {} characters)", max));
        }
    }

    pub fn min_length(&mut self, field: &str, value: &str, min: usize) {
        if value.chars().count() < min {
            self.add(field, format!("is too short (minimum is {} characters)", min));
        }
    }

    pub fn greater_than(&mut self, field: &str, value: f64, bound: f64) {
        if !(value > bound) {
            self.add(field, format!("must be greater than {}", bound));
        }
    }

    pub fn at_least(&mut self, field: &str, value: f64, bound: f64) {
        if !(value >= bound) {
            self.add(field, format!("must be greater than or equal to {}", bound));
        }
    }

    pub fn less_than(&mut self, field: &str, value: f64, bound: f64) {
        if !(value < bound) {
            self.add(field, format!("must be less than {}", bound));
        }
    }

    pub fn inclusion(&mut self, field: &str, value: &str, allowed: &[&str]) {
        if !allowed.contains(&value) {
            self.add(field, "is not included in the list");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(self) -> ValidationResult {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// Parse an enumerated text value, recording an inclusion error when it is unknown
pub fn parse_choice<T>(
    v: &mut Validator,
    field: &str,
    raw: &str,
    parse: fn(&str) -> Option<T>,
) -> Option<T> {
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        v.add(field, "is not included in the list");
    }
    parsed
}
