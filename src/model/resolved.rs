//! The resolved model handed to code emission, and run diagnostics

use std::fmt;

use super::elements::{Script, StoredProcedure, TableDto, TableTypeDescriptor};

/// A non-fatal problem found during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// The unit, rule or object the warning is about
    pub subject: String,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.subject, self.message)
    }
}

/// Collects warnings so a run reports every problem it finds.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, subject: impl Into<String>, message: impl Into<String>) {
        let warning = Warning {
            subject: subject.into(),
            message: message.into(),
        };
        tracing::warn!(subject = %warning.subject, "{}", warning.message);
        self.warnings.push(warning);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.warnings.extend(other.warnings);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}

/// Fully typed metadata; nothing in it needs further database access.
#[derive(Debug, Clone, Default)]
pub struct ResolvedModel {
    /// Sorted by (schema, name)
    pub table_dtos: Vec<TableDto>,
    /// Table types referenced by a surviving parameter, sorted by (schema, name)
    pub table_types: Vec<TableTypeDescriptor>,
    /// Sorted by (schema, name)
    pub stored_procedures: Vec<StoredProcedure>,
    /// Sorted by identity
    pub scripts: Vec<Script>,
    pub warnings: Vec<Warning>,
}
