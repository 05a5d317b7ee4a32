//! Declarative transaction attributes of a unit of work.

use crate::transaction::isolation::IsolationLevel;
use crate::transaction::propagation::Propagation;

/// Propagation, isolation and read-only hint declared by one operation.
///
/// `isolation: None` means "use the manager's default" when a new physical
/// transaction starts, and never conflicts when joining one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionDefinition {
    pub propagation: Propagation,
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
    /// Shown in log lines and transaction listings.
    pub name: Option<String>,
}

impl TransactionDefinition {
    pub fn new(propagation: Propagation) -> Self {
        Self {
            propagation,
            ..Default::default()
        }
    }

    pub fn required() -> Self {
        Self::new(Propagation::Required)
    }

    pub fn requires_new() -> Self {
        Self::new(Propagation::RequiresNew)
    }

    pub fn nested() -> Self {
        Self::new(Propagation::Nested)
    }

    pub fn mandatory() -> Self {
        Self::new(Propagation::Mandatory)
    }

    pub fn supports() -> Self {
        Self::new(Propagation::Supports)
    }

    pub fn not_supported() -> Self {
        Self::new(Propagation::NotSupported)
    }

    pub fn never() -> Self {
        Self::new(Propagation::Never)
    }

    /// Set the isolation level.
    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = Some(isolation);
        self
    }

    /// Set the read-only hint.
    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Set the operation name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let def = TransactionDefinition::required()
            .isolation(IsolationLevel::Serializable)
            .read_only(true)
            .named("enrollStudentInCourse");
        assert_eq!(def.propagation, Propagation::Required);
        assert_eq!(def.isolation, Some(IsolationLevel::Serializable));
        assert!(def.read_only);
        assert_eq!(def.name.as_deref(), Some("enrollStudentInCourse"));
    }

    #[test]
    fn test_default_is_required_without_isolation() {
        let def = TransactionDefinition::default();
        assert_eq!(def.propagation, Propagation::Required);
        assert_eq!(def.isolation, None);
        assert!(!def.read_only);
    }
}
