//! Propagation modes and the resolver that turns a declared mode plus the
//! ambient context into a concrete action.
//!
//! | Requested     | Ambient present            | Ambient absent       |
//! |---------------|----------------------------|----------------------|
//! | REQUIRED      | join                       | start physical       |
//! | REQUIRES_NEW  | suspend, start physical    | start physical       |
//! | NESTED        | savepoint on ambient       | start physical       |
//! | MANDATORY     | join                       | error                |
//! | SUPPORTS      | join                       | run without          |
//! | NOT_SUPPORTED | suspend, run without       | run without          |
//! | NEVER         | error                      | run without          |

use std::fmt;

use crate::transaction::config::TransactionConfig;
use crate::transaction::context::{ContextId, TransactionContext};
use crate::transaction::definition::TransactionDefinition;
use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::isolation::IsolationLevel;

/// How a unit of work relates to an already open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Propagation {
    /// Join the open transaction, or start one.
    #[default]
    Required,
    /// Always start an independent transaction, suspending the open one.
    RequiresNew,
    /// Run in a savepoint of the open transaction, or start one.
    Nested,
    /// Join the open transaction; fail without one.
    Mandatory,
    /// Join the open transaction, or run without one.
    Supports,
    /// Run without a transaction, suspending the open one.
    NotSupported,
    /// Run without a transaction; fail inside one.
    Never,
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Propagation::Required => "REQUIRED",
            Propagation::RequiresNew => "REQUIRES_NEW",
            Propagation::Nested => "NESTED",
            Propagation::Mandatory => "MANDATORY",
            Propagation::Supports => "SUPPORTS",
            Propagation::NotSupported => "NOT_SUPPORTED",
            Propagation::Never => "NEVER",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Propagation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace([' ', '-'], "_").as_str() {
            "REQUIRED" => Ok(Propagation::Required),
            "REQUIRES_NEW" => Ok(Propagation::RequiresNew),
            "NESTED" => Ok(Propagation::Nested),
            "MANDATORY" => Ok(Propagation::Mandatory),
            "SUPPORTS" => Ok(Propagation::Supports),
            "NOT_SUPPORTED" => Ok(Propagation::NotSupported),
            "NEVER" => Ok(Propagation::Never),
            _ => Err(format!("unknown propagation: {}", s)),
        }
    }
}

/// What the manager has to do before running a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Participate in the ambient transaction.
    Join,
    /// Open a new physical transaction, optionally suspending the ambient one.
    StartPhysical { suspend_ambient: bool },
    /// Open a savepoint on the ambient transaction's connection.
    StartNested,
    /// Run with no transaction, optionally suspending the ambient one.
    RunWithout { suspend_ambient: bool },
}

/// A participating unit asked for a different isolation than the
/// transaction it joins. The existing isolation is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsolationConflict {
    pub context: ContextId,
    pub requested: IsolationLevel,
    pub existing: IsolationLevel,
}

impl fmt::Display for IsolationConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requested {} while joining transaction {} at {}; keeping {}",
            self.requested, self.context, self.existing, self.existing
        )
    }
}

/// Outcome of [`resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub action: Action,
    /// Isolation the unit will actually run at.
    pub isolation: IsolationLevel,
    /// Set when joining or nesting with a mismatching isolation.
    pub conflict: Option<IsolationConflict>,
}

/// Decide what to do for `definition` given the innermost transactional
/// context, if any.
///
/// Pure: reads nothing but its arguments and touches no storage.
pub fn resolve(
    definition: &TransactionDefinition,
    ambient: Option<&TransactionContext>,
    config: &TransactionConfig,
) -> TransactionResult<Resolution> {
    let ambient = ambient.filter(|ctx| ctx.is_transactional());
    let requested = definition.isolation;
    let fresh = requested.unwrap_or(config.default_isolation);

    let Some(ambient) = ambient else {
        let action = match definition.propagation {
            Propagation::Required | Propagation::RequiresNew | Propagation::Nested => {
                Action::StartPhysical {
                    suspend_ambient: false,
                }
            }
            Propagation::Mandatory => {
                return Err(TransactionError::NoExistingTransaction(definition.propagation))
            }
            Propagation::Supports | Propagation::NotSupported | Propagation::Never => {
                Action::RunWithout {
                    suspend_ambient: false,
                }
            }
        };
        return Ok(Resolution {
            action,
            isolation: fresh,
            conflict: None,
        });
    };

    let action = match definition.propagation {
        Propagation::Required | Propagation::Mandatory | Propagation::Supports => Action::Join,
        Propagation::RequiresNew => Action::StartPhysical {
            suspend_ambient: true,
        },
        Propagation::Nested if !config.nested_transactions => {
            return Err(TransactionError::NestedNotAllowed)
        }
        Propagation::Nested => Action::StartNested,
        Propagation::NotSupported => Action::RunWithout {
            suspend_ambient: true,
        },
        Propagation::Never => {
            return Err(TransactionError::ExistingTransaction(definition.propagation))
        }
    };

    match action {
        Action::Join | Action::StartNested => {
            let existing = ambient.isolation();
            let conflict = requested
                .filter(|requested| *requested != existing)
                .map(|requested| IsolationConflict {
                    context: ambient.id(),
                    requested,
                    existing,
                });
            if let (Some(conflict), true) = (conflict, config.validate_existing_isolation) {
                return Err(TransactionError::IsolationMismatch {
                    context: conflict.context,
                    requested: conflict.requested,
                    existing: conflict.existing,
                });
            }
            Ok(Resolution {
                action,
                isolation: existing,
                conflict,
            })
        }
        Action::StartPhysical { .. } | Action::RunWithout { .. } => Ok(Resolution {
            action,
            isolation: fresh,
            conflict: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::context::ContextKind;

    const ALL: [Propagation; 7] = [
        Propagation::Required,
        Propagation::RequiresNew,
        Propagation::Nested,
        Propagation::Mandatory,
        Propagation::Supports,
        Propagation::NotSupported,
        Propagation::Never,
    ];

    fn ambient(isolation: IsolationLevel) -> TransactionContext {
        TransactionContext::new(ContextKind::Physical, isolation, false, None, None)
    }

    fn action(
        propagation: Propagation,
        ambient: Option<&TransactionContext>,
    ) -> TransactionResult<Action> {
        resolve(
            &TransactionDefinition::new(propagation),
            ambient,
            &TransactionConfig::default(),
        )
        .map(|r| r.action)
    }

    #[test]
    fn test_decision_table_without_ambient() {
        let start = Action::StartPhysical {
            suspend_ambient: false,
        };
        let without = Action::RunWithout {
            suspend_ambient: false,
        };
        assert_eq!(action(Propagation::Required, None).unwrap(), start);
        assert_eq!(action(Propagation::RequiresNew, None).unwrap(), start);
        assert_eq!(action(Propagation::Nested, None).unwrap(), start);
        assert!(matches!(
            action(Propagation::Mandatory, None),
            Err(TransactionError::NoExistingTransaction(Propagation::Mandatory))
        ));
        assert_eq!(action(Propagation::Supports, None).unwrap(), without);
        assert_eq!(action(Propagation::NotSupported, None).unwrap(), without);
        assert_eq!(action(Propagation::Never, None).unwrap(), without);
    }

    #[test]
    fn test_decision_table_with_ambient() {
        let tx = ambient(IsolationLevel::ReadCommitted);
        let tx = Some(&tx);
        assert_eq!(action(Propagation::Required, tx).unwrap(), Action::Join);
        assert_eq!(
            action(Propagation::RequiresNew, tx).unwrap(),
            Action::StartPhysical {
                suspend_ambient: true
            }
        );
        assert_eq!(action(Propagation::Nested, tx).unwrap(), Action::StartNested);
        assert_eq!(action(Propagation::Mandatory, tx).unwrap(), Action::Join);
        assert_eq!(action(Propagation::Supports, tx).unwrap(), Action::Join);
        assert_eq!(
            action(Propagation::NotSupported, tx).unwrap(),
            Action::RunWithout {
                suspend_ambient: true
            }
        );
        assert!(matches!(
            action(Propagation::Never, tx),
            Err(TransactionError::ExistingTransaction(Propagation::Never))
        ));
    }

    #[test]
    fn test_non_transactional_ambient_counts_as_absent() {
        let none = TransactionContext::new(
            ContextKind::None,
            IsolationLevel::ReadCommitted,
            false,
            None,
            None,
        );
        for propagation in ALL {
            assert_eq!(
                action(propagation, Some(&none)).ok(),
                action(propagation, None).ok()
            );
        }
    }

    #[test]
    fn test_join_keeps_ambient_isolation_and_reports_conflict() {
        let tx = ambient(IsolationLevel::Serializable);
        let def = TransactionDefinition::required().isolation(IsolationLevel::ReadCommitted);
        let resolution = resolve(&def, Some(&tx), &TransactionConfig::default()).unwrap();

        assert_eq!(resolution.action, Action::Join);
        assert_eq!(resolution.isolation, IsolationLevel::Serializable);
        let conflict = resolution.conflict.unwrap();
        assert_eq!(conflict.context, tx.id());
        assert_eq!(conflict.requested, IsolationLevel::ReadCommitted);
    }

    #[test]
    fn test_join_without_declared_isolation_never_conflicts() {
        let tx = ambient(IsolationLevel::Serializable);
        let resolution = resolve(
            &TransactionDefinition::mandatory(),
            Some(&tx),
            &TransactionConfig::default(),
        )
        .unwrap();
        assert!(resolution.conflict.is_none());
    }

    #[test]
    fn test_strict_isolation_validation() {
        let tx = ambient(IsolationLevel::RepeatableRead);
        let def = TransactionDefinition::required().isolation(IsolationLevel::Serializable);
        let config = TransactionConfig::default().validate_existing_isolation(true);
        let err = resolve(&def, Some(&tx), &config).unwrap_err();
        assert!(matches!(err, TransactionError::IsolationMismatch { .. }));

        // start-new applies the requested level verbatim
        let def = TransactionDefinition::requires_new().isolation(IsolationLevel::Serializable);
        let resolution = resolve(&def, Some(&tx), &config).unwrap();
        assert_eq!(resolution.isolation, IsolationLevel::Serializable);
    }

    #[test]
    fn test_default_isolation_applies_to_new_transactions() {
        let config = TransactionConfig::default().default_isolation(IsolationLevel::RepeatableRead);
        let resolution = resolve(&TransactionDefinition::required(), None, &config).unwrap();
        assert_eq!(resolution.isolation, IsolationLevel::RepeatableRead);
    }

    #[test]
    fn test_nested_disabled() {
        let tx = ambient(IsolationLevel::ReadCommitted);
        let config = TransactionConfig::default().nested_transactions(false);
        let err = resolve(&TransactionDefinition::nested(), Some(&tx), &config).unwrap_err();
        assert!(matches!(err, TransactionError::NestedNotAllowed));
    }

    #[test]
    fn test_parse_propagation() {
        for propagation in ALL {
            assert_eq!(
                propagation.to_string().parse::<Propagation>().unwrap(),
                propagation
            );
        }
        assert_eq!(
            "requires new".parse::<Propagation>().unwrap(),
            Propagation::RequiresNew
        );
        assert!("sometimes".parse::<Propagation>().is_err());
    }
}
