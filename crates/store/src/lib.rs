//! Context store implementations for Concierge.
//!
//! Every backend persists agents, their skill rows and tool patterns, and
//! context rules, and implements [`concierge_core::ContextStore`].

pub mod in_memory;
pub mod seed;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use in_memory::InMemoryContextStore;
pub use seed::{SeedReport, seed_defaults};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteContextStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresContextStore;

use concierge_core::{ContextType, NewContextRule, StoreError};

/// Reject rules that could never apply.
///
/// Unknown context types may still exist in storage (written by other
/// tools); they are read back as-is and simply never match.
pub(crate) fn validate_new_rule(rule: &NewContextRule) -> Result<(), StoreError> {
    match &rule.context_type {
        ContextType::Other(kind) => Err(StoreError::InvalidValue {
            field: "context_type".into(),
            value: kind.clone(),
        }),
        ContextType::Default => Ok(()),
        _ if rule.context_id.as_deref().is_none_or(str::is_empty) => Err(StoreError::InvalidValue {
            field: "context_id".into(),
            value: format!("<missing for {} rule>", rule.context_type),
        }),
        _ => Ok(()),
    }
}
