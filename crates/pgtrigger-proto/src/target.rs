//! Subscription target naming.
//!
//! A target is a `(schema, table)` pair. The notification channel, the
//! trigger and the trigger function are all named from that pair, so the
//! same target always maps to the same database objects.
//!
//! The mapping is not injective. `("a_b", "c")` and `("a", "b_c")` derive
//! the same names. Triggers are per table and functions are schema
//! qualified, so the two installations do not replace each other, but they
//! publish on one channel and a listener on either target receives both
//! tables' changes. Every [`ChangeMessage`](crate::ChangeMessage) carries
//! its schema and table for telling them apart.

use std::fmt;

use crate::error::Error;

/// Maximum identifier length accepted by PostgreSQL (`NAMEDATALEN - 1`).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// A table whose row changes are published on a notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionTarget {
    schema: String,
    table: String,
}

impl SubscriptionTarget {
    /// Create a target for `schema.table`.
    ///
    /// Both parts must be plain identifiers (`[A-Za-z_][A-Za-z0-9_]*`) and
    /// every derived name must fit in [`MAX_IDENTIFIER_LEN`] bytes.
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Result<Self, Error> {
        let target = Self {
            schema: schema.into(),
            table: table.into(),
        };

        validate_identifier("schema", &target.schema)?;
        validate_identifier("table", &target.table)?;

        for name in [target.channel(), target.trigger_name(), target.function_name()] {
            if name.len() > MAX_IDENTIFIER_LEN {
                return Err(Error::InvalidIdentifier(format!(
                    "derived name {} is {} bytes (max: {})",
                    name,
                    name.len(),
                    MAX_IDENTIFIER_LEN
                )));
            }
        }

        Ok(target)
    }

    /// Schema name.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Notification channel the trigger publishes on.
    ///
    /// Shared by every target whose `schema_table` spelling is the same.
    pub fn channel(&self) -> String {
        format!("{}_{}_channel", self.schema, self.table)
    }

    /// Name of the row-level trigger.
    pub fn trigger_name(&self) -> String {
        format!("{}_{}_trigger", self.schema, self.table)
    }

    /// Name of the trigger function, created in the target's schema.
    pub fn function_name(&self) -> String {
        format!("{}_{}_notify", self.schema, self.table)
    }

    /// Quoted, schema-qualified table name for use in DDL.
    pub fn qualified_table(&self) -> String {
        format!("\"{}\".\"{}\"", self.schema, self.table)
    }

    /// Quoted, schema-qualified trigger function name for use in DDL.
    pub fn qualified_function(&self) -> String {
        format!("\"{}\".\"{}\"", self.schema, self.function_name())
    }
}

impl fmt::Display for SubscriptionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

fn validate_identifier(kind: &str, ident: &str) -> Result<(), Error> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidIdentifier(format!(
            "{} name {:?} must match [A-Za-z_][A-Za-z0-9_]*",
            kind, ident
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_names() {
        let target = SubscriptionTarget::new("public", "alarm_item").unwrap();

        assert_eq!(target.channel(), "public_alarm_item_channel");
        assert_eq!(target.trigger_name(), "public_alarm_item_trigger");
        assert_eq!(target.function_name(), "public_alarm_item_notify");
        assert_eq!(target.qualified_table(), "\"public\".\"alarm_item\"");
        assert_eq!(target.to_string(), "public.alarm_item");
    }

    #[test]
    fn test_names_are_deterministic() {
        let a = SubscriptionTarget::new("sales", "Orders").unwrap();
        let b = SubscriptionTarget::new("sales", "Orders").unwrap();

        assert_eq!(a, b);
        assert_eq!(a.channel(), b.channel());
        assert_eq!(a.trigger_name(), b.trigger_name());
        assert_eq!(a.channel(), a.channel());
    }

    #[test]
    fn test_underscore_split_shares_channel() {
        let left = SubscriptionTarget::new("a_b", "c").unwrap();
        let right = SubscriptionTarget::new("a", "b_c").unwrap();

        assert_ne!(left, right);
        assert_eq!(left.channel(), right.channel());
        assert_eq!(left.trigger_name(), right.trigger_name());
        assert_ne!(left.qualified_function(), right.qualified_function());
        assert_ne!(left.qualified_table(), right.qualified_table());
    }

    #[test]
    fn test_rejects_invalid_identifiers() {
        assert!(SubscriptionTarget::new("", "t").is_err());
        assert!(SubscriptionTarget::new("public", "").is_err());
        assert!(SubscriptionTarget::new("public", "1table").is_err());
        assert!(SubscriptionTarget::new("public", "a; DROP TABLE x").is_err());
        assert!(SubscriptionTarget::new("pub\"lic", "t").is_err());
        assert!(SubscriptionTarget::new("_private", "t_2").is_ok());
    }

    #[test]
    fn test_rejects_long_names() {
        let table = "t".repeat(50);
        let err = SubscriptionTarget::new("public", table).unwrap_err();
        assert!(matches!(err, Error::InvalidIdentifier(_)));
        assert!(!err.is_decode_error());
    }
}
