//! Trigger DDL generation.
//!
//! Each target gets its own trigger function with the channel name baked in,
//! so installing one table never changes where another table publishes.

use crate::target::SubscriptionTarget;

/// Query returning whether a trigger exists on a table.
///
/// Binds `$1` trigger name, `$2` schema, `$3` table.
pub const TRIGGER_EXISTS_SQL: &str = "SELECT EXISTS (\
    SELECT 1 FROM pg_catalog.pg_trigger t \
    JOIN pg_catalog.pg_class c ON c.oid = t.tgrelid \
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
    WHERE t.tgname = $1 AND n.nspname = $2 AND c.relname = $3)";

/// DDL statements that install or remove change notifications for a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerDdl {
    target: SubscriptionTarget,
}

impl TriggerDdl {
    /// Create the DDL generator for a target.
    pub fn for_target(target: &SubscriptionTarget) -> Self {
        Self {
            target: target.clone(),
        }
    }

    /// The target these statements apply to.
    pub fn target(&self) -> &SubscriptionTarget {
        &self.target
    }

    /// Trigger function that publishes every row change as a JSON payload.
    pub fn create_function(&self) -> String {
        format!(
            r#"CREATE OR REPLACE FUNCTION {function}() RETURNS TRIGGER AS $$
DECLARE
  notification json;
  v_old_data TEXT := '';
  v_new_data TEXT := '';
BEGIN
  IF (TG_OP = 'UPDATE') THEN
    v_old_data := row_to_json(OLD)::text;
    v_new_data := row_to_json(NEW)::text;
  ELSIF (TG_OP = 'DELETE') THEN
    v_old_data := row_to_json(OLD)::text;
  ELSIF (TG_OP = 'INSERT') THEN
    v_new_data := row_to_json(NEW)::text;
  END IF;
  notification := json_build_object(
    'schema', TG_TABLE_SCHEMA,
    'table', TG_TABLE_NAME,
    'action', TG_OP,
    'old_data', v_old_data,
    'new_data', v_new_data);
  PERFORM pg_notify('{channel}', notification::text);
  RETURN NULL;
END;
$$ LANGUAGE plpgsql"#,
            function = self.target.qualified_function(),
            channel = self.target.channel(),
        )
    }

    /// Drop the trigger if it exists.
    pub fn drop_trigger(&self) -> String {
        format!(
            "DROP TRIGGER IF EXISTS \"{}\" ON {}",
            self.target.trigger_name(),
            self.target.qualified_table()
        )
    }

    /// Create the row-level trigger for inserts, updates and deletes.
    pub fn create_trigger(&self) -> String {
        format!(
            "CREATE TRIGGER \"{}\" AFTER INSERT OR UPDATE OR DELETE ON {} \
             FOR EACH ROW EXECUTE PROCEDURE {}()",
            self.target.trigger_name(),
            self.target.qualified_table(),
            self.target.qualified_function()
        )
    }

    /// Drop the trigger function if it exists.
    pub fn drop_function(&self) -> String {
        format!(
            "DROP FUNCTION IF EXISTS {}()",
            self.target.qualified_function()
        )
    }

    /// Statements to install notifications, in execution order.
    ///
    /// Safe to re-run: the function is replaced and the trigger is dropped
    /// before it is recreated.
    pub fn install(&self) -> Vec<String> {
        vec![
            self.create_function(),
            self.drop_trigger(),
            self.create_trigger(),
        ]
    }

    /// Statements to remove notifications, in execution order.
    pub fn uninstall(&self) -> Vec<String> {
        vec![self.drop_trigger(), self.drop_function()]
    }
}
