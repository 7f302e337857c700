//! pgtrigger protocol types.
//!
//! This crate defines what travels over a PostgreSQL notification channel and
//! how the database side is named and installed. It performs no I/O.
//!
//! # Modules
//!
//! - [`message`] - Change messages and the notification payload codec
//! - [`target`] - Channel, trigger and function naming for a `(schema, table)` pair
//! - [`ddl`] - Trigger function and trigger DDL generation
//! - [`error`] - Protocol error types
//!
//! # Decoding
//!
//! ```
//! use pgtrigger_proto::{decode, Action};
//!
//! let raw = br#"{"schema":"public","table":"users","action":"INSERT","old_data":"","new_data":"{\"id\":1}"}"#;
//! let msg = decode(raw).unwrap();
//! assert_eq!(msg.action(), Action::Insert);
//! assert_eq!(msg.after().unwrap()["id"], 1);
//! ```

pub mod ddl;
pub mod error;
pub mod message;
pub mod target;

pub use ddl::{TriggerDdl, TRIGGER_EXISTS_SQL};
pub use error::{DecodeError, Error};
pub use message::{decode, Action, ChangeMessage};
pub use target::SubscriptionTarget;
