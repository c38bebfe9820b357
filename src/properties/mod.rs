//! # Property Model
//!
//! Per-type schemas, write-time constraints, and the per-node model store
//! that resolves effective values through model-parent links.
//!
//! Every mutation on the [`ModelStore`] returns a [`ModelChange`]: the
//! notifications it produced ([`ModelDelta`]) and the raw own-value writes it
//! performed ([`ModelWrite`]). Callers decide who hears about the deltas;
//! commands keep the writes to undo exactly what happened.

pub mod schema;
pub mod constraint;
pub mod store;

pub use schema::{PropertySchema, PropertySpec, PropertyCategory, SchemaBuilder, WILDCARD};
pub use constraint::{Constraint, CustomConstraint};
pub use store::{PropertyModel, ModelStore, ModelDelta, ModelWrite, ModelChange, ModelSnapshot};
