//! Multi-provider result fusion

pub mod reconciler;

pub use reconciler::{reconcile, FieldClass, PriorityTable, ResultReconciler};
