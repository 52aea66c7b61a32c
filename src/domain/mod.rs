pub mod entities;
pub mod reconciliation;
