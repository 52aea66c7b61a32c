pub mod credit_ledger;
pub mod plan_catalog;
pub mod renewal;
pub mod subscription;
pub mod webhook_processor;
