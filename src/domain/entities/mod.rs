pub mod credit;
pub mod plan_tier;
pub mod retailer;
pub mod subscription;
pub mod subscription_status;
