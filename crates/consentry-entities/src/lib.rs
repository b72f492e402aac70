pub mod delivery_status;
pub mod rate_limit_counters;
pub mod webhook_deliveries;
pub mod webhook_endpoints;

pub use delivery_status::DeliveryStatus;
