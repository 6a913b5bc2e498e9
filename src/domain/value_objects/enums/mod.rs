pub mod access_modes;
pub mod billing_cycles;
pub mod invoice_statuses;
pub mod payment_providers;
pub mod subscription_statuses;
