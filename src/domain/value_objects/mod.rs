pub mod devices;
pub mod enums;
pub mod invoices;
pub mod plans;
pub mod purchases;
pub mod subscriptions;
pub mod webhook_events;
