pub mod devices;
pub mod invoices;
pub mod payment_methods;
pub mod plans;
pub mod subscriptions;
pub mod webhook_events;
