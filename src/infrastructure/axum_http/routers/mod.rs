pub mod devices;
pub mod invoices;
pub mod payments;
pub mod subscriptions;
pub mod webhooks;
