pub mod devices;
pub mod invoices;
pub mod orchestration;
pub mod subscriptions;
pub mod webhooks;
