pub mod device_registrations;
pub mod invoices;
pub mod payment_methods;
pub mod plans;
pub mod processed_webhook_events;
pub mod subscriptions;
