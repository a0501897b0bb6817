// Notifications: templated messages persisted per recipient and pushed live
// over WebSockets. Delivery across processes goes through a Redis channel.

pub mod bus;
pub mod handlers;
pub mod registry;
pub mod service;
pub mod templates;
pub mod ws;
