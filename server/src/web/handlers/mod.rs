// server/src/web/handlers/mod.rs

pub mod order_number_handlers;
pub mod retry_handlers;
pub mod webhook_handlers;
