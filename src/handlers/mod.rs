pub mod asset_handlers;
pub mod health_handlers;
pub mod media_handlers;
