// server/src/services/mod.rs

pub mod http_effects;
pub mod janitor;

pub use http_effects::HttpEffects;
pub use janitor::spawn_janitor;
