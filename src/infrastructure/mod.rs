pub mod audit;
pub mod config;
pub mod gateway;
pub mod notifier;
pub mod paypal;
pub mod repository;
pub mod stripe;

pub use audit::*;
pub use config::*;
pub use gateway::*;
pub use notifier::*;
pub use paypal::*;
pub use repository::*;
pub use stripe::*;
