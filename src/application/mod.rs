pub mod accounts;
pub mod activation;
pub mod catalog;
pub mod error;
pub mod metering;
pub mod refund;
pub(crate) mod retry;
pub mod revocation;
pub mod scheduler;
pub mod webhooks;

pub use accounts::*;
pub use activation::*;
pub use catalog::*;
pub use error::*;
pub use metering::*;
pub use refund::*;
pub use revocation::*;
pub use scheduler::*;
pub use webhooks::*;
