pub mod account;
pub mod notification;
pub mod payment_event;
pub mod plan;
pub mod refund_policy;
pub mod transaction;

pub use account::*;
pub use notification::*;
pub use payment_event::*;
pub use plan::*;
pub use refund_policy::*;
pub use transaction::*;
