//! Wire-level domain types.

pub mod scn;
pub mod subscription;
pub mod xname;

pub use scn::Scn;
pub use subscription::{Subscription, SubscriptionDelete, SubscriptionList};
pub use xname::Xname;
