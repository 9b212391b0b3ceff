pub mod actions;
pub mod connection;
pub mod presence;
pub mod router;
pub mod ttl;

pub use actions::Gateway;
pub use presence::{ConnHandle, PresenceRegistry};
pub use router::{DeliveryEvent, DeliveryReport, DeliveryRouter};
pub use ttl::{SqliteTtlStore, TtlStore};
