pub mod err;
pub mod key;
pub mod proxy;
pub mod store;

pub use key::KeyCounter;
pub use proxy::{Priority, StoreProxy};
pub use store::ObjectStore;
