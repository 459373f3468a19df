pub mod keyed_lock;
pub mod snowflake;
pub mod uri;

pub use keyed_lock::{KeyedGuard, KeyedLocks};
