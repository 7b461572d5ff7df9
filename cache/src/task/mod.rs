//! Background machinery: the expiry timer queue, the janitor thread that
//! fires it, the worker pool running prefetch and refresh loads, and the
//! buffer that batches hits for the eviction policy.

pub(crate) mod access_batcher;
pub(crate) mod janitor;
pub(crate) mod pool;
pub(crate) mod timer;
