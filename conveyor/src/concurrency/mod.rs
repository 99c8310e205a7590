//! Coordination primitives shared by the threaded pipeline and the cooperative scheduler.
//!
//! The [`shutdown`] module provides the stop signal every long-running role observes. It is
//! built on a watch channel so that the same signal can be checked synchronously by worker
//! threads (between two `get` timeouts) and awaited by cooperative tasks.

pub mod shutdown;
