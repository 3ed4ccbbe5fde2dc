//! Swarm state and the three scheduling loops that drive it.
//!
//! The [`Swarm`] value groups every piece of process-wide mutable
//! state; the choking, optimistic-unchoking, and request-driver loops
//! are periodic tasks spawned by the session that read and mutate it.

mod choker;
mod optimistic;
mod requester;
mod state;

pub use state::{Swarm, SwarmError};

pub(crate) use choker::choking_loop;
pub(crate) use optimistic::optimistic_loop;
pub(crate) use requester::request_loop;

#[cfg(test)]
mod tests;
