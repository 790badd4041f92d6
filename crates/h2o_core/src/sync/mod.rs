//! # Synchronization Primitives for the Assembly Protocol
//!
//! ## The Problem
//!
//! ```text
//! O 1 ──┐
//! H 1 ──┼──> exactly one O and two H may bond at a time
//! H 2 ──┤
//! H 3 ──┘    (H 3 must not slip into the running triplet)
//! ```
//!
//! ## The Tools
//!
//! - [`Semaphore`]: counting permits. Wait queues for unmatched atoms, the
//!   "assembly in progress" latch and the shutdown turnstile.
//! - [`Rendezvous`]: reusable barrier with reset, parameterized by capacity.
//!   Used twice per molecule (assembly start, assembly finish).
//!
//! Both are closable: closing wakes every blocked thread with
//! [`AssemblyError::Aborted`](crate::AssemblyError::Aborted). Nothing else
//! ever unblocks a waiter early.

mod rendezvous;
mod semaphore;

pub use rendezvous::{Arrival, Rendezvous};
pub use semaphore::Semaphore;
