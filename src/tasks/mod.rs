//! Background Tasks Module
//!
//! Contains background tasks that keep cache namespaces tidy while a
//! process runs.
//!
//! # Tasks
//! - Expiry flush: Removes expired entries of one namespace at a fixed interval

mod flush;

pub use flush::spawn_flush_task;
