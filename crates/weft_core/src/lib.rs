//! This module specifies the core data model for the [Weft](https://docs.rs/weft/) runtime:
//! fiber identities, failure causes, terminal exits, runtime flags, and
//! per-fiber contextual state.
//!
//! # Usage
//!
//! Please see the [the `weft` docs](https://docs.rs/weft/).
//!
//! # Features
//!
//! - `serde`: Implement `Serialize` and `Deserialize` where applicable.

#![cfg_attr(all(doc, CHANNEL_NIGHTLY), feature(doc_auto_cfg))]
#![deny(unused_must_use)]
#![warn(rust_2018_idioms, unreachable_pub)]

mod cause;
mod exit;
mod fiber_ref;
mod flags;
mod id;

pub use cause::{Cause, Defect};
pub use exit::Exit;
pub use fiber_ref::{FiberRef, FiberRefs};
pub use flags::{FlagsPatch, RuntimeFlags};
pub use id::{FiberId, RuntimeFiberId};
