//! `groundtex-middleware` – The Nervous System
//!
//! Routes samples between the world backend and the capture pipeline without
//! caring what the samples mean.
//!
//! # Modules
//!
//! - [`bus`] – Headless, typed, topic-based publish/subscribe feed bus built
//!   on Tokio broadcast channels.
//! - [`adapter`] – The [`PoseService`] actuation trait every world backend
//!   implements.
//! - [`synchronizer`] – [`DataSynchronizer`], which turns independently timed
//!   feeds into "one fresh sample from each" rounds.

pub mod adapter;
pub mod bus;
pub mod synchronizer;

pub use adapter::PoseService;
pub use bus::{FeedBus, TopicReceiver};
pub use synchronizer::{DataSynchronizer, SampleBundle};
