//! Event bus shared by loaders, batches and module systems

pub mod events;

pub use events::{Emitter, Event, Handler, ListenerId, Topic};
