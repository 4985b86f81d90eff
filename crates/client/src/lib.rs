//! Job-progress delivery client.
//!
//! Submits background jobs to a [`JobRegistry`](registry::JobRegistry)
//! and follows their progress over a push stream, reconnecting with
//! linear backoff and degrading to polling when the stream cannot be
//! kept open. Progress is reduced into an [`ObserverState`](state::ObserverState)
//! and published to any number of subscribers by a
//! [`JobObserver`](observer::JobObserver).

pub mod api;
pub mod config;
pub mod controller;
pub mod events;
pub mod observer;
pub mod poll;
pub mod reconnect;
pub mod registry;
pub mod state;
pub mod stream;

pub use api::HttpJobRegistry;
pub use config::{ClientConfig, ConfigError, DeliveryConfig, Endpoints};
pub use events::ObserverEvent;
pub use observer::JobObserver;
pub use reconnect::{ChannelState, ReconnectPolicy};
pub use registry::{JobRegistry, Submission, SubmitRequest};
pub use state::{ObserverState, Transition};
