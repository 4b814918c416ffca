//! Relay logic: per-stream fan-out groups and the server manager
//!
//! A [`Group`] binds one publisher to N subscribers across the RTMP and
//! HTTP-FLV wire formats; the [`ServerManager`] owns both listeners, maps
//! stream names to groups and evicts empty groups once per second.

pub mod group;
pub mod manager;

pub use group::Group;
pub use manager::{ServerManager, ServerManagerConfig};
