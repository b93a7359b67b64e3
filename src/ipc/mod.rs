//! Inter-process channels: command request-reply, event publish/subscribe,
//! and the typed-command ingress. All sockets are loopback TCP carrying
//! newline-delimited UTF-8 frames.

pub mod command;
pub mod ingress;
pub mod protocol;
pub mod pubsub;
