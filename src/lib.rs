//! sshlaunch — bootstrap and supervise a remote agent over SSH.
//!
//! One SSH connection per agent: a long-lived execution session carries the
//! agent, short commands get their own channels, and closing the connection
//! reports how the agent ended and removes its jar from the remote host.

pub mod cli;
pub mod connection;
pub mod core;
pub mod error;
pub mod hostkey;
pub mod tasklog;
pub mod transport;
