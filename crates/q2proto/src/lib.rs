//! Codec for the Quake 2 family of network protocols.
//!
//! A server creates a [`ServerContext`] per connection from the negotiated
//! [`ConnectInfo`] and writes [`SvcMessage`]s; a client feeds received
//! packets to a [`ClientContext`], which learns the dialect from the
//! serverdata message. Entity and player states travel as deltas computed
//! by [`packing`].

pub mod bits;
pub mod checksum;
pub mod clc;
pub mod client;
mod common;
pub mod compression;
pub mod connect;
pub mod coords;
pub mod debug;
pub mod defs;
pub mod entity;
pub mod error;
mod extdemo;
pub mod io;
mod kex;
pub mod multicast;
pub mod packing;
pub mod protocol;
mod q2pro;
mod q2repro;
mod r1q2;
pub mod server;
pub mod solid;
pub mod sound;
pub mod svc;
pub mod tent;
mod vanilla;

pub use clc::ClcMessage;
pub use client::{ClientContext, ClientFeatures};
pub use connect::{Challenge, ConnectInfo};
pub use error::{Error, Result};
pub use io::{MsgRead, MsgReader, MsgWrite, SizeBuf};
pub use protocol::{GameApi, Protocol};
pub use server::{DownloadCompress, Gamestate, ServerContext, ServerFeatures, ServerInfo};
pub use svc::SvcMessage;
