#![forbid(unsafe_code)]
//! Asynchronous virtual filesystem over SMB/CIFS shares.
//!
//! This crate stitches every server and share a client is connected to into
//! one POSIX-like namespace, with a current working directory, and keeps the
//! set of reachable servers current through NetBIOS discovery.
//!
//! # Overview
//!
//! The crate is a layer above an SMB client library. The wire protocol lives
//! behind the [`Transport`] / [`Connection`] traits and NetBIOS behind
//! [`NameService`]. Those calls are blocking, so they always run on tokio's
//! blocking pool and never stall the runtime's worker threads.
//!
//! - [`ConnectionRegistry`] owns one authenticated [`Session`] per server,
//!   reachable by canonical name and by dotted-quad address, and mounts shares
//!   lazily.
//! - [`VirtualFileSystem`] resolves paths against its current directory and
//!   translates them into registry lookups and transport calls.
//! - [`FileHandle`] wraps one open remote descriptor.
//! - [`DiscoveryService`] reports servers appearing and disappearing on the
//!   local network as a [`DiscoveryEvents`] stream.
//! - [`SmbContext`] ties a registry and a discovery service together.
//!
//! # Path space
//!
//! ```text
//! /                               connected servers
//! /<server>                       shares of one server
//! /<server>/<share>/<a>/<b>       inside a share, sent as "\a\b"
//! ```
//!
//! `<server>` is either the NetBIOS name or the dotted-quad address the
//! session was registered under.
//!
//! # Example
//!
//! ```ignore
//! use smbvfs::{Credentials, ServerIdentity, SmbContext};
//!
//! let ctx = SmbContext::new(my_transport, || MyNameService::new());
//! let srv = ServerIdentity::new("nas", "192.168.1.10".parse()?);
//! ctx.registry().connect(&srv, &Credentials::anonymous()).await?;
//!
//! let fs = ctx.filesystem();
//! fs.change_directory("/nas/media").await?;
//! for name in fs.list_directory("").await {
//!     println!("{}", name);
//! }
//!
//! let mut fh = fs.open_for_read("notes.txt").await?;
//! let body = fh.read_to_end().await?;
//! fh.close().await?;
//! ```
//!
//! # Error Handling
//!
//! Every fallible operation returns [`Result`], whose error is the crate-wide
//! [`Error`] enum. A transport error of kind `NotFound` surfaces as
//! [`Error::NotFound`]; other transport failures as [`Error::IoFailure`].
//!
//! # Logging
//!
//! The crate logs through the `log` facade and never installs a logger.
#[macro_use]
pub mod utils;
pub mod context;
pub mod discovery;
pub mod entry;
pub mod error;
pub mod handle;
pub mod path;
pub mod registry;
pub mod transport;
pub mod vfs;

#[cfg(test)]
mod testing;

pub use crate::context::SmbContext;
pub use crate::discovery::{DiscoveryConfig, DiscoveryEvent, DiscoveryEvents, DiscoveryService};
pub use crate::entry::{Credentials, ServerEntry, ServerIdentity};
pub use crate::error::Error;
pub use crate::handle::FileHandle;
pub use crate::path::{SharePath, VirtualPath};
pub use crate::registry::{ConnectionRegistry, Session, ShareConnection};
pub use crate::transport::{Access, Connection, Disposition, Fd, NameService, Stat, Transport, TreeId};
pub use crate::utils::Result;
pub use crate::vfs::VirtualFileSystem;
