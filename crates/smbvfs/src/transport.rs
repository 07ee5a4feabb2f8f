//! Contract of the synchronous SMB client library this crate drives.
//!
//! Framing, authentication negotiation and encryption all live behind these
//! traits. Every call may block; the registry only ever invokes them from
//! tokio's blocking pool, and never concurrently for the same [`Connection`].

use {
    crate::entry::{Credentials, ServerIdentity},
    bitflags::bitflags,
    std::{
        io::{self, SeekFrom},
        net::Ipv4Addr,
        time::Duration,
    },
};

/// Tree id of a mounted share, assigned by the server.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeId(pub u32);

/// Descriptor of an open remote file, valid only within its session.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fd(pub u32);

bitflags! {
    /// Access mask requested when opening a remote file.
    #[derive(Copy, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Access: u32 {
        const READ       = 0x0000_0001;
        const WRITE      = 0x0000_0002;
        const APPEND     = 0x0000_0004;
        const READ_EXT   = 0x0000_0008;
        const WRITE_EXT  = 0x0000_0010;
        const READ_ATTR  = 0x0000_0080;
        const WRITE_ATTR = 0x0000_0100;
        const READ_CTL   = 0x0002_0000;

        const READ_ONLY = Self::READ.bits()
            | Self::READ_EXT.bits()
            | Self::READ_ATTR.bits()
            | Self::READ_CTL.bits();

        const READ_WRITE = Self::READ_ONLY.bits()
            | Self::WRITE.bits()
            | Self::APPEND.bits()
            | Self::WRITE_EXT.bits()
            | Self::WRITE_ATTR.bits();
    }
}

/// What to do when the target of an open does or does not exist.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Disposition {
    /// Open an existing file, fail if absent.
    #[default]
    Open,
    /// Create the file if absent, truncate it otherwise.
    Overwrite,
}

/// Metadata of a remote file or directory.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Stat {
    pub is_dir: bool,
    pub size: u64,
}

/// Factory for authenticated sessions.
pub trait Transport: Send + Sync + 'static {
    type Conn: Connection;

    /// Open a transport connection to the server. No login is performed.
    fn session_connect(&self, name: &str, addr: Ipv4Addr) -> io::Result<Self::Conn>;
}

/// One established connection to one server.
///
/// Paths are in wire form (see [`crate::path::to_wire`]). A connection is
/// not safe for concurrent use, hence `&mut self` throughout.
pub trait Connection: Send + 'static {
    fn login(&mut self, creds: &Credentials) -> io::Result<()>;

    /// Whether the server accepted the login as guest.
    fn is_guest(&self) -> bool;

    fn list_shares(&mut self) -> io::Result<Vec<String>>;

    fn tree_connect(&mut self, share: &str) -> io::Result<TreeId>;
    fn tree_disconnect(&mut self, tid: TreeId) -> io::Result<()>;

    fn stat(&mut self, tid: TreeId, path: &str) -> io::Result<Stat>;

    /// Names of entries matching `pattern`, which may include `.` and `..`.
    fn find(&mut self, tid: TreeId, pattern: &str) -> io::Result<Vec<String>>;

    fn mkdir(&mut self, tid: TreeId, path: &str) -> io::Result<()>;
    fn rmdir(&mut self, tid: TreeId, path: &str) -> io::Result<()>;
    fn rm_file(&mut self, tid: TreeId, path: &str) -> io::Result<()>;
    fn rename(&mut self, tid: TreeId, from: &str, to: &str) -> io::Result<()>;

    fn file_open(
        &mut self,
        tid: TreeId,
        path: &str,
        access: Access,
        disposition: Disposition,
    ) -> io::Result<Fd>;

    /// Read into `buf` at the remote cursor. `Ok(0)` means end of file.
    fn file_read(&mut self, fd: Fd, buf: &mut [u8]) -> io::Result<usize>;

    /// Write from `buf` at the remote cursor, returning the bytes accepted.
    fn file_write(&mut self, fd: Fd, buf: &[u8]) -> io::Result<usize>;

    /// Reposition the remote cursor and return the new offset.
    fn file_seek(&mut self, fd: Fd, pos: SeekFrom) -> io::Result<u64>;

    fn file_stat(&mut self, fd: Fd) -> io::Result<Stat>;
    fn file_close(&mut self, fd: Fd) -> io::Result<()>;

    /// Tear down the transport connection itself.
    fn disconnect(&mut self);
}

/// NetBIOS name service used for discovery and point lookups.
pub trait NameService: Send + Sync + 'static {
    fn resolve(&self, name: &str) -> Option<Ipv4Addr>;
    fn inverse(&self, addr: Ipv4Addr) -> Option<String>;

    /// Broadcast one query and collect every file server that answers
    /// within `window`.
    fn query(&self, window: Duration) -> io::Result<Vec<ServerIdentity>>;
}
