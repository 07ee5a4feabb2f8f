//! Open remote files.

use {
    crate::{
        error::Error,
        registry::SessionInner,
        transport::{Connection, Fd},
        utils::{self, Result},
    },
    bytes::{Bytes, BytesMut},
    log::{debug, warn},
    std::{io::SeekFrom, sync::Arc},
    tokio::sync::Mutex,
};

/// One open descriptor on a remote file.
///
/// The remote cursor advances with sequential reads and writes and is
/// repositioned by the seek methods. Every operation takes `&mut self`,
/// so calls on one handle are serialized. Once the handle is closed, or its
/// session torn down, operations fail with [`Error::Closed`] or
/// [`Error::NotConnected`] instead of touching a stale descriptor.
///
/// Closing is idempotent. A handle dropped while open closes its descriptor
/// in the background.
pub struct FileHandle<C: Connection> {
    session: Arc<Mutex<SessionInner<C>>>,
    fd: Option<Fd>,
    path: String,
}

impl<C: Connection> FileHandle<C> {
    pub(crate) fn new(session: Arc<Mutex<SessionInner<C>>>, fd: Fd, path: String) -> FileHandle<C> {
        FileHandle {
            session,
            fd: Some(fd),
            path,
        }
    }

    /// Virtual path the handle was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    async fn with_file<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut C, Fd) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let fd = self.fd.ok_or(Error::Closed)?;
        let session = self.session.clone();
        utils::blocking(move || {
            let mut session = session.blocking_lock();
            f(session.file(fd)?, fd)
        })
        .await
    }

    pub async fn current_offset(&mut self) -> Result<u64> {
        self.with_file(|conn, fd| Ok(conn.file_seek(fd, SeekFrom::Current(0))?))
            .await
    }

    /// Remote file size, queried on every call.
    pub async fn length(&mut self) -> Result<u64> {
        self.with_file(|conn, fd| Ok(conn.file_stat(fd)?.size)).await
    }

    /// Read from the cursor to the end of the file.
    ///
    /// A cursor past the end yields an empty buffer.
    pub async fn read_to_end(&mut self) -> Result<Bytes> {
        self.with_file(|conn, fd| {
            let offset = conn.file_seek(fd, SeekFrom::Current(0))?;
            let length = conn.file_stat(fd)?.size;
            let remaining = usize::try_from(length.saturating_sub(offset))
                .map_err(|_| io_err!(OutOfMemory, "file too large to buffer"))?;
            read_loop(conn, fd, remaining)
        })
        .await
    }

    /// Read up to `len` bytes, stopping early only at end of file.
    pub async fn read(&mut self, len: usize) -> Result<Bytes> {
        self.with_file(move |conn, fd| read_loop(conn, fd, len)).await
    }

    /// Write all of `data` at the cursor.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        let data = Bytes::copy_from_slice(data);
        self.with_file(move |conn, fd| write_loop(conn, fd, &data))
            .await
    }

    /// Move the cursor to the end and return the length before the move.
    pub async fn seek_to_end(&mut self) -> Result<u64> {
        self.with_file(|conn, fd| {
            let length = conn.file_stat(fd)?.size;
            conn.file_seek(fd, SeekFrom::Start(length))?;
            Ok(length)
        })
        .await
    }

    pub async fn seek_to_offset(&mut self, offset: u64) -> Result<u64> {
        self.with_file(move |conn, fd| Ok(conn.file_seek(fd, SeekFrom::Start(offset))?))
            .await
    }

    /// Close the descriptor. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        let Some(fd) = self.fd.take() else {
            return Ok(());
        };

        let session = self.session.clone();
        utils::blocking(move || session.blocking_lock().close_file(fd)).await
    }
}

impl<C: Connection> Drop for FileHandle<C> {
    fn drop(&mut self) {
        let Some(fd) = self.fd.take() else {
            return;
        };

        let session = self.session.clone();
        let path = std::mem::take(&mut self.path);
        utils::detach_blocking(move || {
            if let Err(e) = session.blocking_lock().close_file(fd) {
                warn!("closing {} on drop failed: {}", path, e);
            }
        });
    }
}

/// Largest buffer extension per transport read.
const READ_CHUNK: usize = 64 * 1024;

/// Read until `len` bytes or end of file. The buffer grows with the data
/// actually received, never with the requested length.
fn read_loop<C: Connection>(conn: &mut C, fd: Fd, len: usize) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    while buf.len() < len {
        let filled = buf.len();
        let want = (len - filled).min(READ_CHUNK);
        buf.resize(filled + want, 0);

        match conn.file_read(fd, &mut buf[filled..]) {
            Ok(0) => {
                buf.truncate(filled);
                break;
            }
            Ok(n) => buf.truncate(filled + n.min(want)),
            Err(e) => {
                debug!("read on {:?} failed after {} bytes: {}", fd, filled, e);
                return Err(Error::IoFailure(e));
            }
        }
    }

    Ok(buf.freeze())
}

fn write_loop<C: Connection>(conn: &mut C, fd: Fd, data: &[u8]) -> Result<()> {
    let mut sent = 0;
    while sent < data.len() {
        match conn.file_write(fd, &data[sent..]) {
            Ok(0) => return Err(io_err!(WriteZero, "server accepted no bytes").into()),
            Ok(n) => sent += n.min(data.len() - sent),
            Err(e) => {
                debug!("write on {:?} failed after {} bytes: {}", fd, sent, e);
                return Err(Error::IoFailure(e));
            }
        }
    }

    Ok(())
}
