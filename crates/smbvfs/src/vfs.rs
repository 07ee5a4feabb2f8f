//! Current-directory relative filesystem over every connected share.

use {
    crate::{
        error::Error,
        handle::FileHandle,
        path::{SharePath, VirtualPath},
        registry::{ConnectionRegistry, Session, ShareConnection},
        transport::{Access, Connection, Disposition, Stat, Transport},
        utils::Result,
    },
    log::{debug, info},
    std::sync::Arc,
    tokio::sync::RwLock,
};

type Mount<C> = (Arc<Session<C>>, ShareConnection);

/// POSIX-like façade translating virtual paths into registry lookups and
/// transport calls.
///
/// Relative inputs resolve against the current directory, which starts at
/// the root and only changes through [`change_directory`](Self::change_directory).
/// Shares are mounted lazily on first access.
pub struct VirtualFileSystem<T: Transport> {
    registry: Arc<ConnectionRegistry<T>>,
    cwd: RwLock<VirtualPath>,
}

impl<T: Transport> VirtualFileSystem<T> {
    pub fn new(registry: Arc<ConnectionRegistry<T>>) -> VirtualFileSystem<T> {
        VirtualFileSystem {
            registry,
            cwd: RwLock::new(VirtualPath::root()),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry<T>> {
        &self.registry
    }

    pub async fn current_directory(&self) -> VirtualPath {
        self.cwd.read().await.clone()
    }

    /// Resolve `input` against the current directory.
    pub async fn resolve(&self, input: &str) -> Result<VirtualPath> {
        self.cwd.read().await.resolve(input).ok_or_else(|| {
            debug!("cannot resolve {:?}", input);
            Error::PathInvalid(input.to_owned())
        })
    }

    /// Resolve `input` to a location inside a share.
    async fn locate(&self, input: &str) -> Result<SharePath> {
        self.resolve(input)
            .await?
            .parse(true)
            .ok_or_else(|| Error::PathInvalid(input.to_owned()))
    }

    async fn mount(&self, at: &SharePath) -> Result<Mount<T::Conn>> {
        self.registry.resolve_share(&at.server, &at.share).await
    }

    /// Change the current directory.
    ///
    /// The root always succeeds, a bare server needs a live session, anything
    /// deeper must be an existing directory. On failure nothing changes.
    pub async fn change_directory(&self, input: &str) -> Result<()> {
        let target = self.resolve(input).await?;

        if let Some(at) = target.parse(false) {
            if at.share.is_empty() {
                if self.registry.session(&at.server).await.is_none() {
                    return Err(Error::NotConnected(at.server));
                }
            } else if !self.directory_exists(&target.to_string()).await {
                return Err(Error::NotFound(target.to_string()));
            }
        }

        info!("cwd: {}", target);
        *self.cwd.write().await = target;
        Ok(())
    }

    /// Entries of `input`, or an empty list on any failure.
    ///
    /// Use [`try_list_directory`](Self::try_list_directory) to tell an empty
    /// directory apart from a failed listing.
    pub async fn list_directory(&self, input: &str) -> Vec<String> {
        self.try_list_directory(input).await.unwrap_or_else(|e| {
            debug!("list {:?}: {}", input, e);
            Vec::new()
        })
    }

    /// Entries of `input`.
    ///
    /// The root lists connected servers, a bare server lists its shares,
    /// anything else lists the directory without `.` and `..`.
    pub async fn try_list_directory(&self, input: &str) -> Result<Vec<String>> {
        let target = self.resolve(input).await?;
        let Some(at) = target.parse(false) else {
            let servers = self.registry.servers().await;
            return Ok(servers.into_iter().map(|s| s.name).collect());
        };

        if at.share.is_empty() {
            let session = self
                .registry
                .session(&at.server)
                .await
                .ok_or_else(|| Error::NotConnected(at.server.clone()))?;
            return session
                .run(|inner| Ok(inner.conn()?.list_shares()?))
                .await;
        }

        let (session, share) = self.mount(&at).await?;
        let pattern = at.wire_glob();
        session
            .run(move |inner| {
                let names = inner
                    .conn()?
                    .find(share.tid(), &pattern)
                    .map_err(|e| Error::from_transport(&at.path, e))?;
                Ok(names
                    .into_iter()
                    .filter(|n| n != "." && n != "..")
                    .collect())
            })
            .await
    }

    /// Metadata of `input`. A share root is a directory.
    pub async fn stat(&self, input: &str) -> Result<Stat> {
        let at = self.locate(input).await?;
        let (session, share) = self.mount(&at).await?;
        if at.is_share_root() {
            return Ok(Stat {
                is_dir: true,
                size: 0,
            });
        }

        let wire = at.wire_path();
        session
            .run(move |inner| {
                inner
                    .conn()?
                    .stat(share.tid(), &wire)
                    .map_err(|e| Error::from_transport(&wire, e))
            })
            .await
    }

    pub async fn exists(&self, input: &str) -> bool {
        self.stat(input).await.is_ok()
    }

    pub async fn directory_exists(&self, input: &str) -> bool {
        self.stat(input).await.is_ok_and(|st| st.is_dir)
    }

    pub async fn make_directory(&self, input: &str) -> Result<()> {
        let at = self.locate(input).await?;
        if at.is_share_root() {
            return res!(Error::UnsupportedOperation("share roots cannot be created"));
        }

        let (session, share) = self.mount(&at).await?;
        let wire = at.wire_path();
        session
            .run(move |inner| {
                inner
                    .conn()?
                    .mkdir(share.tid(), &wire)
                    .map_err(|e| Error::from_transport(&wire, e))
            })
            .await
    }

    /// Remove a file or directory without confirmation.
    ///
    /// A target that cannot be stat'ed is silently left alone.
    pub async fn remove(&self, input: &str) -> Result<()> {
        let at = self.locate(input).await?;
        if at.is_share_root() {
            return res!(Error::UnsupportedOperation("share roots cannot be removed"));
        }

        let (session, share) = self.mount(&at).await?;
        let wire = at.wire_path();
        session
            .run(move |inner| {
                let conn = inner.conn()?;
                let tid = share.tid();
                let st = match conn.stat(tid, &wire) {
                    Ok(st) => st,
                    Err(e) => {
                        debug!("remove {}: nothing to do: {}", wire, e);
                        return Ok(());
                    }
                };

                let removed = if st.is_dir {
                    conn.rmdir(tid, &wire)
                } else {
                    conn.rm_file(tid, &wire)
                };
                removed.map_err(|e| Error::from_transport(&wire, e))
            })
            .await
    }

    /// Rename `from` to `to` within a single share.
    ///
    /// Moves across servers or shares, and moves of a share root, fail
    /// before any transport call is made.
    pub async fn move_item(&self, from: &str, to: &str) -> Result<()> {
        let src = self.locate(from).await?;
        let dst = self.locate(to).await?;

        if src.is_share_root() || dst.is_share_root() {
            return res!(Error::UnsupportedOperation("share roots cannot be moved"));
        }
        if src.share != dst.share {
            return res!(Error::UnsupportedOperation("move across shares"));
        }
        if src.server != dst.server && !self.same_session(&src.server, &dst.server).await {
            return res!(Error::UnsupportedOperation("move across servers"));
        }

        let (session, share) = self.mount(&src).await?;
        let (from, to) = (src.wire_path(), dst.wire_path());
        session
            .run(move |inner| {
                inner
                    .conn()?
                    .rename(share.tid(), &from, &to)
                    .map_err(|e| Error::from_transport(&from, e))
            })
            .await
    }

    /// Whether two server keys alias one session (name vs. address).
    async fn same_session(&self, a: &str, b: &str) -> bool {
        match (self.registry.session(a).await, self.registry.session(b).await) {
            (Some(a), Some(b)) => Arc::ptr_eq(&a, &b),
            _ => false,
        }
    }

    async fn open(
        &self,
        input: &str,
        access: Access,
        disposition: Disposition,
    ) -> Result<FileHandle<T::Conn>> {
        let target = self.resolve(input).await?;
        let at = target
            .parse(true)
            .ok_or_else(|| Error::PathInvalid(input.to_owned()))?;
        if at.is_share_root() {
            return res!(Error::UnsupportedOperation("a share root is not a file"));
        }

        let (session, share) = self.mount(&at).await?;
        let wire = at.wire_path();
        let fd = session
            .run(move |inner| {
                let fd = inner
                    .conn()?
                    .file_open(share.tid(), &wire, access, disposition)
                    .map_err(|e| Error::from_transport(&wire, e))?;
                inner.register_file(fd);
                Ok(fd)
            })
            .await?;

        debug!("opened {} as {:?} ({:?})", target, fd, access);
        Ok(FileHandle::new(session.inner(), fd, target.to_string()))
    }

    pub async fn open_for_read(&self, input: &str) -> Result<FileHandle<T::Conn>> {
        self.open(input, Access::READ_ONLY, Disposition::Open).await
    }

    pub async fn open_for_write(&self, input: &str) -> Result<FileHandle<T::Conn>> {
        self.open(input, Access::READ_WRITE, Disposition::Open).await
    }

    /// Same access as [`open_for_write`](Self::open_for_write).
    pub async fn open_for_update(&self, input: &str) -> Result<FileHandle<T::Conn>> {
        self.open(input, Access::READ_WRITE, Disposition::Open).await
    }

    /// Open read-write, creating the file or truncating an existing one.
    pub async fn create_file(&self, input: &str) -> Result<FileHandle<T::Conn>> {
        self.open(input, Access::READ_WRITE, Disposition::Overwrite)
            .await
    }
}
