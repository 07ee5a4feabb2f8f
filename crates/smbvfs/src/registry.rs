//! Live sessions and their mounted shares.
//!
//! # Ownership
//! A [`Session`] is one canonical record reachable under two index keys,
//! the server name and its dotted-quad address. Both keys are inserted and
//! removed together. The session exclusively owns its transport connection,
//! every [`ShareConnection`] mounted through it and the set of descriptors
//! opened on it; tearing it down closes all three exactly once.
//!
//! # Serialization
//! A connection is not safe for multiplexed use, so every transport call of
//! a session runs on the blocking pool while holding that session's lock.
//! Sessions of different servers never contend.

use {
    crate::{
        entry::{Credentials, ServerIdentity},
        error::Error,
        transport::{Connection, Fd, Transport, TreeId},
        utils::{self, Result},
    },
    log::{debug, info, warn},
    std::{
        collections::{BTreeMap, HashMap, HashSet},
        fmt,
        sync::{Arc, Mutex as StdMutex},
    },
    tokio::sync::{Mutex, RwLock},
};

/// A share mounted within a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShareConnection {
    name: String,
    tid: TreeId,
}

impl ShareConnection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tid(&self) -> TreeId {
        self.tid
    }
}

/// Mutable state of a session, only touched under the session lock.
pub(crate) struct SessionInner<C: Connection> {
    server: String,
    /// `None` once the session has been torn down.
    conn: Option<C>,
    shares: HashMap<String, ShareConnection>,
    open_files: HashSet<Fd>,
}

impl<C: Connection> SessionInner<C> {
    pub(crate) fn conn(&mut self) -> Result<&mut C> {
        self.conn
            .as_mut()
            .ok_or_else(|| Error::NotConnected(self.server.clone()))
    }

    /// Return the cached mount of `name`, tree-connecting on first use.
    pub(crate) fn share(&mut self, name: &str) -> Result<ShareConnection> {
        if let Some(share) = self.shares.get(name) {
            return Ok(share.clone());
        }

        let server = self.server.clone();
        let tid = self.conn()?.tree_connect(name).map_err(|e| {
            debug!("tree connect {}/{} failed: {}", server, name, e);
            Error::ShareUnavailable(format!("{}/{}", server, name))
        })?;
        debug!("mounted {}/{} as {:?}", server, name, tid);

        let share = ShareConnection {
            name: name.to_owned(),
            tid,
        };
        self.shares.insert(name.to_owned(), share.clone());
        Ok(share)
    }

    pub(crate) fn register_file(&mut self, fd: Fd) {
        self.open_files.insert(fd);
    }

    /// Connection for an operation on `fd`, provided the descriptor is live.
    pub(crate) fn file(&mut self, fd: Fd) -> Result<&mut C> {
        if !self.open_files.contains(&fd) {
            return match self.conn {
                Some(_) => Err(Error::Closed),
                None => Err(Error::NotConnected(self.server.clone())),
            };
        }
        self.conn()
    }

    /// Close `fd` unless teardown already did.
    pub(crate) fn close_file(&mut self, fd: Fd) -> Result<()> {
        if !self.open_files.remove(&fd) {
            return Ok(());
        }
        debug!("closing {:?} on {}", fd, self.server);
        self.conn()?.file_close(fd).map_err(Error::IoFailure)
    }

    fn teardown(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        for fd in self.open_files.drain() {
            if let Err(e) = conn.file_close(fd) {
                warn!("{}: failed to close {:?}: {}", self.server, fd, e);
            }
        }
        for (name, share) in self.shares.drain() {
            if let Err(e) = conn.tree_disconnect(share.tid) {
                warn!("{}: failed to disconnect share {}: {}", self.server, name, e);
            }
        }
        conn.disconnect();
    }
}

impl<C: Connection> Drop for SessionInner<C> {
    fn drop(&mut self) {
        if self.conn.is_none() {
            return;
        }

        let mut detached = SessionInner {
            server: self.server.clone(),
            conn: self.conn.take(),
            shares: std::mem::take(&mut self.shares),
            open_files: std::mem::take(&mut self.open_files),
        };
        utils::detach_blocking(move || detached.teardown());
    }
}

/// A logged-in connection not yet owned by a session.
///
/// Dropped unclaimed, for example when `connect` is cancelled, it
/// disconnects so the server-side session does not leak.
struct Unregistered<C: Connection>(Option<C>);

impl<C: Connection> Drop for Unregistered<C> {
    fn drop(&mut self) {
        if let Some(mut conn) = self.0.take() {
            debug!("dropping unregistered connection");
            utils::detach_blocking(move || conn.disconnect());
        }
    }
}

/// Keys held back for a `connect` in flight, released on drop.
struct Reservation<'a> {
    pending: &'a StdMutex<HashSet<String>>,
    keys: [String; 2],
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        for key in &self.keys {
            pending.remove(key);
        }
    }
}

/// One authenticated connection to one server.
pub struct Session<C: Connection> {
    identity: ServerIdentity,
    username: String,
    inner: Arc<Mutex<SessionInner<C>>>,
}

impl<C: Connection> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl<C: Connection> Session<C> {
    fn new(identity: ServerIdentity, username: String, mut conn: Unregistered<C>) -> Session<C> {
        let inner = SessionInner {
            server: identity.name.clone(),
            conn: conn.0.take(),
            shares: HashMap::new(),
            open_files: HashSet::new(),
        };

        Session {
            identity,
            username,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    /// Username given at connect time, empty for guest sessions.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Whether the transport connection is still up.
    pub async fn is_alive(&self) -> bool {
        self.inner.lock().await.conn.is_some()
    }

    pub(crate) fn inner(&self) -> Arc<Mutex<SessionInner<C>>> {
        self.inner.clone()
    }

    /// Run `f` under the session lock on the blocking pool.
    pub(crate) async fn run<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut SessionInner<C>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let inner = self.inner.clone();
        utils::blocking(move || {
            let mut inner = inner.blocking_lock();
            f(&mut inner)
        })
        .await
    }
}

/// Owns every live session, keyed by server name and by address.
pub struct ConnectionRegistry<T: Transport> {
    transport: Arc<T>,
    sessions: RwLock<HashMap<String, Arc<Session<T::Conn>>>>,
    /// Keys reserved by a `connect` still in flight. Only changed while
    /// `sessions` is write-locked, or by a dropped reservation.
    pending: StdMutex<HashSet<String>>,
}

impl<T: Transport> ConnectionRegistry<T> {
    pub fn new(transport: T) -> ConnectionRegistry<T> {
        ConnectionRegistry {
            transport: Arc::new(transport),
            sessions: RwLock::new(HashMap::new()),
            pending: StdMutex::new(HashSet::new()),
        }
    }

    /// Connect and log in to `identity`.
    ///
    /// Fails with `AlreadyConnected` if a session exists, or is being
    /// established, under either of its keys; there is no implicit
    /// reconnect. On any failure the half-built connection is torn down
    /// and nothing is registered. Cancelling the returned future releases
    /// both keys and disconnects whatever was established.
    pub async fn connect(&self, identity: &ServerIdentity, creds: &Credentials) -> Result<()> {
        let reservation = self.reserve(identity).await?;

        let transport = self.transport.clone();
        let (id, cr) = (identity.clone(), creds.clone());
        let conn = utils::blocking(move || {
            establish(&*transport, &id, &cr).map(|conn| Unregistered(Some(conn)))
        })
        .await?;

        let mut sessions = self.sessions.write().await;
        let session = Arc::new(Session::new(
            identity.clone(),
            creds.username.clone(),
            conn,
        ));
        for key in identity.keys() {
            sessions.insert(key, session.clone());
        }
        drop(reservation);

        info!(
            "connected to {} as {}",
            identity,
            if creds.is_anonymous() {
                "guest"
            } else {
                creds.username.as_str()
            }
        );
        Ok(())
    }

    async fn reserve(&self, identity: &ServerIdentity) -> Result<Reservation<'_>> {
        let keys = identity.keys();
        let sessions = self.sessions.write().await;
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if keys
            .iter()
            .any(|k| sessions.contains_key(k) || pending.contains(k))
        {
            return Err(Error::AlreadyConnected(identity.name.clone()));
        }
        pending.extend(keys.iter().cloned());

        Ok(Reservation {
            pending: &self.pending,
            keys,
        })
    }

    /// Drop the session of `identity` and tear it down. No-op if not connected.
    ///
    /// Callers must not have transport calls in flight on this session.
    pub async fn disconnect(&self, identity: &ServerIdentity) {
        let session = {
            let mut sessions = self.sessions.write().await;
            let found = identity
                .keys()
                .iter()
                .find_map(|k| sessions.get(k).cloned());
            let Some(session) = found else {
                return;
            };
            for key in session.identity.keys() {
                sessions.remove(&key);
            }
            session
        };

        let teardown = session.run(|inner| {
            inner.teardown();
            Ok(())
        });
        if let Err(e) = teardown.await {
            warn!("teardown of {} failed: {}", session.identity, e);
        }
        info!("disconnected from {}", session.identity);
    }

    pub async fn is_connected(&self, identity: &ServerIdentity) -> bool {
        let sessions = self.sessions.read().await;
        identity.keys().iter().any(|k| sessions.contains_key(k))
    }

    /// Whether the session of `identity` was established as `username`.
    pub async fn is_connected_as(&self, identity: &ServerIdentity, username: &str) -> bool {
        let sessions = self.sessions.read().await;
        identity
            .keys()
            .iter()
            .find_map(|k| sessions.get(k))
            .is_some_and(|s| s.username == username)
    }

    /// Session registered under `key`, a server name or address.
    pub async fn session(&self, key: &str) -> Option<Arc<Session<T::Conn>>> {
        self.sessions.read().await.get(key).cloned()
    }

    /// Identities of every connected server, sorted by name.
    pub async fn servers(&self) -> Vec<ServerIdentity> {
        let sessions = self.sessions.read().await;
        let unique: BTreeMap<_, _> = sessions
            .values()
            .map(|s| (s.identity.name.clone(), s.identity.clone()))
            .collect();
        unique.into_values().collect()
    }

    /// Session and mounted share for `key`/`share`, mounting on first use.
    pub async fn resolve_share(
        &self,
        key: &str,
        share: &str,
    ) -> Result<(Arc<Session<T::Conn>>, ShareConnection)> {
        let session = self
            .session(key)
            .await
            .ok_or_else(|| Error::NotConnected(key.to_owned()))?;

        let name = share.to_owned();
        let share = session.run(move |inner| inner.share(&name)).await?;
        Ok((session, share))
    }
}

fn establish<T: Transport>(
    transport: &T,
    identity: &ServerIdentity,
    creds: &Credentials,
) -> Result<T::Conn> {
    let mut conn = transport
        .session_connect(&identity.name, identity.address)
        .map_err(|source| Error::ServerUnreachable {
            server: identity.to_string(),
            source,
        })?;

    if let Err(e) = conn.login(creds) {
        debug!("login to {} failed: {}", identity, e);
        conn.disconnect();
        return Err(Error::AuthRejected(identity.name.clone()));
    }

    // Some servers report a successful login after silently falling back
    // to guest. That is a client library quirk rather than protocol
    // behaviour; explicit credentials must not end up as a guest session.
    if !creds.is_anonymous() && conn.is_guest() {
        warn!("{} demoted {} to guest", identity, creds.username);
        conn.disconnect();
        return Err(Error::AuthRejected(identity.name.clone()));
    }

    Ok(conn)
}
