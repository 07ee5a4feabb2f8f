//! In-memory SMB network for unit tests.

use {
    crate::{
        entry::{Credentials, ServerIdentity},
        transport::{Access, Connection, Disposition, Fd, NameService, Stat, Transport, TreeId},
    },
    std::{
        collections::{BTreeMap, HashMap, VecDeque},
        io::{self, SeekFrom},
        net::Ipv4Addr,
        sync::{Arc, Mutex, MutexGuard},
        thread::ThreadId,
        time::Duration,
    },
};

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

enum Node {
    Dir,
    File(Vec<u8>),
}

struct MockServer {
    identity: ServerIdentity,
    users: HashMap<String, String>,
    guest_fallback: bool,
    shares: BTreeMap<String, BTreeMap<String, Node>>,
}

#[derive(Default)]
struct NetState {
    servers: Vec<MockServer>,
    calls: usize,
    live_connections: usize,
    tree_disconnects: usize,
    bad_closes: usize,
    open_descriptors: usize,
    read_chunk: Option<usize>,
    write_chunk: Option<usize>,
    fail_reads: bool,
    fail_writes: bool,
    connect_delay: Option<Duration>,
    disconnect_threads: Vec<ThreadId>,
}

/// Split `/server/share/a/b` into server, share and wire path `\a\b`.
fn split(vpath: &str) -> (String, String, String) {
    let mut parts = vpath.trim_start_matches('/').splitn(3, '/');
    let server = parts.next().unwrap_or_default().to_owned();
    let share = parts.next().unwrap_or_default().to_owned();
    let rest = parts.next().unwrap_or_default();
    let wire = if rest.is_empty() {
        String::new()
    } else {
        format!("\\{}", rest.replace('/', "\\"))
    };
    (server, share, wire)
}

fn parent(wire: &str) -> &str {
    wire.rsplit_once('\\').map(|(p, _)| p).unwrap_or("")
}

/// Shared handle on a simulated network of servers.
#[derive(Clone, Default)]
pub(crate) struct MockNet {
    state: Arc<Mutex<NetState>>,
}

impl MockNet {
    pub(crate) fn new() -> MockNet {
        init_logger();
        MockNet::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn transport(&self) -> MockTransport {
        MockTransport { net: self.clone() }
    }

    pub(crate) fn server(&self, name: &str, addr: [u8; 4]) -> ServerIdentity {
        let identity = ServerIdentity::new(name, Ipv4Addr::from(addr));
        self.lock().servers.push(MockServer {
            identity: identity.clone(),
            users: HashMap::new(),
            guest_fallback: false,
            shares: BTreeMap::new(),
        });
        identity
    }

    fn with_server<R>(&self, name: &str, f: impl FnOnce(&mut MockServer) -> R) -> R {
        let mut state = self.lock();
        let server = state
            .servers
            .iter_mut()
            .find(|s| s.identity.name == name)
            .unwrap();
        f(server)
    }

    pub(crate) fn user(&self, server: &str, user: &str, pass: &str) {
        self.with_server(server, |s| {
            s.users.insert(user.to_owned(), pass.to_owned());
        });
    }

    pub(crate) fn guest_fallback(&self, server: &str) {
        self.with_server(server, |s| s.guest_fallback = true);
    }

    pub(crate) fn share(&self, server: &str, share: &str) {
        self.with_server(server, |s| {
            s.shares.insert(share.to_owned(), BTreeMap::new());
        });
    }

    pub(crate) fn dir(&self, vpath: &str) {
        let (server, share, wire) = split(vpath);
        self.with_server(&server, |s| {
            s.shares.get_mut(&share).unwrap().insert(wire, Node::Dir);
        });
    }

    pub(crate) fn file(&self, vpath: &str, data: &[u8]) {
        let (server, share, wire) = split(vpath);
        self.with_server(&server, |s| {
            s.shares
                .get_mut(&share)
                .unwrap()
                .insert(wire, Node::File(data.to_vec()));
        });
    }

    pub(crate) fn contents(&self, vpath: &str) -> Option<Vec<u8>> {
        let (server, share, wire) = split(vpath);
        self.with_server(&server, |s| match s.shares.get(&share)?.get(&wire)? {
            Node::File(data) => Some(data.clone()),
            Node::Dir => None,
        })
    }

    pub(crate) fn has_node(&self, vpath: &str) -> bool {
        let (server, share, wire) = split(vpath);
        self.with_server(&server, |s| {
            s.shares.get(&share).is_some_and(|t| t.contains_key(&wire))
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.lock().calls
    }

    pub(crate) fn live_connections(&self) -> usize {
        self.lock().live_connections
    }

    pub(crate) fn tree_disconnects(&self) -> usize {
        self.lock().tree_disconnects
    }

    pub(crate) fn bad_closes(&self) -> usize {
        self.lock().bad_closes
    }

    pub(crate) fn open_descriptors(&self) -> usize {
        self.lock().open_descriptors
    }

    pub(crate) fn set_read_chunk(&self, chunk: usize) {
        self.lock().read_chunk = Some(chunk);
    }

    pub(crate) fn set_write_chunk(&self, chunk: usize) {
        self.lock().write_chunk = Some(chunk);
    }

    pub(crate) fn fail_reads(&self) {
        self.lock().fail_reads = true;
    }

    pub(crate) fn fail_writes(&self) {
        self.lock().fail_writes = true;
    }

    pub(crate) fn set_connect_delay(&self, delay: Duration) {
        self.lock().connect_delay = Some(delay);
    }

    /// Threads on which connections were disconnected, in order.
    pub(crate) fn disconnect_threads(&self) -> Vec<ThreadId> {
        self.lock().disconnect_threads.clone()
    }

    /// Poll until `done` holds, giving detached teardown time to run.
    pub(crate) async fn settle(&self, done: impl Fn(&MockNet) -> bool) {
        for _ in 0..200 {
            if done(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

pub(crate) struct MockTransport {
    net: MockNet,
}

impl Transport for MockTransport {
    type Conn = MockConn;

    fn session_connect(&self, name: &str, addr: Ipv4Addr) -> io::Result<MockConn> {
        let delay = self.net.lock().connect_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.net.lock();
        let server = state
            .servers
            .iter()
            .position(|s| s.identity.name == name || s.identity.address == addr)
            .ok_or_else(|| io_err!(ConnectionRefused, "no route to host"))?;
        state.live_connections += 1;

        Ok(MockConn {
            net: self.net.clone(),
            server,
            guest: false,
            next_id: 1,
            trees: HashMap::new(),
            files: HashMap::new(),
        })
    }
}

struct OpenFile {
    share: String,
    path: String,
    cursor: u64,
    access: Access,
}

pub(crate) struct MockConn {
    net: MockNet,
    server: usize,
    guest: bool,
    next_id: u32,
    trees: HashMap<TreeId, String>,
    files: HashMap<Fd, OpenFile>,
}

impl MockConn {
    fn id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// Run `f` against the share mounted as `tid`, counting the call.
    fn tree<R>(
        &mut self,
        tid: TreeId,
        f: impl FnOnce(&mut BTreeMap<String, Node>) -> io::Result<R>,
    ) -> io::Result<R> {
        let share = self
            .trees
            .get(&tid)
            .ok_or_else(|| io_err!(InvalidInput, "bad tree id"))?
            .clone();
        let mut state = self.net.lock();
        state.calls += 1;
        let tree = state.servers[self.server]
            .shares
            .get_mut(&share)
            .ok_or_else(|| io_err!(NotFound, "share vanished"))?;
        f(tree)
    }

    fn open_file(&mut self, fd: Fd) -> io::Result<&mut OpenFile> {
        self.files
            .get_mut(&fd)
            .ok_or_else(|| io_err!(InvalidInput, "bad descriptor"))
    }

    fn with_data<R>(&mut self, fd: Fd, f: impl FnOnce(&mut Vec<u8>, &mut OpenFile, &NetState) -> io::Result<R>) -> io::Result<R> {
        let net = self.net.clone();
        let server = self.server;
        let file = self.open_file(fd)?;
        let mut state = net.lock();
        state.calls += 1;
        let snapshot = NetState {
            read_chunk: state.read_chunk,
            write_chunk: state.write_chunk,
            fail_reads: state.fail_reads,
            fail_writes: state.fail_writes,
            ..NetState::default()
        };
        match state.servers[server]
            .shares
            .get_mut(&file.share)
            .and_then(|t| t.get_mut(&file.path))
        {
            Some(Node::File(data)) => f(data, file, &snapshot),
            _ => Err(io_err!(NotFound, "file vanished")),
        }
    }
}

fn is_dir(tree: &BTreeMap<String, Node>, wire: &str) -> bool {
    wire.is_empty() || matches!(tree.get(wire), Some(Node::Dir))
}

impl Connection for MockConn {
    fn login(&mut self, creds: &Credentials) -> io::Result<()> {
        let mut state = self.net.lock();
        state.calls += 1;
        let server = &state.servers[self.server];
        if creds.is_anonymous() {
            self.guest = true;
            return Ok(());
        }
        match server.users.get(&creds.username) {
            Some(pass) if *pass == creds.password => {
                self.guest = false;
                Ok(())
            }
            _ if server.guest_fallback => {
                self.guest = true;
                Ok(())
            }
            _ => Err(io_err!(PermissionDenied, "logon failure")),
        }
    }

    fn is_guest(&self) -> bool {
        self.guest
    }

    fn list_shares(&mut self) -> io::Result<Vec<String>> {
        let mut state = self.net.lock();
        state.calls += 1;
        Ok(state.servers[self.server].shares.keys().cloned().collect())
    }

    fn tree_connect(&mut self, share: &str) -> io::Result<TreeId> {
        {
            let mut state = self.net.lock();
            state.calls += 1;
            if !state.servers[self.server].shares.contains_key(share) {
                return Err(io_err!(NotFound, "bad network name"));
            }
        }
        let tid = TreeId(self.id());
        self.trees.insert(tid, share.to_owned());
        Ok(tid)
    }

    fn tree_disconnect(&mut self, tid: TreeId) -> io::Result<()> {
        let mut state = self.net.lock();
        state.calls += 1;
        state.tree_disconnects += 1;
        self.trees
            .remove(&tid)
            .map(|_| ())
            .ok_or_else(|| io_err!(InvalidInput, "bad tree id"))
    }

    fn stat(&mut self, tid: TreeId, path: &str) -> io::Result<Stat> {
        self.tree(tid, |tree| {
            if path.is_empty() {
                return Ok(Stat {
                    is_dir: true,
                    size: 0,
                });
            }
            match tree.get(path) {
                Some(Node::Dir) => Ok(Stat {
                    is_dir: true,
                    size: 0,
                }),
                Some(Node::File(data)) => Ok(Stat {
                    is_dir: false,
                    size: data.len() as u64,
                }),
                None => Err(io_err!(NotFound, "no such file")),
            }
        })
    }

    fn find(&mut self, tid: TreeId, pattern: &str) -> io::Result<Vec<String>> {
        let dir = pattern
            .strip_suffix("\\*")
            .ok_or_else(|| io_err!(InvalidInput, "unsupported pattern"))?
            .to_owned();
        self.tree(tid, |tree| {
            if !is_dir(tree, &dir) {
                return Err(io_err!(NotFound, "no such directory"));
            }
            let mut names = vec![".".to_owned(), "..".to_owned()];
            names.extend(
                tree.keys()
                    .filter(|k| parent(k) == dir)
                    .filter_map(|k| k.rsplit_once('\\').map(|(_, n)| n.to_owned())),
            );
            Ok(names)
        })
    }

    fn mkdir(&mut self, tid: TreeId, path: &str) -> io::Result<()> {
        self.tree(tid, |tree| {
            if tree.contains_key(path) || path.is_empty() {
                return Err(io_err!(AlreadyExists, "exists"));
            }
            if !is_dir(tree, parent(path)) {
                return Err(io_err!(NotFound, "no parent"));
            }
            tree.insert(path.to_owned(), Node::Dir);
            Ok(())
        })
    }

    fn rmdir(&mut self, tid: TreeId, path: &str) -> io::Result<()> {
        self.tree(tid, |tree| {
            if !matches!(tree.get(path), Some(Node::Dir)) {
                return Err(io_err!(NotFound, "no such directory"));
            }
            if tree.keys().any(|k| parent(k) == path) {
                return Err(io_err!(Other, "directory not empty"));
            }
            tree.remove(path);
            Ok(())
        })
    }

    fn rm_file(&mut self, tid: TreeId, path: &str) -> io::Result<()> {
        self.tree(tid, |tree| match tree.get(path) {
            Some(Node::File(_)) => {
                tree.remove(path);
                Ok(())
            }
            _ => Err(io_err!(NotFound, "no such file")),
        })
    }

    fn rename(&mut self, tid: TreeId, from: &str, to: &str) -> io::Result<()> {
        self.tree(tid, |tree| {
            if !tree.contains_key(from) {
                return Err(io_err!(NotFound, "no such file"));
            }
            if tree.contains_key(to) || !is_dir(tree, parent(to)) {
                return Err(io_err!(AlreadyExists, "bad target"));
            }
            let prefix = format!("{}\\", from);
            let moved: Vec<String> = tree
                .keys()
                .filter(|k| *k == from || k.starts_with(&prefix))
                .cloned()
                .collect();
            for key in moved {
                if let Some(node) = tree.remove(&key) {
                    tree.insert(format!("{}{}", to, &key[from.len()..]), node);
                }
            }
            Ok(())
        })
    }

    fn file_open(
        &mut self,
        tid: TreeId,
        path: &str,
        access: Access,
        disposition: Disposition,
    ) -> io::Result<Fd> {
        let share = self.trees.get(&tid).cloned();
        self.tree(tid, |tree| match (tree.get(path), disposition) {
            (Some(Node::File(_)), Disposition::Open) => Ok(()),
            (Some(Node::Dir), _) => Err(io_err!(Other, "is a directory")),
            (None, Disposition::Open) => Err(io_err!(NotFound, "no such file")),
            (_, Disposition::Overwrite) => {
                if path.is_empty() || !is_dir(tree, parent(path)) {
                    return Err(io_err!(NotFound, "no parent"));
                }
                tree.insert(path.to_owned(), Node::File(Vec::new()));
                Ok(())
            }
        })?;

        self.net.lock().open_descriptors += 1;
        let fd = Fd(self.id());
        self.files.insert(
            fd,
            OpenFile {
                share: share.unwrap_or_default(),
                path: path.to_owned(),
                cursor: 0,
                access,
            },
        );
        Ok(fd)
    }

    fn file_read(&mut self, fd: Fd, buf: &mut [u8]) -> io::Result<usize> {
        self.with_data(fd, |data, file, net| {
            if net.fail_reads {
                return Err(io_err!(ConnectionReset, "connection reset"));
            }
            let start = (file.cursor as usize).min(data.len());
            let mut n = buf.len().min(data.len() - start);
            if let Some(chunk) = net.read_chunk {
                n = n.min(chunk);
            }
            buf[..n].copy_from_slice(&data[start..start + n]);
            file.cursor += n as u64;
            Ok(n)
        })
    }

    fn file_write(&mut self, fd: Fd, buf: &[u8]) -> io::Result<usize> {
        self.with_data(fd, |data, file, net| {
            if !file.access.contains(Access::WRITE) {
                return Err(io_err!(PermissionDenied, "opened read-only"));
            }
            if net.fail_writes {
                return Err(io_err!(ConnectionReset, "connection reset"));
            }
            let mut n = buf.len();
            if let Some(chunk) = net.write_chunk {
                n = n.min(chunk);
            }
            let start = file.cursor as usize;
            if data.len() < start + n {
                data.resize(start + n, 0);
            }
            data[start..start + n].copy_from_slice(&buf[..n]);
            file.cursor += n as u64;
            Ok(n)
        })
    }

    fn file_seek(&mut self, fd: Fd, pos: SeekFrom) -> io::Result<u64> {
        self.with_data(fd, |data, file, _| {
            let target = match pos {
                SeekFrom::Start(n) => n as i64,
                SeekFrom::Current(d) => file.cursor as i64 + d,
                SeekFrom::End(d) => data.len() as i64 + d,
            };
            if target < 0 {
                return Err(io_err!(InvalidInput, "negative offset"));
            }
            file.cursor = target as u64;
            Ok(file.cursor)
        })
    }

    fn file_stat(&mut self, fd: Fd) -> io::Result<Stat> {
        self.with_data(fd, |data, _, _| {
            Ok(Stat {
                is_dir: false,
                size: data.len() as u64,
            })
        })
    }

    fn file_close(&mut self, fd: Fd) -> io::Result<()> {
        let mut state = self.net.lock();
        state.calls += 1;
        if self.files.remove(&fd).is_none() {
            state.bad_closes += 1;
            return Err(io_err!(InvalidInput, "bad descriptor"));
        }
        state.open_descriptors -= 1;
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = self.net.lock();
        state.calls += 1;
        state.live_connections -= 1;
        state.disconnect_threads.push(std::thread::current().id());
    }
}

/// Scripted name service: each `query` pops the next round of answers,
/// repeating the last one once the script runs out.
#[derive(Clone, Default)]
pub(crate) struct MockNameService {
    table: Vec<ServerIdentity>,
    rounds: Arc<Mutex<VecDeque<io::Result<Vec<ServerIdentity>>>>>,
    last: Arc<Mutex<Vec<ServerIdentity>>>,
}

impl MockNameService {
    pub(crate) fn new(table: Vec<ServerIdentity>) -> MockNameService {
        init_logger();
        MockNameService {
            table,
            ..MockNameService::default()
        }
    }

    pub(crate) fn push_round(&self, round: io::Result<Vec<ServerIdentity>>) {
        self.rounds.lock().unwrap().push_back(round);
    }
}

impl NameService for MockNameService {
    fn resolve(&self, name: &str) -> Option<Ipv4Addr> {
        self.table.iter().find(|s| s.name == name).map(|s| s.address)
    }

    fn inverse(&self, addr: Ipv4Addr) -> Option<String> {
        self.table
            .iter()
            .find(|s| s.address == addr)
            .map(|s| s.name.clone())
    }

    fn query(&self, window: Duration) -> io::Result<Vec<ServerIdentity>> {
        let next = self.rounds.lock().unwrap().pop_front();
        match next {
            Some(Ok(seen)) => {
                *self.last.lock().unwrap() = seen.clone();
                Ok(seen)
            }
            Some(Err(e)) => Err(e),
            None => {
                std::thread::sleep(window);
                Ok(self.last.lock().unwrap().clone())
            }
        }
    }
}
