//! Connection handling, broadcast fanout and the lobby→game→lobby service
//! loop.
//!
//! Threading model: one accept thread, one listener thread and one emitter
//! thread per connection, plus the service thread driving the simulation.
//! All sockets block; shutdown works by closing them out from under their
//! threads.
//!
//! Broadcasts are totally ordered: every append happens under the server
//! mutex, pushing an `Arc` of the message onto each connection's outbox.
//! The same critical section maintains a replay vector (the current lobby's
//! AcceptedPlayers, or the current game's GameStarted plus every Turn so
//! far) so a connection arriving mid-game is preloaded with the whole story
//! before it sees live traffic. Each emitter drains its own outbox at its
//! own pace; a slow client never stalls the simulation.
//!
//! Lock order: server mutex before any per-connection mutex; a connection's
//! input-slot mutex before the pending-count mutex; never two connection
//! mutexes at once.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io;
use std::net::{Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use shared::{ClientMessage, ServerMessage, TcpReadBuffer, TcpWriteBuffer, Wire, WriteBuffer};
use thiserror::Error;

use crate::game::{Engine, Rules};

/// Everything the server needs from the command line.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub rules: Rules,
    pub port: u16,
    pub turn_duration: Duration,
    pub seed: u32,
}

/// Why the service loop stopped.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("interrupted")]
    Interrupted,
}

/// One accepted TCP client.
struct Connection {
    id: u64,
    peer: SocketAddr,
    stream: TcpStream,
    outbox: Mutex<Outbox>,
    outbox_ready: Condvar,
    in_slot: Mutex<Option<ClientMessage>>,
    failed: AtomicBool,
}

#[derive(Default)]
struct Outbox {
    queue: VecDeque<Arc<ServerMessage>>,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    next_connection_id: u64,
    connections: BTreeMap<u64, Arc<Connection>>,
    replay: Vec<Arc<ServerMessage>>,
}

#[derive(Default)]
struct Pending {
    count: usize,
    shutdown: bool,
}

pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    shared: Mutex<Shared>,
    pending: Mutex<Pending>,
    pending_ready: Condvar,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
    /// Binds the acceptor on IPv6 `::`, which by OS policy also accepts
    /// IPv4-mapped connections.
    pub fn bind(config: ServerConfig) -> io::Result<Arc<Self>> {
        let listener = TcpListener::bind((Ipv6Addr::UNSPECIFIED, config.port))?;
        info!("listening on {}", listener.local_addr()?);
        Ok(Arc::new(Self {
            config,
            listener,
            shared: Mutex::new(Shared::default()),
            pending: Mutex::new(Pending::default()),
            pending_ready: Condvar::new(),
            threads: Mutex::new(Vec::new()),
        }))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Spawns the accept loop. The service loop is the caller's thread to
    /// place (see [`Server::serve`]).
    pub fn start(self: &Arc<Self>) {
        let server = Arc::clone(self);
        let handle = thread::spawn(move || server.accept_loop());
        self.threads.lock().unwrap().push(handle);
    }

    /// Lobby → game → lobby, forever, until shutdown interrupts it.
    pub fn serve(self: &Arc<Self>) -> Result<(), ServerError> {
        let mut engine = Engine::new(self.config.rules.clone(), self.config.seed);
        loop {
            let seats = self.collect_players(&mut engine)?;
            self.run_game(&mut engine, &seats)?;
            self.clear_game(&mut engine);
        }
    }

    /// Closes every socket, wakes every blocked thread and joins them.
    pub fn shutdown(&self) {
        {
            let mut pending = self.pending.lock().unwrap();
            pending.shutdown = true;
        }
        self.pending_ready.notify_all();

        for connection in self.snapshot_connections() {
            self.drop_connection(&connection);
        }

        // The blocked acceptor has no shutdown of its own; a loopback
        // connect bounces it into its shutdown check.
        if let Ok(addr) = self.listener.local_addr() {
            let _ = TcpStream::connect((Ipv6Addr::LOCALHOST, addr.port()));
        }

        let handles: Vec<JoinHandle<()>> = {
            let mut threads = self.threads.lock().unwrap();
            threads.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.join();
        }
        info!("server stopped");
    }

    fn is_shutdown(&self) -> bool {
        self.pending.lock().unwrap().shutdown
    }

    fn accept_loop(self: Arc<Self>) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if self.is_shutdown() {
                        return;
                    }
                    if let Err(e) = self.admit(stream, peer) {
                        warn!("failed to admit {}: {}", peer, e);
                    }
                }
                Err(e) => {
                    if self.is_shutdown() {
                        return;
                    }
                    warn!("accept failed: {}", e);
                    thread::sleep(Duration::from_millis(10));
                }
            }
        }
    }

    /// Registers a fresh connection and preloads its outbox with a Hello
    /// plus the replay, all under the server mutex so the snapshot and the
    /// live broadcast stream can't interleave.
    fn admit(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
        stream.set_nodelay(true)?;
        let read_half = stream.try_clone()?;
        let write_half = stream.try_clone()?;

        let connection = {
            let mut shared = self.shared.lock().unwrap();
            if self.is_shutdown() {
                let _ = stream.shutdown(Shutdown::Both);
                return Ok(());
            }
            let id = shared.next_connection_id;
            shared.next_connection_id += 1;
            let connection = Arc::new(Connection {
                id,
                peer,
                stream,
                outbox: Mutex::new(Outbox::default()),
                outbox_ready: Condvar::new(),
                in_slot: Mutex::new(None),
                failed: AtomicBool::new(false),
            });

            {
                let mut outbox = connection.outbox.lock().unwrap();
                outbox
                    .queue
                    .push_back(Arc::new(self.config.rules.hello()));
                outbox.queue.extend(shared.replay.iter().cloned());
            }
            connection.outbox_ready.notify_all();

            shared.connections.insert(id, Arc::clone(&connection));
            connection
        };
        info!("connection {} accepted from {}", connection.id, peer);

        let listener = {
            let server = Arc::clone(self);
            let connection = Arc::clone(&connection);
            thread::spawn(move || server.listen_loop(connection, read_half))
        };
        let emitter = {
            let server = Arc::clone(self);
            let connection = Arc::clone(&connection);
            thread::spawn(move || server.emit_loop(connection, write_half))
        };
        let mut threads = self.threads.lock().unwrap();
        threads.push(listener);
        threads.push(emitter);
        Ok(())
    }

    /// Reads client messages forever, keeping only the newest unconsumed one
    /// per connection. Any decode or transport error ends the connection.
    fn listen_loop(self: Arc<Self>, connection: Arc<Connection>, stream: TcpStream) {
        let mut reader = TcpReadBuffer::new(stream);
        loop {
            match ClientMessage::decode(&mut reader) {
                Ok(message) => self.store_incoming(&connection, message),
                Err(e) => {
                    debug!("connection {} read ended: {}", connection.id, e);
                    self.drop_connection(&connection);
                    return;
                }
            }
        }
    }

    fn store_incoming(&self, connection: &Connection, message: ClientMessage) {
        let mut slot = connection.in_slot.lock().unwrap();
        let was_empty = slot.is_none();
        *slot = Some(message);
        if was_empty {
            {
                let mut pending = self.pending.lock().unwrap();
                pending.count += 1;
            }
            self.pending_ready.notify_all();
        }
    }

    /// Writes broadcast messages in order as they land in the outbox.
    fn emit_loop(self: Arc<Self>, connection: Arc<Connection>, stream: TcpStream) {
        let mut writer = TcpWriteBuffer::new(stream);
        loop {
            let message = {
                let mut outbox = connection.outbox.lock().unwrap();
                loop {
                    if let Some(message) = outbox.queue.pop_front() {
                        break message;
                    }
                    if outbox.closed {
                        return;
                    }
                    outbox = connection.outbox_ready.wait(outbox).unwrap();
                }
            };
            let sent = message
                .encode(&mut writer)
                .and_then(|()| writer.force_send());
            if let Err(e) = sent {
                debug!("connection {} write ended: {}", connection.id, e);
                self.drop_connection(&connection);
                return;
            }
        }
    }

    /// Tears a connection down from either of its threads (or shutdown).
    /// Safe to call more than once.
    fn drop_connection(&self, connection: &Connection) {
        if connection.failed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = connection.stream.shutdown(Shutdown::Both);
        {
            let mut shared = self.shared.lock().unwrap();
            shared.connections.remove(&connection.id);
        }
        {
            let mut outbox = connection.outbox.lock().unwrap();
            outbox.closed = true;
        }
        connection.outbox_ready.notify_all();
        self.take_incoming(connection);
        info!("connection {} closed", connection.id);
    }

    fn snapshot_connections(&self) -> Vec<Arc<Connection>> {
        let shared = self.shared.lock().unwrap();
        shared.connections.values().cloned().collect()
    }

    /// Consumes a connection's pending message, releasing its pending count.
    /// The slot stays locked across the count update so a listener storing a
    /// new message can't interleave and leave the count out of step.
    fn take_incoming(&self, connection: &Connection) -> Option<ClientMessage> {
        let mut slot = connection.in_slot.lock().unwrap();
        let message = slot.take();
        if message.is_some() {
            let mut pending = self.pending.lock().unwrap();
            pending.count -= 1;
        }
        message
    }

    /// Blocks until some connection has a pending message, or shutdown.
    fn wait_for_pending(&self) -> Result<(), ServerError> {
        let mut pending = self.pending.lock().unwrap();
        while pending.count == 0 && !pending.shutdown {
            pending = self.pending_ready.wait(pending).unwrap();
        }
        if pending.shutdown {
            return Err(ServerError::Interrupted);
        }
        Ok(())
    }

    fn fanout(shared: &Shared, message: &Arc<ServerMessage>) {
        for connection in shared.connections.values() {
            {
                let mut outbox = connection.outbox.lock().unwrap();
                if outbox.closed {
                    continue;
                }
                outbox.queue.push_back(Arc::clone(message));
            }
            connection.outbox_ready.notify_all();
        }
    }

    fn broadcast_accepted(&self, message: ServerMessage) {
        let message = Arc::new(message);
        let mut shared = self.shared.lock().unwrap();
        shared.replay.push(Arc::clone(&message));
        Self::fanout(&shared, &message);
    }

    /// GameStarted and Turn 0 land in every outbox in one critical section,
    /// and the replay switches from lobby history to game history.
    fn broadcast_game_start(&self, started: ServerMessage, turn0: ServerMessage) {
        let started = Arc::new(started);
        let turn0 = Arc::new(turn0);
        let mut shared = self.shared.lock().unwrap();
        shared.replay = vec![Arc::clone(&started), Arc::clone(&turn0)];
        Self::fanout(&shared, &started);
        Self::fanout(&shared, &turn0);
    }

    fn broadcast_turn(&self, message: ServerMessage) {
        let message = Arc::new(message);
        let mut shared = self.shared.lock().unwrap();
        shared.replay.push(Arc::clone(&message));
        Self::fanout(&shared, &message);
    }

    /// GameEnded is not replayed: the same critical section clears the
    /// replay, so a connection arriving after it sees a fresh lobby.
    fn broadcast_game_end(&self, message: ServerMessage) {
        let message = Arc::new(message);
        let mut shared = self.shared.lock().unwrap();
        shared.replay.clear();
        Self::fanout(&shared, &message);
    }

    /// Lobby phase: consume pending messages until `player_count` distinct
    /// connections have joined. Non-Join lobby traffic is consumed and
    /// ignored, as are repeat Joins from an already-seated connection.
    /// Returns the seat order: `seats[player_id]` is the owning connection.
    fn collect_players(&self, engine: &mut Engine) -> Result<Vec<Arc<Connection>>, ServerError> {
        let mut seats = Vec::new();
        let mut seated: HashSet<u64> = HashSet::new();
        while !engine.lobby_full() {
            self.wait_for_pending()?;
            for connection in self.snapshot_connections() {
                if engine.lobby_full() {
                    break;
                }
                match self.take_incoming(&connection) {
                    Some(ClientMessage::Join { name }) if !seated.contains(&connection.id) => {
                        seated.insert(connection.id);
                        let accepted = engine.join(name, connection.peer.to_string());
                        seats.push(Arc::clone(&connection));
                        self.broadcast_accepted(accepted);
                    }
                    _ => {}
                }
            }
        }
        Ok(seats)
    }

    fn run_game(
        &self,
        engine: &mut Engine,
        seats: &[Arc<Connection>],
    ) -> Result<(), ServerError> {
        let (started, turn0) = engine.start();
        self.broadcast_game_start(started, turn0);

        for turn in 1..=engine.rules().game_length {
            thread::sleep(self.config.turn_duration);
            if self.is_shutdown() {
                return Err(ServerError::Interrupted);
            }
            let message = engine.tick(turn, |id| self.take_incoming(&seats[usize::from(id)]));
            self.broadcast_turn(message);
        }

        self.broadcast_game_end(engine.end());
        Ok(())
    }

    /// Back to a clean lobby: the engine forgets the game and every stale
    /// pending message (including leftover Joins) is discarded.
    fn clear_game(&self, engine: &mut Engine) {
        engine.reset();
        for connection in self.snapshot_connections() {
            self.take_incoming(&connection);
        }
    }
}
