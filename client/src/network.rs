//! Socket plumbing: the GUI listener and the server listener threads.
//!
//! Both threads share one [`ClientState`] mutex. The lock covers only the
//! translate/fold step; all socket I/O happens outside it. Fatal errors are
//! handed to the main thread over a single-slot channel, which then stops
//! both workers by closing the sockets out from under them.

use std::net::{IpAddr, Ipv6Addr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info};
use shared::{
    InputMessage, ReadBuffer, ServerMessage, TcpReadBuffer, TcpWriteBuffer, UdpReadBuffer,
    UdpWriteBuffer, Wire, WireError, WriteBuffer,
};
use thiserror::Error;

use crate::state::ClientState;

/// Why the client is going down.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("interrupted")]
    Interrupted,
    #[error("server connection failed: {0}")]
    Server(WireError),
    #[error("GUI socket failed: {0}")]
    Gui(WireError),
}

/// Everything the client needs from the command line.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub player_name: String,
    pub port: u16,
    pub gui_address: String,
    pub server_address: String,
}

/// Splits `HOST:PORT` at the last colon and resolves the host part.
/// Bracketed IPv6 literals are not supported.
pub fn resolve_address(address: &str) -> Result<SocketAddr, String> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| format!("'{}' is not a valid HOST:PORT address", address))?;
    let port: u16 = port
        .parse()
        .map_err(|_| format!("'{}' is not a valid port number", port))?;
    (host, port)
        .to_socket_addrs()
        .map_err(|e| format!("cannot resolve '{}': {}", address, e))?
        .next()
        .ok_or_else(|| format!("'{}' resolved to no addresses", address))
}

pub struct Client {
    state: Mutex<ClientState>,
    server: TcpStream,
    gui: Arc<UdpSocket>,
    gui_peer: SocketAddr,
    gui_port: u16,
    stopping: AtomicBool,
}

impl Client {
    /// Connects to the server (TCP, Nagle off) and binds the GUI socket on
    /// IPv6 `::`.
    pub fn connect(config: &ClientConfig) -> Result<Arc<Self>, String> {
        let server_addr = resolve_address(&config.server_address)?;
        // The GUI socket is dual-stack IPv6, so an IPv4 peer is reached
        // through its mapped form.
        let gui_peer = match resolve_address(&config.gui_address)? {
            SocketAddr::V4(addr) => {
                SocketAddr::new(IpAddr::V6(addr.ip().to_ipv6_mapped()), addr.port())
            }
            addr => addr,
        };

        let server = TcpStream::connect(server_addr)
            .map_err(|e| format!("cannot connect to server at {}: {}", server_addr, e))?;
        server
            .set_nodelay(true)
            .map_err(|e| format!("cannot disable Nagle: {}", e))?;

        let gui = UdpSocket::bind((Ipv6Addr::UNSPECIFIED, config.port))
            .map_err(|e| format!("cannot bind UDP port {}: {}", config.port, e))?;
        let gui_port = gui
            .local_addr()
            .map_err(|e| format!("cannot read GUI socket address: {}", e))?
            .port();

        info!(
            "connected to server at {}, sending to GUI at {}, listening for GUI on port {}",
            server_addr, gui_peer, gui_port
        );
        Ok(Arc::new(Self {
            state: Mutex::new(ClientState::new(config.player_name.clone())),
            server,
            gui: Arc::new(gui),
            gui_peer,
            gui_port,
            stopping: AtomicBool::new(false),
        }))
    }

    /// Port the GUI socket actually bound (useful when the config said 0).
    pub fn gui_port(&self) -> u16 {
        self.gui_port
    }

    /// GUI → server: decode datagrams, translate under the state lock, send
    /// over TCP. Malformed datagrams are dropped and the loop continues;
    /// anything else is fatal.
    pub fn gui_loop(&self) -> Result<(), ClientError> {
        let mut reader = UdpReadBuffer::new(Arc::clone(&self.gui));
        let stream = self
            .server
            .try_clone()
            .map_err(|e| ClientError::Server(WireError::Io(e)))?;
        let mut writer = TcpWriteBuffer::new(stream);

        loop {
            if self.stopping.load(Ordering::SeqCst) {
                return Err(ClientError::Interrupted);
            }
            reader.force_receive().map_err(ClientError::Gui)?;
            let input = match InputMessage::decode(&mut reader) {
                Ok(input) => input,
                Err(WireError::BadRead | WireError::BadType(_)) => {
                    debug!("dropped malformed GUI datagram");
                    continue;
                }
                Err(e) => return Err(ClientError::Gui(e)),
            };

            let outgoing = self.state.lock().unwrap().translate_input(&input);
            outgoing
                .encode(&mut writer)
                .and_then(|()| writer.force_send())
                .map_err(ClientError::Server)?;
        }
    }

    /// Server → GUI: decode messages, fold under the state lock, forward a
    /// fresh snapshot. Any failure on this side is fatal.
    pub fn server_loop(&self) -> Result<(), ClientError> {
        let stream = self
            .server
            .try_clone()
            .map_err(|e| ClientError::Server(WireError::Io(e)))?;
        let mut reader = TcpReadBuffer::new(stream);
        let mut writer = UdpWriteBuffer::new(Arc::clone(&self.gui), self.gui_peer);

        loop {
            if self.stopping.load(Ordering::SeqCst) {
                return Err(ClientError::Interrupted);
            }
            let message = ServerMessage::decode(&mut reader).map_err(ClientError::Server)?;
            let snapshot = self.state.lock().unwrap().apply(message);
            if let Some(snapshot) = snapshot {
                snapshot
                    .encode(&mut writer)
                    .and_then(|()| writer.force_send())
                    .map_err(ClientError::Gui)?;
            }
        }
    }

    /// Unblocks both worker threads so they can observe the stop flag: the
    /// TCP shutdown fails the server loop's read, and an empty self-datagram
    /// (which decodes as BadRead and is dropped) bounces the GUI listener
    /// back onto the flag check.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.server.shutdown(Shutdown::Both);
        let _ = self
            .gui
            .send_to(&[], (Ipv6Addr::LOCALHOST, self.gui_port));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_splits_at_last_colon() {
        let addr = resolve_address("127.0.0.1:8080").unwrap();
        assert_eq!(addr.port(), 8080);
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
    }

    #[test]
    fn test_resolve_rejects_missing_colon() {
        assert!(resolve_address("localhost").is_err());
    }

    #[test]
    fn test_resolve_rejects_bad_port() {
        assert!(resolve_address("localhost:notaport").is_err());
        assert!(resolve_address("localhost:99999").is_err());
    }
}
