//! End-to-end test of the client bridging a fake GUI to a fake server over
//! real loopback sockets.

use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use client::network::{Client, ClientConfig};
use shared::{
    ClientMessage, DrawMessage, InputMessage, Player, ReadBuffer, ServerMessage, TcpReadBuffer,
    TcpWriteBuffer, UdpReadBuffer, UdpWriteBuffer, Wire, WriteBuffer,
};

struct FakeServer {
    reader: TcpReadBuffer<TcpStream>,
    writer: TcpWriteBuffer<TcpStream>,
}

impl FakeServer {
    fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().expect("accept client connection");
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        let reader = TcpReadBuffer::new(stream.try_clone().unwrap());
        let writer = TcpWriteBuffer::new(stream);
        Self { reader, writer }
    }

    fn send(&mut self, message: &ServerMessage) {
        message.encode(&mut self.writer).unwrap();
        self.writer.force_send().unwrap();
    }

    fn recv(&mut self) -> ClientMessage {
        ClientMessage::decode(&mut self.reader).expect("receive client message")
    }
}

fn hello() -> ServerMessage {
    ServerMessage::Hello {
        server_name: "fake".to_string(),
        player_count: 1,
        size_x: 8,
        size_y: 8,
        game_length: 10,
        explosion_radius: 2,
        bomb_timer: 3,
    }
}

#[test]
fn test_client_bridges_gui_and_server() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let server_addr = listener.local_addr().unwrap();

    let gui = Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap());
    gui.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    let gui_addr = gui.local_addr().unwrap();

    let config = ClientConfig {
        player_name: "tester".to_string(),
        port: 0,
        gui_address: format!("127.0.0.1:{}", gui_addr.port()),
        server_address: format!("127.0.0.1:{}", server_addr.port()),
    };
    let client = Client::connect(&config).expect("client connects");
    let client_port = client.gui_port();

    let gui_worker = {
        let client = Arc::clone(&client);
        thread::spawn(move || {
            let _ = client.gui_loop();
        })
    };
    let server_worker = {
        let client = Arc::clone(&client);
        thread::spawn(move || {
            let _ = client.server_loop();
        })
    };

    let mut server = FakeServer::accept(&listener);
    let mut gui_reader = UdpReadBuffer::new(Arc::clone(&gui));
    let client_udp: SocketAddr = format!("127.0.0.1:{}", client_port).parse().unwrap();
    let mut gui_writer = UdpWriteBuffer::new(Arc::clone(&gui), client_udp);

    // Hello is folded and forwarded as a Lobby snapshot.
    server.send(&hello());
    gui_reader.force_receive().unwrap();
    match DrawMessage::decode(&mut gui_reader).unwrap() {
        DrawMessage::Lobby {
            server_name,
            player_count,
            bomb_timer,
            ..
        } => {
            assert_eq!(server_name, "fake");
            assert_eq!(player_count, 1);
            assert_eq!(bomb_timer, 3);
        }
        other => panic!("expected Lobby snapshot, got {:?}", other),
    }

    // In the lobby, any GUI input turns into a Join.
    InputMessage::PlaceBomb.encode(&mut gui_writer).unwrap();
    gui_writer.force_send().unwrap();
    assert_eq!(
        server.recv(),
        ClientMessage::Join {
            name: "tester".to_string()
        }
    );

    // A malformed datagram is dropped without killing the bridge.
    gui.send_to(&[0xFF, 0x00], client_udp).unwrap();
    InputMessage::PlaceBlock.encode(&mut gui_writer).unwrap();
    gui_writer.force_send().unwrap();
    assert_eq!(
        server.recv(),
        ClientMessage::Join {
            name: "tester".to_string()
        }
    );

    // GameStarted is absorbed silently; the following turn produces the
    // first Game snapshot.
    server.send(&ServerMessage::GameStarted {
        players: std::collections::BTreeMap::from([(
            0,
            Player {
                name: "tester".to_string(),
                address: "addr".to_string(),
            },
        )]),
    });
    server.send(&ServerMessage::Turn {
        turn: 0,
        events: vec![],
    });
    gui_reader.force_receive().unwrap();
    match DrawMessage::decode(&mut gui_reader).unwrap() {
        DrawMessage::Game { turn, players, .. } => {
            assert_eq!(turn, 0);
            assert_eq!(players.len(), 1);
        }
        other => panic!("expected Game snapshot, got {:?}", other),
    }

    // Once the game runs, inputs pass through unchanged.
    InputMessage::PlaceBomb.encode(&mut gui_writer).unwrap();
    gui_writer.force_send().unwrap();
    assert_eq!(server.recv(), ClientMessage::PlaceBomb);

    client.stop();
    gui_worker.join().unwrap();
    server_worker.join().unwrap();
}
