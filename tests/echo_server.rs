//! End-to-end tests exercising the reactor against real sockets, in the
//! style of muduo's own echo/discard example tests: a helper spins up a
//! base loop on a background thread, a `Server` is wired up against it,
//! and a plain `std::net::TcpStream` plays the client.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reactor_core::event_loop::{EventLoop, LoopHandle};
use reactor_core::server::{ReusePort, Server};

use rand::RngCore;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn spawn_base_loop() -> LoopHandle {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let event_loop = EventLoop::new().expect("failed to build base event loop");
        tx.send(event_loop.handle()).unwrap();
        event_loop.run();
    });
    rx.recv().expect("base loop failed to start")
}

fn start_server(server: &Arc<Server>) {
    server.start(None);
    // start() hands listen() off to the base loop asynchronously; give it
    // a moment to begin accepting before the test client connects.
    thread::sleep(Duration::from_millis(50));
}

#[test]
fn echoes_a_single_message_back_to_the_client() {
    init_logging();
    let base_loop = spawn_base_loop();
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = Server::new(base_loop, "echo-test", addr, ReusePort::Disabled).unwrap();

    server.set_message_callback(Arc::new(|conn, buf, _ts| {
        let bytes = buf.retrieve_all_as_string();
        conn.send(bytes.into_bytes());
    }));

    let local_addr = server.local_addr().unwrap();
    start_server(&server);

    let mut client = TcpStream::connect(local_addr).unwrap();
    client.write_all(b"hello reactor").unwrap();

    let mut buf = [0u8; 64];
    let n = client.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello reactor");
}

#[test]
fn accumulates_partial_reads_across_several_writes() {
    init_logging();
    let base_loop = spawn_base_loop();
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = Server::new(base_loop, "accum-test", addr, ReusePort::Disabled).unwrap();

    // Only echo once a full line has arrived, exercising the buffer
    // holding partial data across multiple `handle_read` invocations.
    server.set_message_callback(Arc::new(|conn, buf, _ts| {
        if let Some(pos) = buf.peek().iter().position(|&b| b == b'\n') {
            let line = buf.retrieve_as_string(pos + 1);
            conn.send(line.into_bytes());
        }
    }));

    let local_addr = server.local_addr().unwrap();
    start_server(&server);

    let mut client = TcpStream::connect(local_addr).unwrap();
    client.write_all(b"hel").unwrap();
    thread::sleep(Duration::from_millis(20));
    client.write_all(b"lo\n").unwrap();

    let mut buf = [0u8; 64];
    let n = client.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello\n");
}

#[test]
fn shuts_down_gracefully_after_pending_output_drains() {
    init_logging();
    let base_loop = spawn_base_loop();
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = Server::new(base_loop, "shutdown-test", addr, ReusePort::Disabled).unwrap();

    server.set_connection_callback(Arc::new(|conn| {
        if conn.connected() {
            conn.send(b"bye".to_vec());
            conn.shutdown();
        }
    }));

    let local_addr = server.local_addr().unwrap();
    start_server(&server);

    let mut client = TcpStream::connect(local_addr).unwrap();
    let mut buf = Vec::new();
    client.read_to_end(&mut buf).unwrap();
    assert_eq!(buf, b"bye");
}

#[test]
fn high_watermark_fires_once_while_client_stalls() {
    init_logging();
    let base_loop = spawn_base_loop();
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = Server::new(base_loop, "watermark-test", addr, ReusePort::Disabled).unwrap();

    // 10 MiB at a 4 MiB watermark: the buffered amount must cross the
    // threshold exactly once on the way up, never once per append.
    const PAYLOAD_LEN: usize = 10 * 1024 * 1024;
    const WATERMARK: usize = 4 * 1024 * 1024;
    let mut payload = vec![0u8; PAYLOAD_LEN];
    rand::rng().fill_bytes(&mut payload);
    let payload = Arc::new(payload);

    let crossings = Arc::new(AtomicUsize::new(0));
    let crossings_for_cb = crossings.clone();
    server.set_high_water_mark_callback(Arc::new(move |conn, current| {
        crossings_for_cb.fetch_add(1, Ordering::SeqCst);
        assert!(current >= WATERMARK);
        assert!(conn.connected());
    }));

    let payload_for_cb = payload.clone();
    server.set_connection_callback(Arc::new(move |conn| {
        if conn.connected() {
            conn.set_high_water_mark(WATERMARK);
            conn.send((*payload_for_cb).clone());
        }
    }));

    let local_addr = server.local_addr().unwrap();
    start_server(&server);

    let mut client = TcpStream::connect(local_addr).unwrap();
    // Let the server's write buffer fill up well past the watermark
    // before the client starts draining it.
    thread::sleep(Duration::from_millis(200));

    let mut received = Vec::with_capacity(PAYLOAD_LEN);
    let mut buf = [0u8; 64 * 1024];
    while received.len() < PAYLOAD_LEN {
        let n = client.read(&mut buf).unwrap();
        assert!(n > 0, "server closed before sending the full payload");
        received.extend_from_slice(&buf[..n]);
    }

    assert_eq!(received, *payload);
    assert_eq!(crossings.load(Ordering::SeqCst), 1);
}

#[test]
fn distributes_connections_round_robin_across_worker_loops() {
    init_logging();
    let base_loop = spawn_base_loop();
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = Server::new(base_loop, "pool-test", addr, ReusePort::Disabled).unwrap();
    server.set_thread_num(4);

    let seen = Arc::new(AtomicUsize::new(0));
    let seen_for_cb = seen.clone();
    server.set_connection_callback(Arc::new(move |conn| {
        if conn.connected() {
            seen_for_cb.fetch_add(1, Ordering::SeqCst);
            conn.send(b"hi".to_vec());
        }
    }));

    let local_addr = server.local_addr().unwrap();
    start_server(&server);

    let mut clients = Vec::new();
    for _ in 0..8 {
        let mut client = TcpStream::connect(local_addr).unwrap();
        let mut buf = [0u8; 8];
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi");
        clients.push(client);
    }

    assert_eq!(seen.load(Ordering::SeqCst), 8);
}
