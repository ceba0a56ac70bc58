//! Live RPC Test - end-to-end over loopback TCP
//!
//! Setiap test menjalankan server sendiri di port ephemeral.
//!
//! Usage:
//!   cargo test --test live_rpc_test -- --nocapture

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use pigeon::{Client, Payload, RpcError, Server, ServerConfig, ServerHandle, SessionState};

/// Wire constants (ditulis ulang di sini untuk test independence)
const FIND: u32 = 1;
const CALL: u32 = 2;
const CLOSE: u32 = 3;
const FAILURE: u32 = 1;
const SUCCESS: u32 = 2;

fn add2(input: &Payload) -> Option<Payload> {
    let rhs = *input.data2.as_ref()?.first()? as i8;
    Some(Payload::scalar(input.data1 as i8 as i64 + rhs as i64))
}

fn subtract2(input: &Payload) -> Option<Payload> {
    let rhs = *input.data2.as_ref()?.first()? as i8;
    Some(Payload::scalar(input.data1 as i8 as i64 - rhs as i64))
}

fn reverse(input: &Payload) -> Option<Payload> {
    let mut data = input.data2.clone()?;
    data.reverse();
    Some(Payload::with_data(input.data1, data))
}

struct TestServer {
    handle: ServerHandle,
    join: Option<JoinHandle<pigeon::Result<()>>>,
    port: u16,
}

impl TestServer {
    fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let server = Server::from_listener(listener, ServerConfig::default()).unwrap();
        server.register("add2", add2).unwrap();
        server.register("subtract2", subtract2).unwrap();
        server.register("reverse", reverse).unwrap();

        let port = server.local_addr().port();
        let (handle, join) = server.spawn().unwrap();
        Self {
            handle,
            join: Some(join),
            port,
        }
    }

    fn client(&self) -> Client {
        Client::new("127.0.0.1", self.port).unwrap()
    }

    fn raw(&self) -> TcpStream {
        let stream = TcpStream::connect(("127.0.0.1", self.port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.shutdown();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn read_u32(stream: &mut TcpStream) -> u32 {
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).unwrap();
    u32::from_be_bytes(buf)
}

fn find_frame(name: &str) -> Vec<u8> {
    let mut frame = FIND.to_be_bytes().to_vec();
    frame.extend_from_slice(&(name.len() as u16).to_be_bytes());
    frame.extend_from_slice(name.as_bytes());
    frame
}

fn call_frame(handle: u32, data1: u64, data2: &[u8]) -> Vec<u8> {
    let mut frame = CALL.to_be_bytes().to_vec();
    frame.extend_from_slice(&handle.to_be_bytes());
    frame.extend_from_slice(&data1.to_be_bytes());
    frame.extend_from_slice(&(data2.len() as u32).to_be_bytes());
    frame.extend_from_slice(data2);
    frame
}

/// True kalau server menutup koneksi tanpa mengirim apa-apa
fn closed_without_reply(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 1];
    matches!(stream.read(&mut buf), Ok(0))
}

#[test]
fn test_add2_scenario() {
    let server = TestServer::start();
    let mut client = server.client();

    let handle = client.find("add2").unwrap();
    assert_eq!(handle.index(), 0);

    let out = client
        .call(handle, &Payload::with_data(5, vec![100]))
        .unwrap();
    assert_eq!(out.data1, 105);
    assert_eq!(out.data2, None);
    assert_eq!(out.data2_len(), 0);
}

#[test]
fn test_subtract2_scenario() {
    let server = TestServer::start();
    let mut client = server.client();

    let handle = client.find("subtract2").unwrap();
    let out = client
        .call(handle, &Payload::with_data(0, vec![100]))
        .unwrap();
    assert_eq!(out.data1, -100);
    assert_eq!(out.data2, None);
}

#[test]
fn test_session_reused_across_calls() {
    let server = TestServer::start();
    let mut client = server.client();
    assert_eq!(client.state(), SessionState::Closed);

    let add = client.find("add2").unwrap();
    assert_eq!(client.state(), SessionState::Open);
    let sub = client.find("subtract2").unwrap();

    for i in 0..2 {
        let req = Payload::with_data(i, vec![100]);
        assert_eq!(client.call(add, &req).unwrap().data1, i + 100);
        assert_eq!(client.call(sub, &req).unwrap().data1, i - 100);
    }

    client.close();
    assert_eq!(client.state(), SessionState::Closed);
}

#[test]
fn test_find_missing_keeps_session() {
    let server = TestServer::start();
    let mut client = server.client();

    assert!(matches!(
        client.find("mul2"),
        Err(RpcError::FunctionNotFound(name)) if name == "mul2"
    ));
    assert!(client.is_open());

    let handle = client.find("add2").unwrap();
    assert_eq!(
        client
            .call(handle, &Payload::with_data(1, vec![2]))
            .unwrap()
            .data1,
        3
    );
}

#[test]
fn test_handler_failure_is_call_failed() {
    let server = TestServer::start();
    let mut client = server.client();

    // add2 requires exactly one data2 byte
    let handle = client.find("add2").unwrap();
    assert!(matches!(
        client.call(handle, &Payload::scalar(5)),
        Err(RpcError::CallFailed)
    ));
    assert!(client.is_open());
    assert_eq!(
        client
            .call(handle, &Payload::with_data(5, vec![1]))
            .unwrap()
            .data1,
        6
    );
}

#[test]
fn test_data2_roundtrip() {
    let server = TestServer::start();
    let mut client = server.client();

    let handle = client.find("reverse").unwrap();
    let data: Vec<u8> = (0..=255).cycle().take(100_000).collect();
    let out = client
        .call(handle, &Payload::with_data(-7, data.clone()))
        .unwrap();

    let mut expected = data;
    expected.reverse();
    assert_eq!(out.data1, -7);
    assert_eq!(out.data2, Some(expected));
}

#[test]
fn test_invalid_handle_raw() {
    let server = TestServer::start();
    let mut stream = server.raw();

    stream.write_all(&call_frame(42, 1, &[1])).unwrap();
    assert_eq!(read_u32(&mut stream), FAILURE);

    // Connection is still usable
    stream.write_all(&find_frame("subtract2")).unwrap();
    assert_eq!(read_u32(&mut stream), SUCCESS);
    assert_eq!(read_u32(&mut stream), 1);

    stream.write_all(&call_frame(1, 3, &[1])).unwrap();
    assert_eq!(read_u32(&mut stream), SUCCESS);
    let mut payload = [0u8; 12];
    stream.read_exact(&mut payload).unwrap();
    assert_eq!(&payload[..8], &2u64.to_be_bytes());
    assert_eq!(&payload[8..], &0u32.to_be_bytes());
}

#[test]
fn test_close_gets_no_reply() {
    let server = TestServer::start();
    let mut stream = server.raw();

    stream.write_all(&find_frame("add2")).unwrap();
    assert_eq!(read_u32(&mut stream), SUCCESS);
    assert_eq!(read_u32(&mut stream), 0);

    stream.write_all(&CLOSE.to_be_bytes()).unwrap();
    assert!(closed_without_reply(&mut stream));
}

#[test]
fn test_unknown_request_ends_connection() {
    let server = TestServer::start();
    let mut stream = server.raw();

    stream.write_all(&7u32.to_be_bytes()).unwrap();
    assert!(closed_without_reply(&mut stream));

    // Server is unaffected
    let mut client = server.client();
    assert!(client.find("add2").is_ok());
}

#[test]
fn test_invalid_name_on_wire() {
    let server = TestServer::start();
    let mut stream = server.raw();

    // Empty name
    stream.write_all(&FIND.to_be_bytes()).unwrap();
    stream.write_all(&0u16.to_be_bytes()).unwrap();
    assert_eq!(read_u32(&mut stream), FAILURE);

    // Control character
    stream.write_all(&find_frame("add\t2")).unwrap();
    assert_eq!(read_u32(&mut stream), FAILURE);

    stream.write_all(&find_frame("add2")).unwrap();
    assert_eq!(read_u32(&mut stream), SUCCESS);
}

#[test]
fn test_reregister_keeps_handle_for_new_sessions() {
    let server = TestServer::start();
    let mut before = server.client();
    let h_before = before.find("add2").unwrap();

    let replaced = server
        .handle
        .register("add2", |input: &Payload| -> Option<Payload> {
            Some(Payload::scalar(input.data1 * 1000))
        })
        .unwrap();
    assert_eq!(replaced.index(), h_before.index());

    // Existing session still sees its snapshot
    let req = Payload::with_data(2, vec![3]);
    assert_eq!(before.call(h_before, &req).unwrap().data1, 5);

    // New session sees the replacement through the same handle index
    let mut after = server.client();
    let h_after = after.find("add2").unwrap();
    assert_eq!(h_after, h_before);
    assert_eq!(after.call(h_after, &req).unwrap().data1, 2000);
}

#[test]
fn test_registration_snapshot_per_connection() {
    let server = TestServer::start();
    let mut early = server.client();
    early.find("add2").unwrap();

    server
        .handle
        .register("mul2", |input: &Payload| -> Option<Payload> {
            let rhs = *input.data2.as_ref()?.first()? as i64;
            Some(Payload::scalar(input.data1 * rhs))
        })
        .unwrap();

    assert!(matches!(
        early.find("mul2"),
        Err(RpcError::FunctionNotFound(_))
    ));

    let mut late = server.client();
    let handle = late.find("mul2").unwrap();
    assert_eq!(handle.index(), 3);
    assert_eq!(
        late.call(handle, &Payload::with_data(6, vec![7]))
            .unwrap()
            .data1,
        42
    );

    // Reopening gives the early client a fresh snapshot too
    early.close();
    assert!(early.find("mul2").is_ok());
}

#[test]
fn test_concurrent_sessions_are_isolated() {
    const THREADS: u64 = 8;
    const CALLS: u64 = 50;

    let server = TestServer::start();
    let ok = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let port = server.port;
            let ok = Arc::clone(&ok);
            thread::spawn(move || {
                let mut client = Client::new("127.0.0.1", port).unwrap();
                let handle = client.find("reverse").unwrap();
                for i in 0..CALLS {
                    let data = vec![t as u8, i as u8, 0xaa];
                    let out = client
                        .call(handle, &Payload::with_data((t * 1000 + i) as i64, data))
                        .unwrap();
                    assert_eq!(out.data1, (t * 1000 + i) as i64);
                    assert_eq!(out.data2, Some(vec![0xaa, i as u8, t as u8]));
                    ok.fetch_add(1, Ordering::Relaxed);
                }
                client.close();
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(ok.load(Ordering::Relaxed), THREADS * CALLS);
}

#[test]
fn test_stalled_connection_does_not_block_accepts() {
    let server = TestServer::start();

    // Half a frame, never completed
    let mut stalled = server.raw();
    stalled.write_all(&FIND.to_be_bytes()).unwrap();
    stalled.write_all(&[0]).unwrap();

    let mut client = server.client();
    let handle = client.find("add2").unwrap();
    assert_eq!(
        client
            .call(handle, &Payload::with_data(1, vec![1]))
            .unwrap()
            .data1,
        2
    );
}

#[test]
fn test_peer_hangup_drops_session() {
    // Plain listener that accepts and immediately hangs up
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let acceptor = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        drop(stream);
    });

    let mut client = Client::new("127.0.0.1", port).unwrap();
    let err = client.find("add2").unwrap_err();
    assert!(err.is_transport(), "unexpected error: {err}");
    assert_eq!(client.state(), SessionState::Closed);

    acceptor.join().unwrap();
}

#[test]
fn test_close_after_peer_hangup_still_closes() {
    // Answers one FIND, then hangs up with the session still open client-side
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let acceptor = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut frame = [0u8; 10];
        stream.read_exact(&mut frame).unwrap();
        assert_eq!(frame.to_vec(), find_frame("add2"));
        stream.write_all(&SUCCESS.to_be_bytes()).unwrap();
        stream.write_all(&0u32.to_be_bytes()).unwrap();
    });

    let mut client = Client::new("127.0.0.1", port).unwrap();
    assert_eq!(client.find("add2").unwrap().index(), 0);
    assert_eq!(client.state(), SessionState::Open);

    acceptor.join().unwrap();
    thread::sleep(Duration::from_millis(50));

    client.close();
    assert_eq!(client.state(), SessionState::Closed);
    client.close();
    assert_eq!(client.state(), SessionState::Closed);
}

#[test]
fn test_finished_workers_reaped_without_new_connections() {
    let server = TestServer::start();

    let mut streams: Vec<TcpStream> = (0..10).map(|_| server.raw()).collect();
    for stream in &mut streams {
        stream.write_all(&CLOSE.to_be_bytes()).unwrap();
    }
    // Every worker has seen its CLOSE once the server hangs up
    for stream in &mut streams {
        assert!(closed_without_reply(stream));
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while server.handle.active_workers() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(server.handle.active_workers(), 0);
}

#[test]
fn test_bind_conflict_is_startup_failure() {
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port,
        ..ServerConfig::default()
    };
    assert!(matches!(
        Server::bind(config),
        Err(RpcError::ConnectionFailed { .. })
    ));
}

#[test]
fn test_shutdown_stops_accept_loop() {
    let mut server = TestServer::start();
    server.handle.shutdown();

    let join = server.join.take().unwrap();
    assert!(join.join().unwrap().is_ok());
}
