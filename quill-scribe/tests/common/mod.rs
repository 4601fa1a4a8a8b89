#![allow(dead_code)]

use bytes::BytesMut;
use quill_scribe::protocol::{self, LogEntry, ResultCode};
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

// =============================================================================
// In-process collector
// =============================================================================

#[derive(Default)]
struct CollectorState {
    received: Mutex<Vec<LogEntry>>,
    try_later: AtomicBool,
    drop_replies: AtomicUsize,
    accepted: AtomicUsize,
    streams: Mutex<Vec<TcpStream>>,
}

/// A framed-protocol collector listening on 127.0.0.1.
pub struct TestCollector {
    addr: SocketAddr,
    state: Arc<CollectorState>,
    stopping: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TestCollector {
    pub fn start() -> Self {
        Self::bind("127.0.0.1:0")
    }

    pub fn bind(addr: &str) -> Self {
        let listener = TcpListener::bind(addr).unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(CollectorState::default());
        let stopping = Arc::new(AtomicBool::new(false));

        let handle = {
            let state = Arc::clone(&state);
            let stopping = Arc::clone(&stopping);
            std::thread::spawn(move || {
                for stream in listener.incoming() {
                    if stopping.load(Ordering::SeqCst) {
                        break;
                    }
                    let Ok(stream) = stream else { continue };
                    state.accepted.fetch_add(1, Ordering::SeqCst);
                    if let Ok(clone) = stream.try_clone() {
                        state.streams.lock().unwrap().push(clone);
                    }
                    let state = Arc::clone(&state);
                    std::thread::spawn(move || serve(stream, &state));
                }
            })
        };

        Self {
            addr,
            state,
            stopping,
            handle: Some(handle),
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn set_try_later(&self, on: bool) {
        self.state.try_later.store(on, Ordering::SeqCst);
    }

    /// Close the connection instead of answering the next `n` calls.
    pub fn drop_next_replies(&self, n: usize) {
        self.state.drop_replies.store(n, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<LogEntry> {
        self.state.received.lock().unwrap().clone()
    }

    pub fn accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        // Unblock accept().
        let _ = TcpStream::connect(self.addr);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        for stream in self.state.streams.lock().unwrap().drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for TestCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve(mut stream: TcpStream, state: &CollectorState) {
    let mut out = BytesMut::new();
    loop {
        let mut prefix = [0u8; 4];
        if stream.read_exact(&mut prefix).is_err() {
            return;
        }
        let Ok(len) = protocol::frame_len(prefix) else { return };
        let mut frame = vec![0u8; len];
        if stream.read_exact(&mut frame).is_err() {
            return;
        }
        let Ok(call) = protocol::decode_log_call(&frame) else { return };

        let dropped = state
            .drop_replies
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if dropped {
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }

        let code = if state.try_later.load(Ordering::SeqCst) {
            ResultCode::TryLater
        } else {
            state.received.lock().unwrap().extend(call.entries);
            ResultCode::Ok
        };
        protocol::encode_log_reply(&mut out, call.seq_id, code);
        if stream.write_all(&out).is_err() {
            return;
        }
    }
}

/// A local port with nothing listening on it.
pub fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
