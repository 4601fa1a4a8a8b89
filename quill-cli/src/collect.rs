//! A minimal collector: prints each received entry and answers every call.

use anyhow::Context;
use bytes::BytesMut;
use quill_scribe::protocol::{self, ResultCode};
use std::io::{self, BufWriter, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use tracing::{debug, info, warn};

pub fn run(listen: &str, try_later: bool) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen).with_context(|| format!("binding {listen}"))?;
    let code = if try_later {
        ResultCode::TryLater
    } else {
        ResultCode::Ok
    };
    info!(addr = %listener.local_addr()?, reply = ?code, "Collector listening");

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                continue;
            }
        };
        let peer = stream.peer_addr().ok();
        std::thread::spawn(move || {
            if let Err(e) = serve(stream, code) {
                debug!(peer = ?peer, error = %e, "Collector connection ended");
            }
        });
    }
    Ok(())
}

fn serve(mut stream: TcpStream, code: ResultCode) -> anyhow::Result<()> {
    let peer: Option<SocketAddr> = stream.peer_addr().ok();
    debug!(peer = ?peer, "Collector connection accepted");
    let mut reply = BytesMut::new();

    loop {
        let mut prefix = [0u8; 4];
        match stream.read_exact(&mut prefix) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        let mut frame = vec![0u8; protocol::frame_len(prefix)?];
        stream.read_exact(&mut frame)?;
        let call = protocol::decode_log_call(&frame)?;

        if code == ResultCode::Ok {
            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            for entry in &call.entries {
                writeln!(out, "[{}] {}", entry.category, entry.message)?;
            }
            out.flush()?;
        }

        protocol::encode_log_reply(&mut reply, call.seq_id, code);
        stream.write_all(&reply)?;
    }
}
