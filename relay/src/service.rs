//! The per-connection service loop.
//!
//! Each accepted connection walks a small state machine:
//!
//! ```text
//! Connecting -> AwaitingJoin -> Joined(role, name) -> Paired -> Forwarding -> Closed
//! ```
//!
//! A connection gets a reader loop (this thread) and a writer thread
//! draining its bounded outbound queue. After pairing, every inbound
//! payload frame is pushed verbatim onto the partner's queue; the relay
//! never parses forwarded bodies and never retries a failed write. Any
//! anomaly tears the room down.
use crate::config::RelayConfig;
use crate::registry::{Registry, RoomHandle, SINK_CAPACITY};
use caesar_lib::transport::{self, Frame};
use caesar_lib::{CaesarError, ControlMessage};
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use threadpool::ThreadPool;

/// Deadline for the first (join) frame on a fresh connection.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Accept connections forever, dispatching each to the worker pool.
pub fn serve(
    listener: TcpListener,
    registry: Arc<Registry>,
    config: &RelayConfig,
) -> io::Result<()> {
    let pool = ThreadPool::new(config.workers);
    log::info!(
        "serving on {} with {} workers",
        listener.local_addr()?,
        config.workers
    );

    for stream in listener.incoming() {
        match stream {
            Ok(connection) => {
                let registry = Arc::clone(&registry);
                pool.execute(move || {
                    if let Err(e) = handle_connection(connection, registry) {
                        log::debug!("connection ended: {}", e);
                    }
                });
            }
            Err(e) => log::warn!("accept failed: {}", e),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, registry: Arc<Registry>) -> Result<(), CaesarError> {
    let addr = stream.peer_addr()?;
    log::debug!("connection accepted from {}", addr);

    // AwaitingJoin: the first frame must carry a join record.
    stream.set_read_timeout(Some(JOIN_TIMEOUT))?;
    let (role, name) = match transport::read_frame(&mut stream)? {
        Frame::Control(body) => match ControlMessage::decode(&body) {
            Ok(ControlMessage::Join { role, name }) => (role, name),
            Ok(ControlMessage::Leave) => return Ok(()),
            _ => return Err(bad_request(stream, addr)),
        },
        Frame::Payload(_) => return Err(bad_request(stream, addr)),
    };
    stream.set_read_timeout(None)?;

    // All writes to this peer, ours and the partner's alike, funnel
    // through one bounded queue and one writer thread, preserving
    // arrival order per direction.
    let (sink, queue) = sync_channel::<Frame>(SINK_CAPACITY);
    let writer_stream = stream.try_clone()?;
    let writer = thread::spawn(move || writer_loop(writer_stream, queue));

    match registry.join(&name, role, sink.clone()) {
        Ok(handle) => {
            // The registry already queued our JoinAck{ok}, ordered
            // ahead of anything the partner can forward.
            log::info!("[{:.6}] {} joined from {}", name, role, addr);

            let result = forward_loop(&mut stream, &registry, &handle);
            registry.leave(&handle);
            match result {
                Ok(()) => log::info!("[{:.6}] {} disconnected", name, role),
                Err(ref e) => log::info!("[{:.6}] {} closed: {}", name, role, e),
            }
        }
        Err(status) => {
            log::info!("[{:.6}] {} refused: {:?}", name, role, status);
            send_control(&sink, ControlMessage::JoinAck { status });
        }
    }

    // Dropping the last sink lets the writer drain and hang up.
    drop(sink);
    let _ = writer.join();
    Ok(())
}

/// Forwarding mode: pass payload frames to the partner until either
/// side goes away. Control frames after joining are limited to `Leave`.
fn forward_loop(
    stream: &mut TcpStream,
    registry: &Registry,
    handle: &RoomHandle,
) -> Result<(), CaesarError> {
    loop {
        match transport::read_frame(stream) {
            Ok(Frame::Payload(body)) => registry.forward(handle, Frame::Payload(body))?,
            Ok(Frame::Control(body)) => match ControlMessage::decode(&body)? {
                ControlMessage::Leave => return Ok(()),
                _ => return Err(CaesarError::BadRequest),
            },
            Err(CaesarError::TransportClosed) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

fn writer_loop(mut stream: TcpStream, queue: Receiver<Frame>) {
    while let Ok(frame) = queue.recv() {
        if transport::write_frame(&mut stream, &frame).is_err() {
            break;
        }
    }
    let _ = stream.shutdown(Shutdown::Both);
}

fn send_control(sink: &SyncSender<Frame>, msg: ControlMessage) {
    if let Ok(body) = msg.encode() {
        let _ = sink.send(Frame::Control(body));
    }
}

fn bad_request(stream: TcpStream, addr: SocketAddr) -> CaesarError {
    log::debug!("bad rendezvous request from {}", addr);
    let _ = stream.shutdown(Shutdown::Both);
    CaesarError::BadRequest
}
