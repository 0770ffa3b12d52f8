//! The room registry: transfer name to room, pairing, forwarding and
//! teardown.
//!
//! The registry owns every room; peer connections hold weak handles so
//! a room dies exactly when the registry drops it. All map mutations
//! happen under one mutex with short critical sections. Forwarding
//! clones the partner's sink under the room lock and writes only after
//! every lock is released, so a slow partner stalls its counterpart's
//! reader (backpressure) without stalling the registry.
use caesar_lib::transport::Frame;
use caesar_lib::{CaesarError, ControlMessage, JoinStatus, Role};
use std::collections::HashMap;
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

/// Bound on each connection's outbound queue; writers block when full.
pub const SINK_CAPACITY: usize = 64;

/// Unpaired rooms older than this are swept whenever a join arrives.
const STALE_ROOM_AGE: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RoomState {
    PendingReceiver,
    Paired,
    Closed,
}

/// Relay-side state for one pending or paired session.
pub struct Room {
    state: RoomState,
    sender_sink: Option<SyncSender<Frame>>,
    receiver_sink: Option<SyncSender<Frame>>,
    created: Instant,
}

impl Room {
    fn sink_slot(&mut self, role: Role) -> &mut Option<SyncSender<Frame>> {
        match role {
            Role::Sender => &mut self.sender_sink,
            Role::Receiver => &mut self.receiver_sink,
        }
    }
}

/// A peer connection's reference into its room. The registry keeps the
/// only strong reference; the handle going stale means the room is gone.
pub struct RoomHandle {
    pub name: String,
    pub role: Role,
    room: Weak<Mutex<Room>>,
}

#[derive(Default)]
pub struct Registry {
    rooms: Mutex<HashMap<String, Arc<Mutex<Room>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rooms currently known, pending or paired.
    pub fn room_count(&self) -> usize {
        self.lock_rooms().len()
    }

    /// Attach a peer under `name`. A sender creates the room; a
    /// receiver completes it and wakes the sender with `Paired`.
    ///
    /// On success the `JoinAck{ok}` is enqueued onto the joining peer's
    /// own sink here, while the locks are still held. That pins it
    /// ahead of anything the partner can forward: forwarding needs the
    /// room lock, and pairing needs the registry lock.
    pub fn join(
        &self,
        name: &str,
        role: Role,
        sink: SyncSender<Frame>,
    ) -> Result<RoomHandle, JoinStatus> {
        let mut rooms = self.lock_rooms();
        Self::purge_stale(&mut rooms);

        match role {
            Role::Sender => {
                if rooms.contains_key(name) {
                    return Err(JoinStatus::NameInUse);
                }
                acknowledge(&sink);
                let room = Arc::new(Mutex::new(Room {
                    state: RoomState::PendingReceiver,
                    sender_sink: Some(sink),
                    receiver_sink: None,
                    created: Instant::now(),
                }));
                let handle = RoomHandle {
                    name: name.to_string(),
                    role,
                    room: Arc::downgrade(&room),
                };
                rooms.insert(name.to_string(), room);
                log::info!("[{:.6}] room created, waiting for receiver", name);
                Ok(handle)
            }
            Role::Receiver => {
                let room_arc = rooms
                    .get(name)
                    .cloned()
                    .ok_or(JoinStatus::NoSuchTransfer)?;
                let mut room = lock_room(&room_arc);
                if room.state != RoomState::PendingReceiver {
                    return Err(JoinStatus::AlreadyPaired);
                }
                acknowledge(&sink);
                room.receiver_sink = Some(sink);
                room.state = RoomState::Paired;

                // Wake the sender. Its queue holds at most its own join
                // ack at this point, so a non-blocking send cannot clip.
                if let (Some(sender_sink), Ok(body)) =
                    (room.sender_sink.as_ref(), ControlMessage::Paired.encode())
                {
                    let _ = sender_sink.try_send(Frame::Control(body));
                }
                drop(room);

                log::info!("[{:.6}] paired", name);
                Ok(RoomHandle {
                    name: name.to_string(),
                    role,
                    room: Arc::downgrade(&room_arc),
                })
            }
        }
    }

    /// Push a frame to the partner's outbound queue. Blocks when the
    /// queue is full; no registry lock is held while blocked. A dead or
    /// missing partner closes the room.
    pub fn forward(&self, handle: &RoomHandle, frame: Frame) -> Result<(), CaesarError> {
        let partner = handle
            .room
            .upgrade()
            .and_then(|room_arc| {
                let room = lock_room(&room_arc);
                if room.state == RoomState::Paired {
                    match handle.role.partner() {
                        Role::Sender => room.sender_sink.clone(),
                        Role::Receiver => room.receiver_sink.clone(),
                    }
                } else {
                    None
                }
            })
            .ok_or(CaesarError::TransportClosed)?;

        if partner.send(frame).is_err() {
            self.leave(handle);
            return Err(CaesarError::TransportClosed);
        }
        Ok(())
    }

    /// Tear the room down from one side: remove it from the map, drop
    /// both sinks and signal the partner with `Leave`. Idempotent; a
    /// second leave on the same room is a no-op.
    pub fn leave(&self, handle: &RoomHandle) {
        let room_arc = match handle.room.upgrade() {
            Some(room) => room,
            None => return,
        };

        {
            let mut rooms = self.lock_rooms();
            if let Some(current) = rooms.get(&handle.name) {
                if Arc::ptr_eq(current, &room_arc) {
                    rooms.remove(&handle.name);
                }
            }
        }

        let partner = {
            let mut room = lock_room(&room_arc);
            if room.state == RoomState::Closed {
                return;
            }
            room.state = RoomState::Closed;
            room.sink_slot(handle.role).take();
            room.sink_slot(handle.role.partner()).take()
        };

        if let Some(sink) = partner {
            if let Ok(body) = ControlMessage::Leave.encode() {
                let _ = sink.try_send(Frame::Control(body));
            }
        }
        log::info!("[{:.6}] room closed by {}", handle.name, handle.role);
    }

    fn lock_rooms(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<Room>>>> {
        // A poisoned lock only means another connection thread panicked;
        // the map itself is still sound.
        match self.rooms.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn purge_stale(rooms: &mut HashMap<String, Arc<Mutex<Room>>>) {
        rooms.retain(|name, room_arc| {
            let room = lock_room(room_arc);
            let keep =
                room.state == RoomState::Paired || room.created.elapsed() < STALE_ROOM_AGE;
            if !keep {
                log::debug!("[{:.6}] purging stale pending room", name);
            }
            keep
        });
    }
}

fn lock_room(room: &Arc<Mutex<Room>>) -> MutexGuard<'_, Room> {
    match room.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Queue the success ack onto a freshly joined peer's empty sink.
fn acknowledge(sink: &SyncSender<Frame>) {
    if let Ok(body) = (ControlMessage::JoinAck {
        status: JoinStatus::Ok,
    })
    .encode()
    {
        let _ = sink.try_send(Frame::Control(body));
    }
}
