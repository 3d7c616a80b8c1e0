// Copyright 2020 The Exonum Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The bounded event loop wiring network, timer and transaction input together (§5, §9).
//!
//! The teacher drives an analogous `Event` enum over `futures`/`tokio` because it also owns
//! the transport and the executor; neither is in scope here, so this reimplements the same
//! "one `Event` enum, one consumer loop" shape over `std::sync::mpsc` and plain threads.

use crate::crypto::PeerId;
use crate::messages::Message;
use crate::types::Transaction;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::time::Duration;

/// What a timeout fired for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    ViewChange,
    Keepalive,
    SyncBlock,
    PeerLiveness(PeerId),
}

/// A scheduled timeout, carried through the event loop like any other event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutRequest {
    pub height: u32,
    pub view_offset: u32,
    pub kind: TimeoutKind,
}

/// Requests the API surface can make of the running node; the JSON-RPC front-end itself is
/// out of scope, but a shutdown signal has to reach the event loop somehow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiRequest {
    Shutdown,
}

/// The tagged union dispatched by the single consumer loop (§9: "map to a tagged-union
/// message type dispatched by a single consumer loop; avoid per-event threads").
#[derive(Debug, Clone)]
pub enum Event {
    Network(PeerId, Message),
    Timeout(TimeoutRequest),
    Transaction(Transaction),
    Api(ApiRequest),
}

/// Implemented by the orchestration layer to react to dispatched events.
pub trait EventHandler {
    fn handle_event(&mut self, event: Event);
}

/// A handle producers use to push events without caring which source they came from.
#[derive(Clone)]
pub struct EventSender(SyncSender<Event>);

impl EventSender {
    /// Pushes an event, blocking if the bounded queue is full (the backpressure called out
    /// in §5: "producers block on backpressure").
    pub fn send(&self, event: Event) -> Result<(), mpsc::SendError<Event>> {
        self.0.send(event)
    }
}

impl std::fmt::Debug for EventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EventSender(..)")
    }
}

/// The bounded multi-producer single-consumer event queue described in §5: capacity 10,000
/// by default, one consumer loop, several producers (network reader, timer, transaction
/// intake, API).
pub struct EventQueue {
    sender: SyncSender<Event>,
    receiver: Receiver<Event>,
}

impl EventQueue {
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::sync_channel(capacity);
        Self { sender, receiver }
    }

    pub fn sender(&self) -> EventSender {
        EventSender(self.sender.clone())
    }

    /// Runs the single consumer loop until the channel is closed or `handler` asks to stop by
    /// returning `false` from a prior call is not supported; callers drive shutdown by
    /// sending `Event::Api(ApiRequest::Shutdown)` and have the handler stop pulling.
    pub fn run(&self, handler: &mut dyn EventHandler) {
        while let Ok(event) = self.receiver.recv() {
            let is_shutdown = matches!(event, Event::Api(ApiRequest::Shutdown));
            handler.handle_event(event);
            if is_shutdown {
                break;
            }
        }
    }

    /// Runs the single consumer loop like `run`, but dispatches to a plain closure instead of
    /// an `EventHandler`, so a caller that only needs interior mutability (e.g. a lock-guarded
    /// `Node`) does not have to hold `&mut` across threads.
    pub fn run_with(&self, mut f: impl FnMut(Event)) {
        while let Ok(event) = self.receiver.recv() {
            let is_shutdown = matches!(event, Event::Api(ApiRequest::Shutdown));
            f(event);
            if is_shutdown {
                break;
            }
        }
    }

    /// Pulls and dispatches a single event, waiting up to `timeout`. Used by tests that need
    /// deterministic single-step control instead of `run`'s blocking loop.
    pub fn step(&self, handler: &mut dyn EventHandler, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => {
                handler.handle_event(event);
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingHandler {
        received: Vec<Event>,
    }

    impl EventHandler for RecordingHandler {
        fn handle_event(&mut self, event: Event) {
            self.received.push(event);
        }
    }

    #[test]
    fn step_dispatches_one_pending_event() {
        let queue = EventQueue::bounded(8);
        queue
            .sender()
            .send(Event::Timeout(TimeoutRequest {
                height: 1,
                view_offset: 0,
                kind: TimeoutKind::ViewChange,
            }))
            .unwrap();
        let mut handler = RecordingHandler { received: vec![] };
        assert!(queue.step(&mut handler, Duration::from_millis(100)));
        assert_eq!(handler.received.len(), 1);
    }

    #[test]
    fn step_times_out_when_queue_is_empty() {
        let queue = EventQueue::bounded(8);
        let mut handler = RecordingHandler { received: vec![] };
        assert!(!queue.step(&mut handler, Duration::from_millis(10)));
    }

    #[test]
    fn run_stops_on_shutdown_request() {
        let queue = EventQueue::bounded(8);
        let sender = queue.sender();
        sender
            .send(Event::Timeout(TimeoutRequest {
                height: 1,
                view_offset: 0,
                kind: TimeoutKind::Keepalive,
            }))
            .unwrap();
        sender.send(Event::Api(ApiRequest::Shutdown)).unwrap();
        let mut handler = RecordingHandler { received: vec![] };
        queue.run(&mut handler);
        assert_eq!(handler.received.len(), 2);
    }

    #[test]
    fn run_with_dispatches_to_a_closure_and_stops_on_shutdown() {
        let queue = EventQueue::bounded(8);
        let sender = queue.sender();
        sender
            .send(Event::Timeout(TimeoutRequest {
                height: 1,
                view_offset: 0,
                kind: TimeoutKind::Keepalive,
            }))
            .unwrap();
        sender.send(Event::Api(ApiRequest::Shutdown)).unwrap();
        let mut count = 0;
        queue.run_with(|_event| count += 1);
        assert_eq!(count, 2);
    }
}
