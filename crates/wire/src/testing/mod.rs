//! Testing utilities for code that drives a [`Conversation`]
//!
//! - **RecordingConversation**: in-memory conversation that records every
//!   frame and answers exchanges from a per-segment script
//!
//! # Example
//!
//! ```ignore
//! use corelink_wire::testing::RecordingConversation;
//!
//! let conv = RecordingConversation::with_defaults();
//! conv.script_success(Segment::XaPrepare, &3i32.to_be_bytes());
//! // ... drive a resource ...
//! assert_eq!(conv.count(Segment::XaStart), 1);
//! ```

use crate::conversation::{Attachment, Conversation, HandshakeProperties, ThrottlingPolicy};
use crate::exception::{exception_reply, RemoteException};
use crate::frame::{ReplyFrame, RequestFrame};
use crate::segment::Segment;
use corelink_core::{xa, CommsError, CommsResult, Priority};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

static NEXT_CONVERSATION_ID: AtomicI32 = AtomicI32::new(1);

/// One frame handed to the conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedFrame {
    /// Segment the frame was sent on
    pub segment: Segment,
    /// Priority class it was sent at
    pub priority: Priority,
    /// Sent through `exchange` rather than `send`
    pub exchanged: bool,
    /// Exclusive flag passed by the caller
    pub exclusive: bool,
    /// Encoded frame body
    pub bytes: Vec<u8>,
}

impl RecordedFrame {
    /// Reader over the recorded body, for asserting on individual fields
    pub fn reader(&self) -> ReplyFrame {
        ReplyFrame::new(self.segment, self.bytes.clone())
    }
}

enum Scripted {
    Reply(ReplyFrame),
    Failure(CommsError),
}

/// Scripted in-memory conversation
///
/// Exchanges without a scripted reply succeed with a default payload:
/// prepare votes `XA_OK`, recover returns no Xids, get timeout returns 0, set
/// timeout is accepted, and create ordering context hands out 1, 2, 3, ...
pub struct RecordingConversation {
    handshake: HandshakeProperties,
    conversation_id: i32,
    link: Arc<Attachment>,
    local: Attachment,
    frames: Mutex<Vec<RecordedFrame>>,
    scripted: Mutex<HashMap<Segment, VecDeque<Scripted>>>,
    next_ordering_context: Mutex<i16>,
    broken: Mutex<Option<String>>,
}

impl RecordingConversation {
    /// Conversation on a fresh link
    pub fn new(handshake: HandshakeProperties) -> Self {
        Self::on_link(handshake, Arc::new(Attachment::new()))
    }

    /// Conversation on a fresh link to an engine with a random identity
    pub fn with_defaults() -> Self {
        Self::new(HandshakeProperties {
            me_uuid: Some(Uuid::new_v4()),
            ..HandshakeProperties::default()
        })
    }

    /// Another conversation multiplexed over the same link as `self`
    pub fn on_same_link(&self, handshake: HandshakeProperties) -> Self {
        Self::on_link(handshake, Arc::clone(&self.link))
    }

    fn on_link(handshake: HandshakeProperties, link: Arc<Attachment>) -> Self {
        Self {
            handshake,
            conversation_id: NEXT_CONVERSATION_ID.fetch_add(1, Ordering::Relaxed),
            link,
            local: Attachment::new(),
            frames: Mutex::new(Vec::new()),
            scripted: Mutex::new(HashMap::new()),
            next_ordering_context: Mutex::new(1),
            broken: Mutex::new(None),
        }
    }

    /// Answer the next exchange on `segment` with `reply`
    pub fn script_reply(&self, segment: Segment, reply: ReplyFrame) {
        self.push(segment, Scripted::Reply(reply));
    }

    /// Answer the next exchange on `segment` with a success carrying `payload`
    pub fn script_success(&self, segment: Segment, payload: &[u8]) {
        self.script_reply(segment, ReplyFrame::success(segment, payload));
    }

    /// Answer the next exchange on `segment` with a remote exception
    pub fn script_exception(&self, segment: Segment, exception: RemoteException) {
        match exception_reply(segment, &[exception]) {
            Ok(reply) => self.push(segment, Scripted::Reply(reply)),
            Err(e) => self.push(segment, Scripted::Failure(e)),
        }
    }

    /// Fail the next exchange or send on `segment` locally with `error`
    pub fn script_failure(&self, segment: Segment, error: CommsError) {
        self.push(segment, Scripted::Failure(error));
    }

    /// Fail every later call with `ConnectionLost`
    pub fn break_link(&self, reason: impl Into<String>) {
        *self.broken.lock() = Some(reason.into());
    }

    /// Every frame recorded so far, in order
    pub fn frames(&self) -> Vec<RecordedFrame> {
        self.frames.lock().clone()
    }

    /// Frames recorded on `segment`, in order
    pub fn frames_for(&self, segment: Segment) -> Vec<RecordedFrame> {
        self.frames
            .lock()
            .iter()
            .filter(|f| f.segment == segment)
            .cloned()
            .collect()
    }

    /// Number of frames recorded on `segment`
    pub fn count(&self, segment: Segment) -> usize {
        self.frames
            .lock()
            .iter()
            .filter(|f| f.segment == segment)
            .count()
    }

    /// Forget the recorded frames
    pub fn clear_frames(&self) {
        self.frames.lock().clear();
    }

    fn push(&self, segment: Segment, entry: Scripted) {
        self.scripted
            .lock()
            .entry(segment)
            .or_default()
            .push_back(entry);
    }

    fn next_scripted(&self, segment: Segment) -> Option<Scripted> {
        self.scripted
            .lock()
            .get_mut(&segment)
            .and_then(VecDeque::pop_front)
    }

    fn check_link(&self) -> CommsResult<()> {
        match self.broken.lock().as_ref() {
            Some(reason) => Err(CommsError::ConnectionLost(reason.clone())),
            None => Ok(()),
        }
    }

    fn record(
        &self,
        request: RequestFrame,
        segment: Segment,
        priority: Priority,
        exclusive: bool,
        exchanged: bool,
    ) {
        self.frames.lock().push(RecordedFrame {
            segment,
            priority,
            exchanged,
            exclusive,
            bytes: request.into_bytes(),
        });
    }

    fn default_reply(&self, segment: Segment) -> ReplyFrame {
        let mut payload = RequestFrame::new();
        match segment {
            Segment::XaPrepare => {
                payload.put_i32(xa::XA_OK);
            }
            Segment::XaRecover => {
                payload.put_i16(0);
            }
            Segment::XaGetTxTimeout => {
                payload.put_i32(0);
            }
            Segment::XaSetTxTimeout => {
                payload.put_bool(true);
            }
            Segment::CreateOrderingContext => {
                let mut next = self.next_ordering_context.lock();
                payload.put_i16(*next);
                *next = next.wrapping_add(1);
            }
            _ => {}
        }
        ReplyFrame::success(segment, payload.as_bytes())
    }
}

impl Conversation for RecordingConversation {
    fn exchange(
        &self,
        request: RequestFrame,
        segment: Segment,
        priority: Priority,
        exclusive: bool,
    ) -> CommsResult<ReplyFrame> {
        self.check_link()?;
        self.record(request, segment, priority, exclusive, true);
        match self.next_scripted(segment) {
            Some(Scripted::Reply(reply)) => Ok(reply),
            Some(Scripted::Failure(e)) => Err(e),
            None => Ok(self.default_reply(segment)),
        }
    }

    fn send(
        &self,
        request: RequestFrame,
        segment: Segment,
        priority: Priority,
        exclusive: bool,
        _throttle: ThrottlingPolicy,
    ) -> CommsResult<()> {
        self.check_link()?;
        self.record(request, segment, priority, exclusive, false);
        match self.next_scripted(segment) {
            Some(Scripted::Failure(e)) => Err(e),
            _ => Ok(()),
        }
    }

    fn handshake(&self) -> &HandshakeProperties {
        &self.handshake
    }

    fn conversation_id(&self) -> i32 {
        self.conversation_id
    }

    fn link_attachment(&self) -> &Attachment {
        &self.link
    }

    fn conversation_attachment(&self) -> &Attachment {
        &self.local
    }
}
