use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::io;

use log::{trace, warn};

use crate::codes::MsgCode;
use crate::message::NetMessage;

/// Default number of messages one recipient may receive per flush.
pub const DEFAULT_CAP_PER_RECIPIENT: usize = 3;

/// Low-level transmit hook the dispatcher and [`NetMessage::send`] write
/// finished frames into.
pub trait Transfer {
    type Handle: Clone + Eq + Hash + Debug;

    fn send(&mut self, to: &Self::Handle, frame: &[u8]) -> io::Result<()>;

    /// Sends to every player; with `to_admins` the frame also reaches
    /// admin recipients that are not players, each exactly once.
    fn broadcast(&mut self, frame: &[u8], to_admins: bool) -> io::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient<H> {
    Player(H),
    Broadcast { to_admins: bool },
}

impl<H> Recipient<H> {
    pub fn handle(&self) -> Option<&H> {
        match self {
            Recipient::Player(handle) => Some(handle),
            Recipient::Broadcast { .. } => None,
        }
    }
}

pub type MessageId = u64;

#[derive(Debug)]
struct Outgoing<H> {
    id: MessageId,
    code: MsgCode,
    recipient: Recipient<H>,
    message: NetMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Processed {
    Sent,
    Dropped,
    NoTransfer,
}

/// Owns every outgoing message between composition and transmission.
///
/// Messages are composed in a pending list, queued in FIFO order and
/// drained by [`MessageManager::send_pending_messages`]. A flush sends at
/// most `cap_per_recipient` messages to any one recipient; the rest stay
/// queued, in order, for the next flush. Broadcasts are never deferred.
pub struct MessageManager<T: Transfer> {
    transfer: Option<T>,
    pending: Vec<Outgoing<T::Handle>>,
    queue: VecDeque<Outgoing<T::Handle>>,
    cap_per_recipient: usize,
    next_id: MessageId,
}

impl<T: Transfer> MessageManager<T> {
    pub fn new(transfer: Option<T>) -> Self {
        Self {
            transfer,
            pending: Vec::new(),
            queue: VecDeque::new(),
            cap_per_recipient: DEFAULT_CAP_PER_RECIPIENT,
            next_id: 0,
        }
    }

    pub fn with_cap_per_recipient(mut self, cap: usize) -> Self {
        self.cap_per_recipient = cap.max(1);
        self
    }

    pub fn cap_per_recipient(&self) -> usize {
        self.cap_per_recipient
    }

    pub fn set_transfer(&mut self, transfer: Option<T>) {
        self.transfer = transfer;
    }

    pub fn transfer(&self) -> Option<&T> {
        self.transfer.as_ref()
    }

    pub fn transfer_mut(&mut self) -> Option<&mut T> {
        self.transfer.as_mut()
    }

    /// Starts composing a message. It is not sent until queued.
    pub fn begin(&mut self, code: MsgCode, recipient: Recipient<T::Handle>) -> MessageId {
        let id = self.allocate_id();
        self.pending.push(Outgoing {
            id,
            code,
            recipient,
            message: NetMessage::new(),
        });
        id
    }

    pub fn pending_mut(&mut self, id: MessageId) -> Option<&mut NetMessage> {
        self.pending
            .iter_mut()
            .find(|outgoing| outgoing.id == id)
            .map(|outgoing| &mut outgoing.message)
    }

    /// Moves a composed message to the tail of the outgoing queue.
    pub fn queue_message(&mut self, id: MessageId) -> bool {
        let Some(index) = self.pending.iter().position(|outgoing| outgoing.id == id) else {
            return false;
        };
        let outgoing = self.pending.remove(index);
        self.queue.push_back(outgoing);
        true
    }

    /// Queues an already composed message directly.
    pub fn queue(
        &mut self,
        code: MsgCode,
        recipient: Recipient<T::Handle>,
        message: NetMessage,
    ) -> MessageId {
        let id = self.allocate_id();
        self.queue.push_back(Outgoing {
            id,
            code,
            recipient,
            message,
        });
        id
    }

    pub fn send_to(&mut self, to: T::Handle, code: MsgCode, message: NetMessage) -> MessageId {
        self.queue(code, Recipient::Player(to), message)
    }

    pub fn broadcast(&mut self, code: MsgCode, message: NetMessage) -> MessageId {
        self.queue(code, Recipient::Broadcast { to_admins: false }, message)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queued_for(&self, handle: &T::Handle) -> usize {
        self.queue
            .iter()
            .filter(|outgoing| outgoing.recipient.handle() == Some(handle))
            .count()
    }

    /// One flush cycle. Returns the number of messages handed to the
    /// transfer.
    pub fn send_pending_messages(&mut self) -> usize {
        let mut sent_per_recipient: HashMap<T::Handle, usize> = HashMap::new();
        let mut leftovers = VecDeque::new();
        let mut sent = 0;

        while let Some(mut outgoing) = self.queue.pop_front() {
            let deferred = match outgoing.recipient.handle() {
                Some(handle) => {
                    let count = sent_per_recipient.entry(handle.clone()).or_default();
                    *count += 1;
                    *count > self.cap_per_recipient
                }
                None => false,
            };
            if deferred {
                leftovers.push_back(outgoing);
                continue;
            }

            match self.process(&mut outgoing) {
                Processed::Sent => sent += 1,
                Processed::Dropped => {}
                Processed::NoTransfer => leftovers.push_back(outgoing),
            }
        }

        self.queue = leftovers;
        sent
    }

    /// Discards every pending or queued message for `handle` without
    /// sending it.
    pub fn purge_messages(&mut self, handle: &T::Handle) -> usize {
        let before = self.pending.len() + self.queue.len();
        self.pending
            .retain(|outgoing| outgoing.recipient.handle() != Some(handle));
        self.queue
            .retain(|outgoing| outgoing.recipient.handle() != Some(handle));
        let purged = before - self.pending.len() - self.queue.len();
        if purged > 0 {
            trace!("purged {purged} messages for {handle:?}");
        }
        purged
    }

    /// Sends every queued message for `handle` now, in order, ignoring the
    /// per-recipient cap.
    pub fn flush_messages(&mut self, handle: &T::Handle) -> usize {
        let mut remaining = VecDeque::with_capacity(self.queue.len());
        let mut sent = 0;

        while let Some(mut outgoing) = self.queue.pop_front() {
            if outgoing.recipient.handle() != Some(handle) {
                remaining.push_back(outgoing);
                continue;
            }
            match self.process(&mut outgoing) {
                Processed::Sent => sent += 1,
                Processed::Dropped => {}
                Processed::NoTransfer => remaining.push_back(outgoing),
            }
        }

        self.queue = remaining;
        sent
    }

    fn process(&mut self, outgoing: &mut Outgoing<T::Handle>) -> Processed {
        let Some(transfer) = self.transfer.as_mut() else {
            return Processed::NoTransfer;
        };

        let result = match &outgoing.recipient {
            Recipient::Player(handle) => outgoing.message.send(transfer, handle, outgoing.code),
            Recipient::Broadcast { to_admins } => {
                outgoing
                    .message
                    .broadcast(transfer, outgoing.code, *to_admins)
            }
        };

        match result {
            Ok(()) => {
                trace!(
                    "sent {} ({} bytes) to {:?}",
                    outgoing.code,
                    outgoing.message.len(),
                    outgoing.recipient
                );
                Processed::Sent
            }
            Err(e) => {
                warn!(
                    "dropping {} for {:?}: {}",
                    outgoing.code, outgoing.recipient, e
                );
                Processed::Dropped
            }
        }
    }

    fn allocate_id(&mut self) -> MessageId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }
}
