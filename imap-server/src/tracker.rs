//! Mailbox & session trackers (spec.md §4.6 / C6): fan-out of
//! EXISTS/EXPUNGE/FETCH-flags updates from a shared mailbox to every
//! session that has it selected.
//!
//! spec.md §9 calls out the `MailboxTracker ↔ SessionTracker` pair as a
//! cyclic-reference hazard and asks for one-directional ownership: the
//! mailbox owns a set of `Arc<SessionTracker>` handles but does not
//! extend their lifetime decisions, and `Select`/`Unselect` on the
//! session side is the only place that joins or leaves that set. We
//! get this for free in Rust by having `MailboxTracker` hold `Weak`
//! references — a tracker that's been dropped by its owning connection
//! simply stops receiving updates instead of resurrecting.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::Notify;

use imap_types::Flag;

/// One queued mailbox-change notification (spec.md §3 "Update").
#[derive(Debug, Clone)]
pub enum Update {
    Exists(u32),
    Expunge(u32),
    FetchFlags { seq: u32, uid: u32, flags: Vec<Flag> },
}

#[derive(Default)]
struct MailboxState {
    num_messages: u32,
    uid_validity: u32,
    uid_next: u32,
    subscribers: HashMap<usize, Weak<SessionTracker>>,
    next_subscriber_id: usize,
}

/// Shared state for one mailbox, held by whatever owns mailboxes in the
/// backend (typically behind an `Arc` keyed by mailbox name, with
/// trackers created lazily on first SELECT and dropped once the last
/// subscriber detaches — spec.md §3 "a tracker for a mailbox exists
/// while ≥1 session is selected on it").
pub struct MailboxTracker {
    name: String,
    state: Mutex<MailboxState>,
}

impl MailboxTracker {
    pub fn new(name: impl Into<String>, num_messages: u32, uid_validity: u32, uid_next: u32) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(MailboxState {
                num_messages,
                uid_validity,
                uid_next,
                subscribers: HashMap::new(),
                next_subscriber_id: 0,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_messages(&self) -> u32 {
        self.state.lock().unwrap().num_messages
    }

    fn subscribe(&self, tracker: &Arc<SessionTracker>) -> usize {
        let mut state = self.state.lock().unwrap();
        let id = state.next_subscriber_id;
        state.next_subscriber_id += 1;
        state.subscribers.insert(id, Arc::downgrade(tracker));
        id
    }

    fn unsubscribe(&self, id: usize) {
        self.state.lock().unwrap().subscribers.remove(&id);
    }

    fn fan_out(&self, update: Update) {
        // Read lock on the mailbox side (here: the single `Mutex`, held
        // only long enough to snapshot live subscribers), then a write
        // lock per session queue — never the reverse order (spec.md
        // §4.6 concurrency contract).
        let subscribers: Vec<Arc<SessionTracker>> = {
            let state = self.state.lock().unwrap();
            state.subscribers.values().filter_map(Weak::upgrade).collect()
        };
        for sub in subscribers {
            sub.push(update.clone());
        }
    }

    pub fn queue_new_message(&self, uid: u32) {
        let n = {
            let mut state = self.state.lock().unwrap();
            state.num_messages += 1;
            state.uid_next = state.uid_next.max(uid + 1);
            state.num_messages
        };
        self.fan_out(Update::Exists(n));
    }

    pub fn queue_expunge(&self, seq: u32) {
        {
            let mut state = self.state.lock().unwrap();
            state.num_messages = state.num_messages.saturating_sub(1);
        }
        self.fan_out(Update::Expunge(seq));
    }

    pub fn queue_flags_update(&self, seq: u32, uid: u32, flags: Vec<Flag>) {
        self.fan_out(Update::FetchFlags { seq, uid, flags });
    }
}

/// Per-connection subscriber: a private FIFO queue of updates plus a
/// non-owning handle back to whichever `MailboxTracker` it is currently
/// attached to (spec.md §3 "SessionTracker").
pub struct SessionTracker {
    queue: Mutex<VecDeque<Update>>,
    attachment: Mutex<Option<(Arc<MailboxTracker>, usize)>>,
    /// Fired on every [`SessionTracker::push`] so an idling connection
    /// can flush as soon as an update is queued instead of waiting for
    /// `config.idle_poll_interval`'s fallback tick (spec.md §4.5 IDLE
    /// "in parallel flush the SessionTracker on every mailbox event").
    notify: Notify,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            attachment: Mutex::new(None),
            notify: Notify::new(),
        }
    }
}

impl SessionTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, update: Update) {
        self.queue.lock().unwrap().push_back(update);
        self.notify.notify_one();
    }

    /// Resolves the next time an update is pushed to this tracker.
    /// Callers loop on `is_empty`/`flush` around this, since a push that
    /// lands between those calls and the next `notified().await` is
    /// still caught by `idle_poll_interval`'s periodic fallback.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Detaches from any previous mailbox, clears the queue (spec.md
    /// §3 "clearing its update queue" — otherwise a session could
    /// observe stale EXPUNGE sequence numbers from the mailbox it just
    /// left), and joins `new`.
    pub fn select(self: &Arc<Self>, new: &Arc<MailboxTracker>) {
        self.detach();
        let id = new.subscribe(self);
        *self.attachment.lock().unwrap() = Some((new.clone(), id));
    }

    /// Detaches without joining anything new (CLOSE/UNSELECT/logout,
    /// spec.md §3).
    pub fn detach(&self) {
        if let Some((mailbox, id)) = self.attachment.lock().unwrap().take() {
            mailbox.unsubscribe(id);
        }
        self.queue.lock().unwrap().clear();
    }

    pub fn is_attached(&self) -> bool {
        self.attachment.lock().unwrap().is_some()
    }

    /// Drains the queue in FIFO order, invoking `on_update` for each
    /// entry. `allow_expunge = false` withholds `Expunge` entries
    /// in-place at the front of the queue (spec.md §4.6 "during
    /// FETCH/STORE expunge delivery is forbidden") rather than
    /// reordering them past newer entries — so a withheld expunge
    /// blocks any later entries behind it until a flush permits it.
    pub fn flush(&self, allow_expunge: bool, mut on_update: impl FnMut(&Update)) {
        let mut queue = self.queue.lock().unwrap();
        loop {
            match queue.front() {
                Some(Update::Expunge(_)) if !allow_expunge => break,
                Some(_) => {
                    let update = queue.pop_front().unwrap();
                    on_update(&update);
                }
                None => break,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_out_reaches_every_attached_subscriber_exactly_once() {
        let mailbox = MailboxTracker::new("INBOX", 5, 1, 6);
        let s1 = SessionTracker::new();
        let s2 = SessionTracker::new();
        s1.select(&mailbox);
        s2.select(&mailbox);

        mailbox.queue_expunge(3);

        let mut seen1 = Vec::new();
        s1.flush(true, |u| seen1.push(format!("{u:?}")));
        let mut seen2 = Vec::new();
        s2.flush(true, |u| seen2.push(format!("{u:?}")));

        assert_eq!(seen1.len(), 1);
        assert_eq!(seen2.len(), 1);
        assert!(s1.is_empty());
        assert!(s2.is_empty());
    }

    #[test]
    fn select_clears_queue_from_previous_mailbox() {
        let m1 = MailboxTracker::new("A", 1, 1, 2);
        let m2 = MailboxTracker::new("B", 1, 1, 2);
        let s = SessionTracker::new();
        s.select(&m1);
        m1.queue_new_message(2);
        assert!(!s.is_empty());

        s.select(&m2);
        assert!(s.is_empty(), "switching mailboxes must drop stale updates");
    }

    #[test]
    fn flush_withholds_expunge_when_not_allowed() {
        let mailbox = MailboxTracker::new("INBOX", 2, 1, 3);
        let s = SessionTracker::new();
        s.select(&mailbox);
        mailbox.queue_expunge(1);
        mailbox.queue_new_message(3);

        let mut seen = Vec::new();
        s.flush(false, |u| seen.push(format!("{u:?}")));
        assert!(seen.is_empty(), "expunge at front must block the whole flush");

        s.flush(true, |u| seen.push(format!("{u:?}")));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn detach_stops_future_updates() {
        let mailbox = MailboxTracker::new("INBOX", 1, 1, 2);
        let s = SessionTracker::new();
        s.select(&mailbox);
        s.detach();
        mailbox.queue_new_message(2);
        assert!(s.is_empty());
        assert!(!s.is_attached());
    }
}
