use std::ffi::OsStr;
use std::sync::{Arc, Weak};

use async_stream::stream;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::event::Event;
use crate::queue::EventQueue;
use crate::{ChangeEvent, ChangeKind, Encoding, WatchError, WatchOptions, WatchSource};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SequenceState {
    Open,
    Closed,
}

/// Holds at most one parked `next()` call.
///
/// Registering while a live waiter is parked is refused rather than
/// overwriting it. A waiter whose receiving future was dropped counts as
/// gone, so an abandoned `next()` does not poison the sequence.
#[derive(Debug, Default)]
struct WakeSlot {
    waiter: Option<oneshot::Sender<()>>,
}

impl WakeSlot {
    fn register(&mut self) -> Result<oneshot::Receiver<()>, WatchError> {
        if let Some(waiter) = &self.waiter {
            if !waiter.is_closed() {
                return Err(WatchError::PendingNext);
            }
        }

        let (tx, rx) = oneshot::channel();
        self.waiter = Some(tx);
        Ok(rx)
    }

    fn take(&mut self) -> Option<oneshot::Sender<()>> {
        self.waiter.take()
    }

    fn is_parked(&self) -> bool {
        self.waiter.as_ref().is_some_and(|waiter| !waiter.is_closed())
    }
}

fn fulfill(waiter: Option<oneshot::Sender<()>>) {
    if let Some(waiter) = waiter {
        if waiter.send(()).is_ok() {
            trace!("woke parked next()");
        }
    }
}

struct Inner {
    queue: EventQueue,
    state: SequenceState,
    wake: WakeSlot,
    source: Option<Box<dyn WatchSource>>,
}

impl Inner {
    /// Moves to `Closed` and hands back whatever must be released outside the lock.
    fn finish(&mut self) -> (Option<Box<dyn WatchSource>>, Option<oneshot::Sender<()>>) {
        self.state = SequenceState::Closed;
        self.queue.clear();
        (self.source.take(), self.wake.take())
    }
}

struct Shared {
    inner: Mutex<Inner>,
    encoding: Encoding,
    closed: CancellationToken,
}

impl Shared {
    fn new(encoding: Encoding) -> Self {
        Shared {
            inner: Mutex::new(Inner {
                queue: EventQueue::new(),
                state: SequenceState::Open,
                wake: WakeSlot::default(),
                source: None,
            }),
            encoding,
            closed: CancellationToken::new(),
        }
    }

    fn push(&self, event: Event) {
        let waiter = {
            let mut inner = self.inner.lock();
            if inner.state == SequenceState::Closed {
                trace!(?event, "discarding event produced after close");
                return;
            }
            if event.is_terminal() {
                debug!(?event, "watch source emitted terminal event");
            }
            inner.queue.push(event);
            inner.wake.take()
        };
        fulfill(waiter);
    }

    /// Returns false when the sequence had already terminated.
    fn cancel(&self) -> bool {
        let (source, waiter) = {
            let mut inner = self.inner.lock();
            if inner.state == SequenceState::Closed {
                return false;
            }
            inner.finish()
        };

        self.closed.cancel();
        if let Some(mut source) = source {
            source.close();
        }
        fulfill(waiter);
        true
    }
}

/// The producer side of a [`WatchSequence`].
///
/// Backends call this from whatever thread or callback their notifications
/// arrive on. Every method is safe to call concurrently with the consumer.
#[derive(Clone)]
pub struct EventSink {
    shared: Weak<Shared>,
}

impl EventSink {
    pub fn change(&self, kind: ChangeKind, name: Option<&OsStr>) {
        if let Some(shared) = self.shared.upgrade() {
            let name = name.map(|raw| shared.encoding.decode(raw));
            shared.push(Event::Change(ChangeEvent::new(kind, name)));
        }
    }

    /// The source stopped on its own, for example because the watched path
    /// was removed.
    pub fn close(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.push(Event::Close);
        }
    }

    pub fn error(&self, cause: impl Into<WatchError>) {
        if let Some(shared) = self.shared.upgrade() {
            shared.push(Event::Error(cause.into()));
        }
    }

    /// True once nothing pushed here can reach the consumer anymore.
    pub fn is_closed(&self) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.inner.lock().state == SequenceState::Closed,
            None => true,
        }
    }
}

/// Cancels a [`WatchSequence`] from another task.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Weak<Shared>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if let Some(shared) = self.shared.upgrade() {
            if shared.cancel() {
                debug!("watch sequence cancelled through handle");
            }
        }
    }
}

/// Pull-based view over a push-based watch source.
///
/// A single consumer calls [`WatchSequence::next`] repeatedly. Events come
/// out in the order the source produced them, followed by either normal
/// termination (`Ok(None)`) or the source's failure (`Err`). Dropping the
/// sequence cancels it.
pub struct WatchSequence {
    shared: Arc<Shared>,
    signal: Option<CancellationToken>,
}

impl WatchSequence {
    /// Builds the sequence and lets `open_source` attach a source to its sink.
    ///
    /// A signal that is already cancelled yields a sequence that is closed
    /// from the start; `open_source` is not called in that case.
    pub(crate) fn open<F>(options: &WatchOptions, open_source: F) -> Result<Self, WatchError>
    where
        F: FnOnce(EventSink) -> Result<Box<dyn WatchSource>, WatchError>,
    {
        let shared = Arc::new(Shared::new(options.encoding));

        if options.signal.as_ref().is_some_and(|s| s.is_cancelled()) {
            debug!("abort signal already triggered; not opening watch source");
            shared.cancel();
        } else {
            let source = open_source(EventSink {
                shared: Arc::downgrade(&shared),
            })?;
            shared.inner.lock().source = Some(source);

            if let Some(signal) = options.signal.clone() {
                spawn_abort_listener(&shared, signal);
            }
            debug!(encoding = ?options.encoding, "watch sequence opened");
        }

        Ok(WatchSequence {
            shared,
            signal: options.signal.clone(),
        })
    }

    /// Waits for the next change.
    ///
    /// Returns `Ok(None)` once the source has closed or the sequence was
    /// cancelled, and keeps returning it afterwards. A source failure is
    /// returned once, after every change queued ahead of it.
    pub async fn next(&self) -> Result<Option<ChangeEvent>, WatchError> {
        loop {
            let woken = {
                let mut inner = self.shared.inner.lock();
                if inner.state == SequenceState::Closed {
                    return Ok(None);
                }

                match inner.queue.pop() {
                    Some(Event::Change(change)) => return Ok(Some(change)),
                    Some(terminal) => {
                        let (source, _) = inner.finish();
                        drop(inner);
                        self.shared.closed.cancel();
                        // The source already stopped itself; release it without closing.
                        drop(source);

                        return match terminal {
                            Event::Error(cause) => {
                                debug!(%cause, "watch source failed");
                                Err(cause)
                            }
                            _ => {
                                debug!("watch source closed");
                                Ok(None)
                            }
                        };
                    }
                    None => inner.wake.register()?,
                }
            };

            trace!("queue empty; parking next()");
            match &self.signal {
                Some(signal) => {
                    tokio::select! {
                        _ = woken => {}
                        _ = signal.cancelled() => {
                            if self.shared.cancel() {
                                debug!("abort signal cancelled watch sequence");
                            }
                        }
                    }
                }
                None => {
                    if woken.await.is_err() {
                        trace!("waiter released without a wake; rechecking state");
                    }
                }
            }
        }
    }

    /// Stops the source early. Safe to call at any time and any number of
    /// times; a parked `next()` returns `Ok(None)`.
    pub fn cancel(&self) {
        if self.shared.cancel() {
            debug!("watch sequence cancelled");
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn state(&self) -> SequenceState {
        self.shared.inner.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SequenceState::Closed
    }

    /// Number of changes produced but not yet consumed.
    pub fn queued(&self) -> usize {
        self.shared.inner.lock().queue.len()
    }

    /// True while a `next()` call is parked waiting for the source.
    pub fn is_waiting(&self) -> bool {
        self.shared.inner.lock().wake.is_parked()
    }

    /// Consumes the sequence as a `Stream` that ends after its terminal item.
    pub fn into_stream(
        self,
    ) -> impl futures::Stream<Item = Result<ChangeEvent, WatchError>> + Send {
        stream! {
            loop {
                match self.next().await {
                    Ok(Some(change)) => yield Ok(change),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        }
    }
}

impl Drop for WatchSequence {
    fn drop(&mut self) {
        if self.shared.cancel() {
            debug!("watch sequence dropped before termination");
        }
    }
}

fn spawn_abort_listener(shared: &Arc<Shared>, signal: CancellationToken) {
    // Without a runtime the signal is still observed by a parked next().
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };

    let closed = shared.closed.clone();
    let shared = Arc::downgrade(shared);

    handle.spawn(async move {
        tokio::select! {
            _ = signal.cancelled() => {
                if let Some(shared) = shared.upgrade() {
                    if shared.cancel() {
                        debug!("abort signal cancelled watch sequence");
                    }
                }
            }
            _ = closed.cancelled() => {}
        }
    });
}
