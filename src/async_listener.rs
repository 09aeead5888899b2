use std::sync::{Arc, OnceLock};

use futures::stream::{self, Stream};
use log::debug;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{self, JoinHandle};

use crate::error::Result;
use crate::event::Event;
use crate::flags::EventMask;
use crate::listener::Listener;
use crate::watch::WatchTarget;

/// Events buffered between the blocking queue and async consumers
const BRIDGE_CAPACITY: usize = 64;

/// Moves events from a blocking source into a tokio channel.
///
/// A single task on the blocking pool owns the source, so an event is only
/// taken from it once an async receiver can hold it. Dropping a pending
/// [`recv`](Self::recv) leaves the event in the channel.
struct EventBridge {
    receiver: Mutex<mpsc::Receiver<Event>>,
}

impl EventBridge {
    fn spawn<F>(capacity: usize, mut next: F) -> Self
    where
        F: FnMut() -> Option<Event> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(capacity);
        task::spawn_blocking(move || {
            while let Some(event) = next() {
                if sender.blocking_send(event).is_err() {
                    debug!("async consumers gone; draining fanotify queue");
                    // Keep the read loop from blocking on a full queue.
                    while next().is_some() {}
                    return;
                }
            }
        });
        Self {
            receiver: Mutex::new(receiver),
        }
    }

    async fn recv(&self) -> Option<Event> {
        self.receiver.lock().await.recv().await
    }
}

struct Shared {
    listener: Arc<Listener>,
    bridge: OnceLock<EventBridge>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        // The forwarder keeps the listener alive until its loop exits.
        let _ = self.listener.stop();
    }
}

/// A [`Listener`] driven from a tokio runtime
///
/// The read loop runs on tokio's blocking pool. Events reach async code
/// through one forwarding task, started by the first
/// [`next_event`](Self::next_event); from then on the blocking `recv`
/// methods of [`listener`](Self::listener) compete with it and should not be
/// used. Dropping the last clone stops the listener.
#[derive(Clone)]
pub struct AsyncListener {
    shared: Arc<Shared>,
}

impl AsyncListener {
    pub fn new(listener: Listener) -> Self {
        Self {
            shared: Arc::new(Shared {
                listener: Arc::new(listener),
                bridge: OnceLock::new(),
            }),
        }
    }

    /// Run the read loop on the blocking pool.
    pub fn start(&self) -> JoinHandle<Result<()>> {
        let listener = Arc::clone(&self.shared.listener);
        task::spawn_blocking(move || listener.start())
    }

    pub fn stop(&self) -> Result<()> {
        self.shared.listener.stop()
    }

    pub fn add_watch(&self, target: &WatchTarget, mask: EventMask) -> Result<()> {
        self.shared.listener.add_watch(target, mask)
    }

    pub fn remove_watch(&self, target: &WatchTarget, mask: EventMask) -> Result<()> {
        self.shared.listener.remove_watch(target, mask)
    }

    /// Wait for the next event; `None` once the loop has exited and every
    /// queued event was taken.
    ///
    /// Cancel safe: an event is never lost when this future is dropped.
    pub async fn next_event(&self) -> Option<Event> {
        self.bridge().recv().await
    }

    fn bridge(&self) -> &EventBridge {
        self.shared.bridge.get_or_init(|| {
            let listener = Arc::clone(&self.shared.listener);
            EventBridge::spawn(BRIDGE_CAPACITY, move || listener.recv())
        })
    }

    pub fn allow(&self, event: &Event) -> Result<()> {
        self.shared.listener.allow(event)
    }

    pub fn deny(&self, event: &Event) -> Result<()> {
        self.shared.listener.deny(event)
    }

    /// Events as a stream ending when the loop exits.
    pub fn into_stream(self) -> impl Stream<Item = Event> {
        stream::unfold(self, |listener| async move {
            let event = listener.next_event().await?;
            Some((event, listener))
        })
    }

    pub fn listener(&self) -> &Listener {
        &self.shared.listener
    }
}

impl From<Listener> for AsyncListener {
    fn from(listener: Listener) -> Self {
        Self::new(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::ReportTier;
    use crate::error::FanotifyError;
    use crate::linux::{self, EVENT_METADATA_LEN, FANOTIFY_METADATA_VERSION, FAN_MODIFY};
    use crate::listener::ListenerConfig;
    use crate::privilege::{PrivilegeOracle, ProcStatusPrivilege};
    use crate::version::KernelVersion;
    use futures::StreamExt;
    use std::fs::{self, File};
    use std::os::fd::{AsFd, IntoRawFd, OwnedFd};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::time::timeout;

    const TIMEOUT: Duration = Duration::from_secs(5);
    const SHORT: Duration = Duration::from_millis(100);

    fn privileged() -> bool {
        matches!(ProcStatusPrivilege.has_required_privilege(), Ok(true))
    }

    /// A listener fed through a pipe, with the write end.
    fn piped_listener(dir: &Path) -> (AsyncListener, OwnedFd) {
        let (reader, writer) = linux::pipe().unwrap();
        let listener = ListenerConfig::new(dir)
            .assemble(reader, KernelVersion::new(6, 1, 0), ReportTier::None)
            .unwrap();
        (AsyncListener::new(listener), writer)
    }

    /// Write a modify record for `path` the way the kernel reports it
    /// without file identifiers.
    fn write_modify(writer: &OwnedFd, path: &Path) {
        let fd = File::open(path).unwrap().into_raw_fd();
        let mut buf = Vec::with_capacity(EVENT_METADATA_LEN);
        buf.extend_from_slice(&(EVENT_METADATA_LEN as u32).to_le_bytes());
        buf.push(FANOTIFY_METADATA_VERSION);
        buf.push(0);
        buf.extend_from_slice(&(EVENT_METADATA_LEN as u16).to_le_bytes());
        buf.extend_from_slice(&FAN_MODIFY.to_le_bytes());
        buf.extend_from_slice(&fd.to_le_bytes());
        buf.extend_from_slice(&std::process::id().to_le_bytes());
        assert_eq!(linux::write(writer.as_fd(), &buf).unwrap(), buf.len());
    }

    #[tokio::test]
    async fn test_cancelled_wait_keeps_event() {
        let dir = tempdir().unwrap();
        let (sender, receiver) = std::sync::mpsc::channel();
        let bridge = EventBridge::spawn(4, move || receiver.recv().ok());

        assert!(timeout(SHORT, bridge.recv()).await.is_err());

        let fd: OwnedFd = File::open(dir.path()).unwrap().into();
        sender
            .send(Event::new(fd, dir.path().to_path_buf(), None, EventMask::MODIFY, 1))
            .unwrap();
        let event = timeout(TIMEOUT, bridge.recv()).await.unwrap().unwrap();
        assert_eq!(event.path, dir.path());

        drop(sender);
        assert!(timeout(TIMEOUT, bridge.recv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_next_event_after_timeout() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("data.txt");
        fs::write(&file, "initial").unwrap();
        let (listener, writer) = piped_listener(dir.path());
        let running = listener.start();

        assert!(timeout(SHORT, listener.next_event()).await.is_err());

        write_modify(&writer, &file);
        let event = timeout(TIMEOUT, listener.next_event()).await.unwrap().unwrap();
        assert!(event.mask.contains(EventMask::MODIFY));
        assert_eq!(event.full_path(), file.canonicalize().unwrap());

        listener.stop().unwrap();
        running.await.unwrap().unwrap();
        assert!(listener.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_survives_cancelled_poll() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("data.txt");
        fs::write(&file, "initial").unwrap();
        let (listener, writer) = piped_listener(dir.path());
        let running = listener.start();
        let mut events = Box::pin(listener.clone().into_stream());

        assert!(timeout(SHORT, events.next()).await.is_err());

        write_modify(&writer, &file);
        write_modify(&writer, &file);
        for _ in 0..2 {
            let event = timeout(TIMEOUT, events.next()).await.unwrap().unwrap();
            assert_eq!(event.full_path(), file.canonicalize().unwrap());
        }

        listener.stop().unwrap();
        running.await.unwrap().unwrap();
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_async_stream_ends_after_stop() {
        if !privileged() {
            return;
        }
        let temp_dir = tempdir().unwrap();
        let listener = AsyncListener::new(Listener::new(temp_dir.path(), 0, false).unwrap());
        let running = listener.start();

        listener.stop().unwrap();
        // The loop may not have claimed the group before stop.
        match running.await.unwrap() {
            Ok(()) | Err(FanotifyError::ListenerStopped) => {}
            Err(e) => panic!("read loop failed: {}", e),
        }

        let events: Vec<Event> = listener.clone().into_stream().collect().await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_async_modify_event() {
        if !privileged() {
            return;
        }
        let temp_dir = tempdir().unwrap();
        let file = temp_dir.path().join("data.txt");
        fs::write(&file, "initial").unwrap();

        let listener = ListenerConfig::new(temp_dir.path())
            .report_tier(ReportTier::None)
            .build()
            .map(AsyncListener::new)
            .unwrap();
        listener
            .add_watch(&WatchTarget::path(&file), EventMask::FILE_MODIFIED)
            .unwrap();
        let running = listener.start();

        assert!(timeout(SHORT, listener.next_event()).await.is_err());

        fs::write(&file, "modified").unwrap();
        let event = timeout(TIMEOUT, listener.next_event()).await.unwrap().unwrap();
        assert!(event.mask.contains(EventMask::MODIFY));

        listener.stop().unwrap();
        running.await.unwrap().unwrap();
    }
}
