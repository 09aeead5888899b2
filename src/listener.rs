//! The notification group, its read loop and permission responses
//!
//! A [`Listener`] owns one fanotify group. [`Listener::start`] blocks the
//! calling thread in a poll loop that reads event records, decodes them and
//! hands each [`Event`] to a bounded queue. Consumers take events with
//! [`Listener::recv`] or [`Listener::events`] from any thread; when the
//! queue is full the loop waits for them, which is how backpressure reaches
//! the kernel queue.
//!
//! [`Listener::stop`] wakes the loop through a pipe. Once the loop has
//! returned the queue is closed and `recv` reports the end of the stream
//! after the remaining events are drained.

use std::fs::File;
use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::decode::{HandleResolver, MountResolver, RecordDecoder, ReportTier};
use crate::error::{FanotifyError, Result};
use crate::event::Event;
use crate::flags::{EventMask, InitFlags, Verdict};
use crate::linux::{self, EVENT_METADATA_LEN, RESPONSE_LEN};
use crate::privilege::{PrivilegeOracle, ProcStatusPrivilege};
use crate::version::{KernelVersion, UnameVersion, VersionOracle};
use crate::watch::{GroupMarker, MarkPolicy, WatchMode, WatchRegistry, WatchTarget};

/// Smallest event queue a listener is created with
pub const MIN_QUEUE_CAPACITY: usize = 4096;

/// Default size of the buffer handed to `read(2)`
pub const DEFAULT_BUFFER_SIZE: usize = 4096 * EVENT_METADATA_LEN;

/// Flags for the descriptors the kernel opens for events
const EVENT_FILE_FLAGS: i32 = libc::O_RDONLY | libc::O_LARGEFILE | libc::O_CLOEXEC;

/// Notification class of the group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PermissionClass {
    /// Plain notifications, no verdicts
    #[default]
    Notification,
    /// Permission decisions before the file contains its final data
    PreContent,
    /// Permission decisions once the file contains its final data
    PostContent,
}

impl PermissionClass {
    pub fn init_flags(self) -> InitFlags {
        match self {
            PermissionClass::Notification => InitFlags::CLASS_NOTIF,
            PermissionClass::PreContent => InitFlags::CLASS_PRE_CONTENT,
            PermissionClass::PostContent => InitFlags::CLASS_CONTENT,
        }
    }

    pub fn is_permission(self) -> bool {
        self != PermissionClass::Notification
    }
}

/// Builder for [`Listener`]
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    mount_point: PathBuf,
    queue_capacity: usize,
    report_names: bool,
    report_tier: Option<ReportTier>,
    entire_mount: bool,
    permission_class: PermissionClass,
    enable_audit: bool,
    buffer_size: usize,
}

impl ListenerConfig {
    pub fn new(mount_point: impl Into<PathBuf>) -> Self {
        Self {
            mount_point: mount_point.into(),
            queue_capacity: MIN_QUEUE_CAPACITY,
            report_names: false,
            report_tier: None,
            entire_mount: false,
            permission_class: PermissionClass::Notification,
            enable_audit: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Capacity of the event queue; raised to [`MIN_QUEUE_CAPACITY`].
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(MIN_QUEUE_CAPACITY);
        self
    }

    /// Ask for entry names when the kernel can report them.
    pub fn report_names(mut self, report_names: bool) -> Self {
        self.report_names = report_names;
        self
    }

    /// Use this tier instead of negotiating one.
    pub fn report_tier(mut self, tier: ReportTier) -> Self {
        self.report_tier = Some(tier);
        self
    }

    /// Watch the whole mount instead of individual paths.
    pub fn entire_mount(mut self, entire_mount: bool) -> Self {
        self.entire_mount = entire_mount;
        self
    }

    pub fn permission_class(mut self, class: PermissionClass) -> Self {
        self.permission_class = class;
        self
    }

    /// Emit audit records for permission verdicts (kernel 4.15 and later).
    pub fn enable_audit(mut self, enable_audit: bool) -> Self {
        self.enable_audit = enable_audit;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(EVENT_METADATA_LEN);
        self
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    pub fn capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Create the listener after checking privileges and the running kernel.
    pub fn build(&self) -> Result<Listener> {
        self.build_with(&ProcStatusPrivilege, &UnameVersion)
    }

    /// Like [`build`](Self::build), with the privilege and version sources
    /// supplied by the caller.
    pub fn build_with(
        &self,
        privilege: &dyn PrivilegeOracle,
        version: &dyn VersionOracle,
    ) -> Result<Listener> {
        if !privilege.has_required_privilege()? {
            return Err(FanotifyError::MissingPrivilege);
        }
        let kernel = version.kernel_version()?;
        let (tier, flags) = self.init_flags(&kernel)?;

        let group = linux::fanotify_init(flags.bits(), EVENT_FILE_FLAGS as u32)?;
        self.assemble(group, kernel, tier)
    }

    /// Wrap an initialized group in a listener.
    pub(crate) fn assemble(
        &self,
        group: OwnedFd,
        kernel: KernelVersion,
        tier: ReportTier,
    ) -> Result<Listener> {
        let mount = File::open(&self.mount_point).map_err(|source| FanotifyError::MountPoint {
            path: self.mount_point.clone(),
            source,
        })?;
        let (stop_reader, stop_writer) = linux::pipe()?;
        let (sender, receiver) = mpsc::sync_channel(self.queue_capacity);

        let group = Arc::new(group);
        let mode = if self.entire_mount {
            WatchMode::EntireMount
        } else {
            WatchMode::PerPath
        };
        let policy = MarkPolicy {
            kernel,
            tier,
            permission: self.permission_class.is_permission(),
        };
        let registry = WatchRegistry::new(
            GroupMarker::new(Arc::clone(&group)),
            mode,
            policy,
            self.mount_point.clone(),
        );

        info!(
            "fanotify listener on {} (kernel {}, {:?}, {:?})",
            self.mount_point.display(),
            kernel,
            tier,
            self.permission_class
        );

        Ok(Listener {
            group,
            registry,
            kernel,
            tier,
            permission_class: self.permission_class,
            buffer_size: self.buffer_size,
            overflows: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            stop_writer: Mutex::new(Some(stop_writer)),
            session: Mutex::new(Some(Session {
                mount,
                stop_reader,
                sender,
            })),
            receiver: Mutex::new(receiver),
        })
    }

    /// Report tier and full `fanotify_init` flags for `kernel`.
    fn init_flags(&self, kernel: &KernelVersion) -> Result<(ReportTier, InitFlags)> {
        let tier = match (self.report_tier, self.permission_class.is_permission()) {
            (Some(tier), _) => tier,
            // Identifier reporting is refused for the content classes.
            (None, true) => ReportTier::None,
            (None, false) => ReportTier::negotiate(kernel, self.report_names),
        };

        let mut flags = self.permission_class.init_flags() | InitFlags::CLOEXEC | tier.init_flags();
        if self.enable_audit {
            flags |= InitFlags::ENABLE_AUDIT;
        }

        if let Some(capability) = kernel.first_unsupported(flags) {
            return Err(FanotifyError::UnsupportedOnKernelVersion {
                feature: capability.name(),
                version: *kernel,
            });
        }
        flags.validate()?;
        Ok((tier, flags))
    }
}

/// Resources only the running loop uses
struct Session {
    mount: File,
    stop_reader: OwnedFd,
    sender: SyncSender<Event>,
}

enum Flow {
    Continue,
    Exit,
}

/// A fanotify notification group
///
/// `Listener` is `Sync`: share it behind an [`Arc`] to run [`start`] on one
/// thread while others add watches, consume events and answer permission
/// requests.
///
/// [`start`]: Listener::start
pub struct Listener {
    group: Arc<OwnedFd>,
    registry: WatchRegistry<GroupMarker>,
    kernel: KernelVersion,
    tier: ReportTier,
    permission_class: PermissionClass,
    buffer_size: usize,
    overflows: AtomicU64,
    stopped: AtomicBool,
    stop_writer: Mutex<Option<OwnedFd>>,
    session: Mutex<Option<Session>>,
    receiver: Mutex<Receiver<Event>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Listener {
    /// Create a notification listener on `mount_point`.
    ///
    /// `queue_capacity` is raised to [`MIN_QUEUE_CAPACITY`]. Entry names are
    /// reported when `want_file_names` is set and the kernel supports it.
    pub fn new(
        mount_point: impl Into<PathBuf>,
        queue_capacity: usize,
        want_file_names: bool,
    ) -> Result<Self> {
        ListenerConfig::new(mount_point)
            .queue_capacity(queue_capacity)
            .report_names(want_file_names)
            .build()
    }

    /// Run the read loop on the calling thread until [`stop`](Self::stop).
    ///
    /// Fails with [`FanotifyError::AlreadyRunning`] while another thread
    /// runs the loop and with [`FanotifyError::ListenerStopped`] once the
    /// listener was stopped. The event queue is closed when this returns,
    /// and the listener counts as stopped however the loop ended.
    pub fn start(&self) -> Result<()> {
        let session = lock(&self.session).take();
        let Some(session) = session else {
            return Err(if self.stopped.load(Ordering::SeqCst) {
                FanotifyError::ListenerStopped
            } else {
                FanotifyError::AlreadyRunning
            });
        };

        debug!("fanotify read loop started");
        let result = self.run(&session);
        // The group is not read again once the loop has returned.
        self.stopped.store(true, Ordering::SeqCst);
        drop(session);
        match &result {
            Ok(()) => debug!("fanotify read loop finished"),
            Err(e) => error!("fanotify read loop failed: {}", e),
        }
        result
    }

    fn run(&self, session: &Session) -> Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        let resolver = MountResolver::new(session.mount.as_fd());

        loop {
            let ready = match linux::poll_pair(self.group.as_fd(), session.stop_reader.as_fd()) {
                Ok(Some(ready)) => ready,
                Ok(None) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(FanotifyError::Syscall {
                        syscall: "poll",
                        source,
                    })
                }
            };

            if ready.cancel {
                return Ok(());
            }
            if ready.data {
                if let Flow::Exit = self.read_batch(&mut buf, &resolver, &session.sender)? {
                    return Ok(());
                }
            }
        }
    }

    /// One read, decoded and queued.
    fn read_batch(
        &self,
        buf: &mut [u8],
        resolver: &MountResolver<'_>,
        sender: &SyncSender<Event>,
    ) -> Result<Flow> {
        let n = loop {
            match linux::read(self.group.as_fd(), buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(FanotifyError::Syscall {
                        syscall: "read",
                        source,
                    })
                }
            }
        };
        if n < EVENT_METADATA_LEN {
            debug!("short read of {} bytes from fanotify group", n);
            return Ok(Flow::Exit);
        }

        self.queue_records(buf, n, resolver, sender)
    }

    /// Decode the first `len` bytes of `buf` and queue the events.
    ///
    /// Blocks while the queue is full. Returns `Flow::Exit` once the
    /// consumers are gone.
    fn queue_records<R: HandleResolver>(
        &self,
        buf: &[u8],
        len: usize,
        resolver: &R,
        sender: &SyncSender<Event>,
    ) -> Result<Flow> {
        let mut decoder = RecordDecoder::new(buf, len, self.tier, resolver);
        let mut flow = Flow::Continue;
        let mut failure = None;
        for item in decoder.by_ref() {
            match item {
                Ok(event) => {
                    if sender.send(event).is_err() {
                        flow = Flow::Exit;
                        break;
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        self.overflows.fetch_add(decoder.overflows(), Ordering::Relaxed);

        match failure {
            Some(e) => Err(e),
            None => Ok(flow),
        }
    }

    /// Ask the read loop to exit. Safe to call more than once.
    ///
    /// The loop notices at its next wait; a loop blocked on a full queue
    /// exits once a consumer makes room.
    pub fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(writer) = lock(&self.stop_writer).take() {
            if let Err(e) = linux::write(writer.as_fd(), &[1]) {
                // Closing the writer below still wakes the loop.
                warn!("failed to signal fanotify read loop: {}", e);
            }
        }
        // Never started: release the mount and close the queue now.
        drop(lock(&self.session).take());
        debug!("fanotify listener stopped");
        Ok(())
    }

    /// Watch `target` for `mask`. Watching a target twice is a no-op.
    pub fn add_watch(&self, target: &WatchTarget, mask: EventMask) -> Result<()> {
        self.registry.add(target, mask)
    }

    /// Remove `mask` from the mark on `target`.
    pub fn remove_watch(&self, target: &WatchTarget, mask: EventMask) -> Result<()> {
        self.registry.remove(target, mask)
    }

    /// Mark (or unmark) the whole mount the listener was created on.
    pub fn mark_mount(&self, mask: EventMask, remove: bool) -> Result<()> {
        if remove {
            self.registry.remove(&WatchTarget::Mount, mask)
        } else {
            self.registry.add(&WatchTarget::Mount, mask)
        }
    }

    /// Mark (or unmark) the filesystem containing `path`.
    pub fn mark_filesystem(&self, path: impl Into<PathBuf>, mask: EventMask, remove: bool) -> Result<()> {
        let target = WatchTarget::Filesystem { path: path.into() };
        if remove {
            self.registry.remove(&target, mask)
        } else {
            self.registry.add(&target, mask)
        }
    }

    /// Drop every mark of the group.
    pub fn clear_watch(&self) -> Result<()> {
        self.registry.flush()
    }

    pub fn is_watched(&self, target: &WatchTarget) -> bool {
        self.registry.is_watched(target)
    }

    /// Let the operation behind a permission event proceed.
    pub fn allow(&self, event: &Event) -> Result<()> {
        self.respond(event, Verdict::ALLOW)
    }

    /// Refuse the operation behind a permission event.
    pub fn deny(&self, event: &Event) -> Result<()> {
        self.respond(event, Verdict::DENY)
    }

    /// Write `verdict` for `event` to the group.
    pub fn respond(&self, event: &Event, verdict: Verdict) -> Result<()> {
        if !self.permission_class.is_permission() {
            return Err(FanotifyError::NotPermissionListener);
        }
        if !event.is_permission() {
            return Err(FanotifyError::NotPermissionEvent);
        }

        let response = encode_response(event.as_raw_fd(), verdict);
        let written = linux::write(self.group.as_fd(), &response)
            .map_err(|source| FanotifyError::Syscall {
                syscall: "write",
                source,
            })?;
        if written != RESPONSE_LEN {
            return Err(FanotifyError::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write of fanotify response: {} of {} bytes", written, RESPONSE_LEN),
            )));
        }
        debug!("verdict {:?} for fd {}", verdict, event.as_raw_fd());
        Ok(())
    }

    /// Next event; `None` once the loop has exited and the queue is drained.
    pub fn recv(&self) -> Option<Event> {
        lock(&self.receiver).recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> std::result::Result<Event, RecvTimeoutError> {
        lock(&self.receiver).recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> std::result::Result<Event, TryRecvError> {
        lock(&self.receiver).try_recv()
    }

    /// Blocking iterator over queued events
    pub fn events(&self) -> EventIterator<'_> {
        EventIterator { listener: self }
    }

    pub fn kernel_version(&self) -> KernelVersion {
        self.kernel
    }

    pub fn report_tier(&self) -> ReportTier {
        self.tier
    }

    pub fn permission_class(&self) -> PermissionClass {
        self.permission_class
    }

    pub fn watch_mode(&self) -> WatchMode {
        self.registry.mode()
    }

    /// Queue overflow records seen since the listener was created.
    pub fn overflow_count(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        self.group.as_raw_fd()
    }
}

/// Iterator over events of a [`Listener`]
pub struct EventIterator<'a> {
    listener: &'a Listener,
}

impl Iterator for EventIterator<'_> {
    type Item = Event;

    fn next(&mut self) -> Option<Self::Item> {
        self.listener.recv()
    }
}

/// The `struct fanotify_response` record for `fd`.
pub fn encode_response(fd: RawFd, verdict: Verdict) -> [u8; RESPONSE_LEN] {
    let mut record = [0u8; RESPONSE_LEN];
    record[..4].copy_from_slice(&fd.to_le_bytes());
    record[4..].copy_from_slice(&verdict.bits().to_le_bytes());
    record
}
