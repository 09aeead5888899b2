//! Watch registration
//!
//! [`WatchRegistry`] turns add/remove intents into `fanotify_mark` calls. It
//! remembers which targets are currently marked so that adding a target twice
//! or removing one that was never added does not reach the kernel.

use std::collections::HashSet;
use std::os::fd::{AsFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::decode::ReportTier;
use crate::error::{FanotifyError, Result};
use crate::flags::{EventMask, MarkFlags};
use crate::linux;
use crate::version::{Capability, KernelVersion};

/// What a mark applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WatchTarget {
    /// A file, or a symlink itself when `follow_symlinks` is false
    Path { path: PathBuf, follow_symlinks: bool },
    /// A directory; with `only_dir` the mark fails unless `path` is one
    Directory { path: PathBuf, only_dir: bool },
    /// The mount containing the listener's mount point
    Mount,
    /// The whole filesystem containing `path`
    Filesystem { path: PathBuf },
}

impl WatchTarget {
    /// A file or directory, following symlinks.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        WatchTarget::Path {
            path: path.into(),
            follow_symlinks: true,
        }
    }

    /// A symlink itself rather than what it points to.
    pub fn symlink(path: impl Into<PathBuf>) -> Self {
        WatchTarget::Path {
            path: path.into(),
            follow_symlinks: false,
        }
    }

    /// A directory that must be a directory.
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        WatchTarget::Directory {
            path: path.into(),
            only_dir: true,
        }
    }

    fn is_whole_mount(&self) -> bool {
        matches!(self, WatchTarget::Mount | WatchTarget::Filesystem { .. })
    }
}

/// Operation of a single mark call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOp {
    Add,
    Remove,
    Flush,
}

/// A mark intent: target, events and operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mark {
    pub target: WatchTarget,
    pub mask: EventMask,
    pub op: MarkOp,
}

/// Whether a registry marks individual paths or the whole mount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    PerPath,
    EntireMount,
}

/// What the notification group was initialised with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkPolicy {
    pub kernel: KernelVersion,
    pub tier: ReportTier,
    pub permission: bool,
}

/// The `fanotify_mark` primitive
pub trait Marker: Send + Sync {
    fn mark(&self, flags: MarkFlags, mask: EventMask, path: Option<&Path>) -> Result<()>;
}

/// Marks on a real notification group
#[derive(Debug, Clone)]
pub struct GroupMarker {
    group: Arc<OwnedFd>,
}

impl GroupMarker {
    pub fn new(group: Arc<OwnedFd>) -> Self {
        Self { group }
    }
}

impl Marker for GroupMarker {
    fn mark(&self, flags: MarkFlags, mask: EventMask, path: Option<&Path>) -> Result<()> {
        debug!("fanotify_mark flags={:?} mask={} path={:?}", flags, mask, path);
        linux::fanotify_mark(self.group.as_fd(), flags.bits(), mask.bits(), path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MarkKey {
    Inode(PathBuf),
    Mount,
    Filesystem(PathBuf),
}

/// Tracks marked targets and issues mark calls for new ones
pub struct WatchRegistry<M = GroupMarker> {
    marker: M,
    mode: WatchMode,
    policy: MarkPolicy,
    mount_point: PathBuf,
    tracked: Mutex<HashSet<MarkKey>>,
}

impl<M: Marker> WatchRegistry<M> {
    pub fn new(marker: M, mode: WatchMode, policy: MarkPolicy, mount_point: impl Into<PathBuf>) -> Self {
        Self {
            marker,
            mode,
            policy,
            mount_point: mount_point.into(),
            tracked: Mutex::new(HashSet::new()),
        }
    }

    pub fn mode(&self) -> WatchMode {
        self.mode
    }

    /// Mark `target` for `mask` unless it is already marked.
    ///
    /// A second `add` for the same target neither reaches the kernel nor
    /// merges the new mask into the existing mark.
    pub fn add(&self, target: &WatchTarget, mask: EventMask) -> Result<()> {
        self.check_mode(target)?;
        self.check_mask(target, mask)?;

        let key = self.key(target);
        let mut tracked = self.lock();
        if tracked.contains(&key) {
            debug!("{:?} is already marked; ignoring {}", target, mask);
            return Ok(());
        }
        let (flags, mask, path) = self.mark_args(target, MarkFlags::ADD, mask);
        self.marker.mark(flags, mask, path)?;
        tracked.insert(key);
        Ok(())
    }

    /// Remove `mask` from the mark on `target` if it is marked.
    pub fn remove(&self, target: &WatchTarget, mask: EventMask) -> Result<()> {
        self.check_mode(target)?;

        let key = self.key(target);
        let mut tracked = self.lock();
        if !tracked.contains(&key) {
            return Ok(());
        }
        let (flags, mask, path) = self.mark_args(target, MarkFlags::REMOVE, mask);
        self.marker.mark(flags, mask, path)?;
        tracked.remove(&key);
        Ok(())
    }

    /// Drop every mark of this group and forget all tracked targets.
    pub fn flush(&self) -> Result<()> {
        let mut tracked = self.lock();
        match self.mode {
            WatchMode::PerPath => {
                self.marker.mark(MarkFlags::FLUSH, EventMask::empty(), None)?;
            }
            WatchMode::EntireMount => {
                self.marker
                    .mark(MarkFlags::FLUSH | MarkFlags::MOUNT, EventMask::empty(), None)?;
                if tracked.iter().any(|key| matches!(key, MarkKey::Filesystem(_))) {
                    self.marker.mark(
                        MarkFlags::FLUSH | MarkFlags::FILESYSTEM,
                        EventMask::empty(),
                        None,
                    )?;
                }
            }
        }
        tracked.clear();
        Ok(())
    }

    /// Apply a single mark intent.
    pub fn apply(&self, mark: &Mark) -> Result<()> {
        match mark.op {
            MarkOp::Add => self.add(&mark.target, mark.mask),
            MarkOp::Remove => self.remove(&mark.target, mark.mask),
            MarkOp::Flush => self.flush(),
        }
    }

    /// Returns true if `target` is currently marked.
    pub fn is_watched(&self, target: &WatchTarget) -> bool {
        self.lock().contains(&self.key(target))
    }

    /// Number of currently marked targets.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<MarkKey>> {
        // The set stays consistent even if a holder panicked mid-call.
        self.tracked.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key(&self, target: &WatchTarget) -> MarkKey {
        match target {
            WatchTarget::Path { path, .. } | WatchTarget::Directory { path, .. } => {
                MarkKey::Inode(path.clone())
            }
            WatchTarget::Mount => MarkKey::Mount,
            WatchTarget::Filesystem { path } => MarkKey::Filesystem(path.clone()),
        }
    }

    fn check_mode(&self, target: &WatchTarget) -> Result<()> {
        match (self.mode, target.is_whole_mount()) {
            (WatchMode::PerPath, true) => Err(FanotifyError::MountMarkOnPathListener),
            (WatchMode::EntireMount, false) => Err(FanotifyError::PathMarkOnMountListener),
            _ => Ok(()),
        }
    }

    fn check_mask(&self, target: &WatchTarget, mask: EventMask) -> Result<()> {
        let policy = &self.policy;
        match target {
            WatchTarget::Mount if mask.intersects(EventMask::MOUNT_DISALLOWED) => {
                return Err(FanotifyError::invalid_flags(format!(
                    "{} cannot be set on a mount mark",
                    mask & EventMask::MOUNT_DISALLOWED
                )));
            }
            WatchTarget::Filesystem { .. } => policy.kernel.require(Capability::FilesystemMark)?,
            _ => {}
        }

        if policy.permission && mask.intersects(EventMask::DIRENT_EVENTS) {
            return Err(FanotifyError::invalid_flags(format!(
                "{} cannot be combined with permission events",
                mask & EventMask::DIRENT_EVENTS
            )));
        }
        if !policy.permission && mask.is_permission() {
            return Err(FanotifyError::invalid_flags(
                "permission events require a permission-class listener",
            ));
        }
        if policy.tier == ReportTier::None && mask.intersects(EventMask::DIRENT_EVENTS) {
            policy.kernel.require(Capability::ReportFid)?;
            return Err(FanotifyError::invalid_flags(format!(
                "{} requires a listener that reports file identifiers",
                mask & EventMask::DIRENT_EVENTS
            )));
        }
        if mask.intersects(EventMask::OPEN_EXEC | EventMask::OPEN_EXEC_PERM) {
            policy.kernel.require(Capability::OpenExec)?;
        }
        Ok(())
    }

    fn mark_args<'a>(
        &'a self,
        target: &'a WatchTarget,
        op: MarkFlags,
        mask: EventMask,
    ) -> (MarkFlags, EventMask, Option<&'a Path>) {
        match target {
            WatchTarget::Path {
                path,
                follow_symlinks,
            } => {
                let mut flags = op;
                if !follow_symlinks {
                    flags |= MarkFlags::DONT_FOLLOW;
                }
                (flags, mask | EventMask::EVENT_ON_CHILD, Some(path.as_path()))
            }
            WatchTarget::Directory { path, only_dir } => {
                let mut flags = op;
                if *only_dir {
                    flags |= MarkFlags::ONLYDIR;
                }
                (flags, mask | EventMask::EVENT_ON_CHILD, Some(path.as_path()))
            }
            WatchTarget::Mount => (op | MarkFlags::MOUNT, mask, Some(self.mount_point.as_path())),
            WatchTarget::Filesystem { path } => (op | MarkFlags::FILESYSTEM, mask, Some(path.as_path())),
        }
    }
}
