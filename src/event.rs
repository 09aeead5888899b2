use std::ffi::{OsStr, OsString};
use std::fmt;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::flags::EventMask;

/// A fanotify event
///
/// The event owns the descriptor the kernel (or `open_by_handle_at`) opened
/// for it. Dropping the event closes the descriptor; use [`Event::into_fd`]
/// to keep it.
#[derive(Debug)]
pub struct Event {
    /// Open descriptor for the object the event is about
    ///
    /// For listeners reporting file identifiers this refers to the object
    /// the handle names: the file itself, or its parent directory for the
    /// directory tiers.
    pub fd: OwnedFd,
    /// Path of `fd`: the file for descriptor-reporting listeners, the
    /// containing directory when a file name is reported
    pub path: PathBuf,
    /// Name of the entry under `path` (kernel 5.9 and later, when requested)
    pub file_name: Option<OsString>,
    /// The event mask
    pub mask: EventMask,
    /// The process ID that triggered the event
    pub pid: i32,
    /// When the event was decoded
    pub received_at: DateTime<Local>,
}

impl Event {
    pub fn new(
        fd: OwnedFd,
        path: PathBuf,
        file_name: Option<OsString>,
        mask: EventMask,
        pid: i32,
    ) -> Self {
        Self {
            fd,
            path,
            file_name,
            mask,
            pid,
            received_at: Local::now(),
        }
    }

    /// `path` joined with `file_name`, when there is one.
    pub fn full_path(&self) -> PathBuf {
        match &self.file_name {
            Some(name) => self.path.join(name),
            None => self.path.clone(),
        }
    }

    /// Entry name, if the kernel reported one.
    pub fn name(&self) -> Option<&OsStr> {
        self.file_name.as_deref()
    }

    pub fn parent(&self) -> &Path {
        &self.path
    }

    /// Give up ownership of the descriptor.
    pub fn into_fd(self) -> OwnedFd {
        self.fd
    }

    /// Check if this is a permission event
    pub fn is_permission(&self) -> bool {
        self.mask.is_permission()
    }

    /// Check if this event concerns a directory
    pub fn is_directory(&self) -> bool {
        self.mask.is_directory()
    }
}

impl AsFd for Event {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for Event {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Fd:({}), Pid:({}), EventType:({}), Path:({}), Filename:({})",
            self.fd.as_raw_fd(),
            self.pid,
            self.mask,
            self.path.display(),
            self.file_name
                .as_deref()
                .map(|n| n.to_string_lossy())
                .unwrap_or_default()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn event(file_name: Option<&str>) -> (tempfile::TempDir, Event) {
        let dir = tempfile::tempdir().unwrap();
        let fd: OwnedFd = File::open(dir.path()).unwrap().into();
        let event = Event::new(
            fd,
            dir.path().to_path_buf(),
            file_name.map(OsString::from),
            EventMask::MODIFY,
            1234,
        );
        (dir, event)
    }

    #[test]
    fn test_full_path() {
        let (dir, with_name) = event(Some("test.dat"));
        assert_eq!(with_name.full_path(), dir.path().join("test.dat"));
        assert_eq!(with_name.name(), Some(OsStr::new("test.dat")));

        let (dir, without_name) = event(None);
        assert_eq!(without_name.full_path(), dir.path());
        assert_eq!(without_name.parent(), dir.path());
    }

    #[test]
    fn test_display() {
        let (_dir, event) = event(Some("a.txt"));
        let text = event.to_string();
        assert!(text.contains("Pid:(1234)"));
        assert!(text.contains("EventType:(Modify)"));
        assert!(text.contains("Filename:(a.txt)"));
    }

    #[test]
    fn test_into_fd_keeps_descriptor_open() {
        let (_dir, event) = event(None);
        let raw = event.as_raw_fd();
        let fd = event.into_fd();
        assert_eq!(fd.as_raw_fd(), raw);
    }
}
