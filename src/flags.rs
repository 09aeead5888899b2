use std::fmt;
use std::sync::OnceLock;

use bitflags::bitflags;

use crate::error::{FanotifyError, Result};
use crate::linux::*;

bitflags! {
    /// Flags for `fanotify_init`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InitFlags: u32 {
        /// Close-on-exec flag
        const CLOEXEC = FAN_CLOEXEC;

        /// Non-blocking flag
        const NONBLOCK = FAN_NONBLOCK;

        /// Notification-only class
        const CLASS_NOTIF = FAN_CLASS_NOTIF;

        /// Permission class for files with their final content
        const CLASS_CONTENT = FAN_CLASS_CONTENT;

        /// Permission class for files before they contain their final data
        const CLASS_PRE_CONTENT = FAN_CLASS_PRE_CONTENT;

        /// Remove the limit on queued events
        const UNLIMITED_QUEUE = FAN_UNLIMITED_QUEUE;

        /// Remove the limit on marks
        const UNLIMITED_MARKS = FAN_UNLIMITED_MARKS;

        /// Allow audit records for permission decisions
        const ENABLE_AUDIT = FAN_ENABLE_AUDIT;

        /// Report thread IDs instead of process IDs
        const REPORT_TID = FAN_REPORT_TID;

        /// Report file identifiers
        const REPORT_FID = FAN_REPORT_FID;

        /// Report directory file identifiers
        const REPORT_DIR_FID = FAN_REPORT_DIR_FID;

        /// Report entry names
        const REPORT_NAME = FAN_REPORT_NAME;

        /// Report directory file identifiers with entry names
        const REPORT_DFID_NAME = FAN_REPORT_DFID_NAME;
    }
}

bitflags! {
    /// Flags for `fanotify_mark`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MarkFlags: u32 {
        const ADD = FAN_MARK_ADD;
        const REMOVE = FAN_MARK_REMOVE;
        const DONT_FOLLOW = FAN_MARK_DONT_FOLLOW;
        const ONLYDIR = FAN_MARK_ONLYDIR;
        const MOUNT = FAN_MARK_MOUNT;
        const IGNORED_MASK = FAN_MARK_IGNORED_MASK;
        const IGNORED_SURV_MODIFY = FAN_MARK_IGNORED_SURV_MODIFY;
        const FLUSH = FAN_MARK_FLUSH;
        const FILESYSTEM = FAN_MARK_FILESYSTEM;
    }
}

bitflags! {
    /// Event mask for marks and for received events
    ///
    /// Masks read from the kernel are built with [`EventMask::from_bits_retain`],
    /// so bits this crate does not know about are kept and never rejected.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u64 {
        const ACCESS = FAN_ACCESS;
        const MODIFY = FAN_MODIFY;
        const ATTRIB = FAN_ATTRIB;
        const CLOSE_WRITE = FAN_CLOSE_WRITE;
        const CLOSE_NOWRITE = FAN_CLOSE_NOWRITE;
        const OPEN = FAN_OPEN;
        const MOVED_FROM = FAN_MOVED_FROM;
        const MOVED_TO = FAN_MOVED_TO;
        const CREATE = FAN_CREATE;
        const DELETE = FAN_DELETE;
        const DELETE_SELF = FAN_DELETE_SELF;
        const MOVE_SELF = FAN_MOVE_SELF;
        const OPEN_EXEC = FAN_OPEN_EXEC;
        const Q_OVERFLOW = FAN_Q_OVERFLOW;

        // Permission events
        const OPEN_PERM = FAN_OPEN_PERM;
        const ACCESS_PERM = FAN_ACCESS_PERM;
        const OPEN_EXEC_PERM = FAN_OPEN_EXEC_PERM;

        // Modifiers
        const EVENT_ON_CHILD = FAN_EVENT_ON_CHILD;
        const ONDIR = FAN_ONDIR;

        // Named combinations
        const FILE_ACCESSED = Self::ACCESS.bits();
        const FILE_OR_DIRECTORY_ACCESSED = Self::ACCESS.bits() | Self::ONDIR.bits();
        const FILE_MODIFIED = Self::MODIFY.bits();
        const FILE_CLOSED_AFTER_WRITE = Self::CLOSE_WRITE.bits();
        const FILE_CLOSED_WITH_NO_WRITE = Self::CLOSE_NOWRITE.bits();
        const FILE_CLOSED = Self::CLOSE_WRITE.bits() | Self::CLOSE_NOWRITE.bits();
        const FILE_OPENED = Self::OPEN.bits();
        const FILE_OR_DIRECTORY_OPENED = Self::OPEN.bits() | Self::ONDIR.bits();
        const FILE_OPENED_FOR_EXEC = Self::OPEN_EXEC.bits();
        const FILE_ATTRIB_CHANGED = Self::ATTRIB.bits();
        const FILE_OR_DIRECTORY_ATTRIB_CHANGED = Self::ATTRIB.bits() | Self::ONDIR.bits();
        const FILE_CREATED = Self::CREATE.bits();
        const FILE_OR_DIRECTORY_CREATED = Self::CREATE.bits() | Self::ONDIR.bits();
        const FILE_DELETED = Self::DELETE.bits();
        const FILE_OR_DIRECTORY_DELETED = Self::DELETE.bits() | Self::ONDIR.bits();
        const WATCHED_FILE_DELETED = Self::DELETE_SELF.bits();
        const WATCHED_FILE_OR_DIRECTORY_DELETED = Self::DELETE_SELF.bits() | Self::ONDIR.bits();
        const FILE_MOVED_FROM = Self::MOVED_FROM.bits();
        const FILE_OR_DIRECTORY_MOVED_FROM = Self::MOVED_FROM.bits() | Self::ONDIR.bits();
        const FILE_MOVED_TO = Self::MOVED_TO.bits();
        const FILE_OR_DIRECTORY_MOVED_TO = Self::MOVED_TO.bits() | Self::ONDIR.bits();
        const WATCHED_FILE_MOVED = Self::MOVE_SELF.bits();
        const WATCHED_FILE_OR_DIRECTORY_MOVED = Self::MOVE_SELF.bits() | Self::ONDIR.bits();
        const FILE_OPEN_PERMISSION = Self::OPEN_PERM.bits();
        const FILE_OPEN_TO_EXECUTE_PERMISSION = Self::OPEN_EXEC_PERM.bits();
        const FILE_ACCESS_PERMISSION = Self::ACCESS_PERM.bits();
    }
}

bitflags! {
    /// Verdict written back for a permission event
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Verdict: u32 {
        /// Allow the operation
        const ALLOW = FAN_ALLOW;

        /// Deny the operation
        const DENY = FAN_DENY;
    }
}

impl Default for InitFlags {
    fn default() -> Self {
        InitFlags::CLASS_NOTIF | InitFlags::CLOEXEC
    }
}

impl Default for Verdict {
    fn default() -> Self {
        Verdict::ALLOW
    }
}

impl InitFlags {
    /// Returns true if the group delivers permission events.
    pub fn is_permission_class(&self) -> bool {
        self.intersects(InitFlags::CLASS_CONTENT | InitFlags::CLASS_PRE_CONTENT)
    }

    /// Reject combinations `fanotify_init` refuses.
    pub fn validate(&self) -> Result<()> {
        let reports_fid = self.intersects(InitFlags::REPORT_FID | InitFlags::REPORT_DIR_FID);
        if reports_fid && self.contains(InitFlags::CLASS_CONTENT) {
            return Err(FanotifyError::invalid_flags(
                "FAN_REPORT_FID cannot be set with FAN_CLASS_CONTENT",
            ));
        }
        if reports_fid && self.contains(InitFlags::CLASS_PRE_CONTENT) {
            return Err(FanotifyError::invalid_flags(
                "FAN_REPORT_FID cannot be set with FAN_CLASS_PRE_CONTENT",
            ));
        }
        if self.contains(InitFlags::REPORT_NAME) && !self.contains(InitFlags::REPORT_DIR_FID) {
            return Err(FanotifyError::invalid_flags(
                "FAN_REPORT_NAME must be set with FAN_REPORT_DIR_FID",
            ));
        }
        Ok(())
    }
}

impl EventMask {
    /// Events that are only reported when the group uses file identifiers.
    pub const DIRENT_EVENTS: EventMask = EventMask::ATTRIB
        .union(EventMask::CREATE)
        .union(EventMask::DELETE)
        .union(EventMask::DELETE_SELF)
        .union(EventMask::MOVED_FROM)
        .union(EventMask::MOVED_TO)
        .union(EventMask::MOVE_SELF);

    /// Events that may not be set on a whole-mount mark.
    pub const MOUNT_DISALLOWED: EventMask = EventMask::CREATE
        .union(EventMask::ATTRIB)
        .union(EventMask::MOVED_TO)
        .union(EventMask::MOVED_FROM)
        .union(EventMask::DELETE)
        .union(EventMask::DELETE_SELF);

    /// All permission events.
    pub const PERMISSION_EVENTS: EventMask = EventMask::OPEN_PERM
        .union(EventMask::ACCESS_PERM)
        .union(EventMask::OPEN_EXEC_PERM);

    /// Returns true if every bit of `other` is set in `self`.
    pub fn has(&self, other: EventMask) -> bool {
        self.bits() & other.bits() == other.bits()
    }

    /// Returns true if any permission event bit is set.
    pub fn is_permission(&self) -> bool {
        self.intersects(EventMask::PERMISSION_EVENTS)
    }

    /// Returns true if the kernel reported a queue overflow.
    pub fn is_overflow(&self) -> bool {
        self.contains(EventMask::Q_OVERFLOW)
    }

    /// Returns true if the event subject is a directory.
    pub fn is_directory(&self) -> bool {
        self.contains(EventMask::ONDIR)
    }

    /// Bits set in this mask that have no name in the flag table.
    pub fn unknown_bits(&self) -> u64 {
        self.bits() & !EventMask::all().bits()
    }
}

/// Names of the single-bit event flags, in display order.
fn flag_names() -> &'static [(EventMask, &'static str)] {
    static NAMES: OnceLock<Vec<(EventMask, &'static str)>> = OnceLock::new();
    NAMES.get_or_init(|| {
        vec![
            (EventMask::ACCESS, "Access"),
            (EventMask::MODIFY, "Modify"),
            (EventMask::CLOSE_WRITE, "CloseWrite"),
            (EventMask::CLOSE_NOWRITE, "CloseNoWrite"),
            (EventMask::OPEN, "Open"),
            (EventMask::OPEN_EXEC, "OpenExec"),
            (EventMask::ATTRIB, "AttribChange"),
            (EventMask::CREATE, "Create"),
            (EventMask::DELETE, "Delete"),
            (EventMask::DELETE_SELF, "SelfDelete"),
            (EventMask::MOVED_FROM, "MovedFrom"),
            (EventMask::MOVED_TO, "MovedTo"),
            (EventMask::MOVE_SELF, "SelfMove"),
            (EventMask::Q_OVERFLOW, "QueueOverflow"),
            (EventMask::OPEN_PERM, "PermissionToOpen"),
            (EventMask::OPEN_EXEC_PERM, "PermissionToExecute"),
            (EventMask::ACCESS_PERM, "PermissionToAccess"),
            (EventMask::ONDIR, "OnDir"),
        ]
    })
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (flag, name) in flag_names() {
            if self.has(*flag) {
                if !first {
                    f.write_str(",")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        let unknown = self.unknown_bits();
        if unknown != 0 {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{:#x}", unknown)?;
        }
        Ok(())
    }
}
