//! Linux-specific constants and system call wrappers for fanotify
//!
//! This module contains the kernel ABI this crate is compiled against: flag
//! values, wire sizes of the records returned by `read(2)`, and thin
//! wrappers around the system calls the listener needs. Nothing in here
//! interprets kernel buffers; that is the decoder's job.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;

use crate::error::{FanotifyError, Result};

// Fanotify event flags
pub const FAN_ACCESS: u64 = 0x0000_0001;
pub const FAN_MODIFY: u64 = 0x0000_0002;
pub const FAN_ATTRIB: u64 = 0x0000_0004;
pub const FAN_CLOSE_WRITE: u64 = 0x0000_0008;
pub const FAN_CLOSE_NOWRITE: u64 = 0x0000_0010;
pub const FAN_OPEN: u64 = 0x0000_0020;
pub const FAN_MOVED_FROM: u64 = 0x0000_0040;
pub const FAN_MOVED_TO: u64 = 0x0000_0080;
pub const FAN_CREATE: u64 = 0x0000_0100;
pub const FAN_DELETE: u64 = 0x0000_0200;
pub const FAN_DELETE_SELF: u64 = 0x0000_0400;
pub const FAN_MOVE_SELF: u64 = 0x0000_0800;
pub const FAN_OPEN_EXEC: u64 = 0x0000_1000;
pub const FAN_Q_OVERFLOW: u64 = 0x0000_4000;
pub const FAN_OPEN_PERM: u64 = 0x0001_0000;
pub const FAN_ACCESS_PERM: u64 = 0x0002_0000;
pub const FAN_OPEN_EXEC_PERM: u64 = 0x0004_0000;
pub const FAN_EVENT_ON_CHILD: u64 = 0x0800_0000;
pub const FAN_ONDIR: u64 = 0x4000_0000;

// Fanotify init flags
pub const FAN_CLOEXEC: u32 = 0x0000_0001;
pub const FAN_NONBLOCK: u32 = 0x0000_0002;
pub const FAN_CLASS_NOTIF: u32 = 0x0000_0000;
pub const FAN_CLASS_CONTENT: u32 = 0x0000_0004;
pub const FAN_CLASS_PRE_CONTENT: u32 = 0x0000_0008;
pub const FAN_UNLIMITED_QUEUE: u32 = 0x0000_0010;
pub const FAN_UNLIMITED_MARKS: u32 = 0x0000_0020;
pub const FAN_ENABLE_AUDIT: u32 = 0x0000_0040;
pub const FAN_REPORT_TID: u32 = 0x0000_0100;
pub const FAN_REPORT_FID: u32 = 0x0000_0200;
pub const FAN_REPORT_DIR_FID: u32 = 0x0000_0400;
pub const FAN_REPORT_NAME: u32 = 0x0000_0800;
pub const FAN_REPORT_DFID_NAME: u32 = FAN_REPORT_DIR_FID | FAN_REPORT_NAME;

// Fanotify mark flags
pub const FAN_MARK_ADD: u32 = 0x0000_0001;
pub const FAN_MARK_REMOVE: u32 = 0x0000_0002;
pub const FAN_MARK_DONT_FOLLOW: u32 = 0x0000_0004;
pub const FAN_MARK_ONLYDIR: u32 = 0x0000_0008;
pub const FAN_MARK_MOUNT: u32 = 0x0000_0010;
pub const FAN_MARK_IGNORED_MASK: u32 = 0x0000_0020;
pub const FAN_MARK_IGNORED_SURV_MODIFY: u32 = 0x0000_0040;
pub const FAN_MARK_FLUSH: u32 = 0x0000_0080;
pub const FAN_MARK_FILESYSTEM: u32 = 0x0000_0100;

// Fanotify response values
pub const FAN_ALLOW: u32 = 0x01;
pub const FAN_DENY: u32 = 0x02;

/// Value of the `fd` field when the event carries no descriptor
pub const FAN_NOFD: i32 = -1;

/// Record format version this crate decodes
pub const FANOTIFY_METADATA_VERSION: u8 = 3;

// Info record types
pub const FAN_EVENT_INFO_TYPE_FID: u8 = 1;
pub const FAN_EVENT_INFO_TYPE_DFID_NAME: u8 = 2;
pub const FAN_EVENT_INFO_TYPE_DFID: u8 = 3;

/// Size of `struct fanotify_event_metadata`
pub const EVENT_METADATA_LEN: usize = 24;
/// Size of `struct fanotify_event_info_header`
pub const INFO_HEADER_LEN: usize = 4;
/// Size of `__kernel_fsid_t`
pub const FSID_LEN: usize = 8;
/// Size of the fixed part of `struct file_handle`
pub const FILE_HANDLE_HEADER_LEN: usize = 8;
/// Size of `struct fanotify_response`
pub const RESPONSE_LEN: usize = 8;
/// Longest file name the kernel reports
pub const NAME_MAX: usize = 255;

/// Create a notification group, returning its descriptor.
pub fn fanotify_init(flags: u32, event_f_flags: u32) -> Result<OwnedFd> {
    let fd = unsafe { libc::fanotify_init(flags, event_f_flags) };
    if fd < 0 {
        return Err(FanotifyError::last_os_error("fanotify_init"));
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Add, remove or flush a mark on `path` (resolved against the cwd).
///
/// `path` may be `None` for flush operations.
pub fn fanotify_mark(fd: BorrowedFd<'_>, flags: u32, mask: u64, path: Option<&Path>) -> Result<()> {
    let path_cstr = match path {
        Some(p) => Some(path_to_cstring(p)?),
        None => None,
    };
    let path_ptr = path_cstr
        .as_ref()
        .map_or(std::ptr::null(), |p| p.as_ptr());

    let result = unsafe {
        libc::fanotify_mark(fd.as_raw_fd(), flags, mask, libc::AT_FDCWD, path_ptr)
    };
    if result < 0 {
        return Err(FanotifyError::last_os_error("fanotify_mark"));
    }
    Ok(())
}

/// Open the object identified by a file handle relative to `mount_fd`.
///
/// `handle_type` and `handle` are the `handle_type`/`f_handle` fields of a
/// `struct file_handle` as reported by the kernel.
pub fn open_by_handle_at(
    mount_fd: BorrowedFd<'_>,
    handle_type: i32,
    handle: &[u8],
    flags: libc::c_int,
) -> io::Result<OwnedFd> {
    // struct file_handle { u32 handle_bytes; int handle_type; u8 f_handle[]; }
    // Backed by u32 words so the header fields are properly aligned.
    let words = (FILE_HANDLE_HEADER_LEN + handle.len()).div_ceil(4);
    let mut storage = vec![0u32; words];
    storage[0] = handle.len() as u32;
    storage[1] = handle_type as u32;
    {
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(storage.as_mut_ptr() as *mut u8, words * 4)
        };
        bytes[FILE_HANDLE_HEADER_LEN..FILE_HANDLE_HEADER_LEN + handle.len()]
            .copy_from_slice(handle);
    }

    let fd = unsafe {
        libc::syscall(
            libc::SYS_open_by_handle_at,
            mount_fd.as_raw_fd(),
            storage.as_mut_ptr() as *mut libc::c_void,
            flags,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd as RawFd) })
}

/// `read(2)` into `buf`, returning the byte count.
pub fn read(fd: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// `write(2)` of `buf`, returning the byte count.
pub fn write(fd: BorrowedFd<'_>, buf: &[u8]) -> io::Result<usize> {
    let n = unsafe { libc::write(fd.as_raw_fd(), buf.as_ptr() as *const libc::c_void, buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// Create a close-on-exec pipe, returning `(read end, write end)`.
pub fn pipe() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    let result = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if result < 0 {
        return Err(FanotifyError::last_os_error("pipe2"));
    }
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// Which of the two polled descriptors became readable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub data: bool,
    pub cancel: bool,
}

/// Block until `data` or `cancel` is readable. Returns `Ok(None)` on a
/// wakeup with nothing ready.
pub fn poll_pair(data: BorrowedFd<'_>, cancel: BorrowedFd<'_>) -> io::Result<Option<Readiness>> {
    let mut fds = [
        libc::pollfd {
            fd: data.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        },
        libc::pollfd {
            fd: cancel.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        },
    ];
    let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    if n == 0 {
        return Ok(None);
    }
    // A closed write end shows up as POLLHUP on the read end.
    let cancel_bits = libc::POLLIN | libc::POLLHUP | libc::POLLERR;
    Ok(Some(Readiness {
        data: fds[0].revents & libc::POLLIN != 0,
        cancel: fds[1].revents & cancel_bits != 0,
    }))
}

fn path_to_cstring(path: &Path) -> Result<CString> {
    use std::os::unix::ffi::OsStrExt;

    CString::new(path.as_os_str().as_bytes()).map_err(|_| FanotifyError::invalid_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsFd;

    #[test]
    fn test_dfid_name_is_union() {
        assert_eq!(FAN_REPORT_DFID_NAME, 0x0c00);
    }

    #[test]
    fn test_pipe_wakes_poll() {
        let (reader, writer) = pipe().unwrap();
        let (other, _keep) = pipe().unwrap();
        assert_eq!(write(writer.as_fd(), b"x").unwrap(), 1);

        let ready = poll_pair(other.as_fd(), reader.as_fd()).unwrap().unwrap();
        assert!(ready.cancel);
        assert!(!ready.data);
    }

    #[test]
    fn test_closed_writer_counts_as_cancel() {
        let (reader, writer) = pipe().unwrap();
        let (other, _keep) = pipe().unwrap();
        drop(writer);

        let ready = poll_pair(other.as_fd(), reader.as_fd()).unwrap().unwrap();
        assert!(ready.cancel);
    }

    #[test]
    fn test_nul_in_path_is_rejected() {
        let err = path_to_cstring(Path::new("bad\0path")).unwrap_err();
        assert!(matches!(err, FanotifyError::InvalidPath { .. }));
    }
}
