//! Decoding of the records returned by `read(2)` on a notification group
//!
//! One read returns a run of variable-length records. Each starts with the
//! fixed 24-byte metadata header; groups that report file identifiers append
//! an info record carrying a file handle and, for the name tier, the entry
//! name. [`RecordDecoder`] walks such a buffer and yields an [`Event`] per
//! usable record.
//!
//! Records are parsed with explicit, bounds-checked little-endian reads into
//! a [`RawRecord`] before anything is resolved against the filesystem.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use log::{debug, warn};

use crate::error::{FanotifyError, Result};
use crate::event::Event;
use crate::flags::{EventMask, InitFlags};
use crate::linux::{self, *};
use crate::version::{Capability, KernelVersion};

/// Which identifier records the kernel attaches to each event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportTier {
    /// Events carry an open descriptor
    None,
    /// Events carry the file handle of the object
    Fid,
    /// Events carry the file handle of the containing directory
    DirFid,
    /// Events carry the directory handle and the entry name
    DirFidName,
}

impl ReportTier {
    /// Best tier the kernel offers; names are only requested when wanted.
    pub fn negotiate(kernel: &KernelVersion, want_file_names: bool) -> Self {
        if want_file_names && kernel.supports(Capability::ReportDirFidName) {
            ReportTier::DirFidName
        } else if kernel.supports(Capability::ReportFid) {
            ReportTier::Fid
        } else {
            ReportTier::None
        }
    }

    /// `fanotify_init` flags selecting this tier.
    pub fn init_flags(self) -> InitFlags {
        match self {
            ReportTier::None => InitFlags::empty(),
            ReportTier::Fid => InitFlags::REPORT_FID,
            ReportTier::DirFid => InitFlags::REPORT_DIR_FID,
            ReportTier::DirFidName => InitFlags::REPORT_DFID_NAME,
        }
    }

    /// Info record type expected on events of this tier.
    pub fn info_type(self) -> Option<u8> {
        match self {
            ReportTier::None => None,
            ReportTier::Fid => Some(FAN_EVENT_INFO_TYPE_FID),
            ReportTier::DirFid => Some(FAN_EVENT_INFO_TYPE_DFID),
            ReportTier::DirFidName => Some(FAN_EVENT_INFO_TYPE_DFID_NAME),
        }
    }
}

fn le_u16(bytes: &[u8], at: usize) -> Option<u16> {
    bytes.get(at..at + 2)?.try_into().ok().map(u16::from_le_bytes)
}

fn le_u32(bytes: &[u8], at: usize) -> Option<u32> {
    bytes.get(at..at + 4)?.try_into().ok().map(u32::from_le_bytes)
}

fn le_i32(bytes: &[u8], at: usize) -> Option<i32> {
    bytes.get(at..at + 4)?.try_into().ok().map(i32::from_le_bytes)
}

fn le_u64(bytes: &[u8], at: usize) -> Option<u64> {
    bytes.get(at..at + 8)?.try_into().ok().map(u64::from_le_bytes)
}

/// The fixed `fanotify_event_metadata` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataHeader {
    pub event_len: u32,
    pub vers: u8,
    pub metadata_len: u16,
    pub mask: EventMask,
    pub fd: i32,
    pub pid: i32,
}

impl MetadataHeader {
    /// Parse the header at the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            event_len: le_u32(bytes, 0)?,
            vers: *bytes.get(4)?,
            metadata_len: le_u16(bytes, 6)?,
            mask: EventMask::from_bits_retain(le_u64(bytes, 8)?),
            fd: le_i32(bytes, 16)?,
            pid: le_i32(bytes, 20)?,
        })
    }
}

/// A file handle borrowed from the read buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandle<'a> {
    pub handle_type: i32,
    pub bytes: &'a [u8],
}

/// One record, classified by what it carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawRecord<'a> {
    /// Descriptor-reporting group
    NoFid { fd: i32 },
    /// Handle of the object itself
    Fid(FileHandle<'a>),
    /// Handle of the containing directory
    DirFid(FileHandle<'a>),
    /// Handle of the containing directory and the entry name
    DirFidName(FileHandle<'a>, Option<&'a OsStr>),
    /// Info record of a type this group was not set up for
    Unsupported { info_type: u8 },
    /// Info record runs past the end of the record
    Truncated,
    /// No info record at all
    Empty,
}

impl<'a> RawRecord<'a> {
    /// Classify `record`, which holds exactly `header.event_len` bytes.
    pub fn parse(header: &MetadataHeader, record: &'a [u8], tier: ReportTier) -> Self {
        let Some(expected) = tier.info_type() else {
            return RawRecord::NoFid { fd: header.fd };
        };

        let start = header.metadata_len as usize;
        if start < EVENT_METADATA_LEN {
            return RawRecord::Truncated;
        }
        let Some(info) = record.get(start..) else {
            return RawRecord::Empty;
        };
        let (Some(&info_type), Some(info_len)) = (info.first(), le_u16(info, 2)) else {
            return RawRecord::Empty;
        };
        if info_type != expected {
            return RawRecord::Unsupported { info_type };
        }
        let Some(info) = info.get(..info_len as usize) else {
            return RawRecord::Truncated;
        };

        let handle_at = INFO_HEADER_LEN + FSID_LEN;
        let (Some(handle_bytes), Some(handle_type)) =
            (le_u32(info, handle_at), le_i32(info, handle_at + 4))
        else {
            return RawRecord::Truncated;
        };
        let blob_at = handle_at + FILE_HANDLE_HEADER_LEN;
        let Some(blob) = info.get(blob_at..blob_at + handle_bytes as usize) else {
            return RawRecord::Truncated;
        };
        let handle = FileHandle {
            handle_type,
            bytes: blob,
        };

        match tier {
            ReportTier::Fid => RawRecord::Fid(handle),
            ReportTier::DirFid => RawRecord::DirFid(handle),
            _ => {
                let tail = &info[blob_at + blob.len()..];
                let tail = &tail[..tail.len().min(NAME_MAX)];
                let name = tail.split(|b| *b == 0).next().unwrap_or_default();
                let name = (!name.is_empty()).then(|| OsStr::from_bytes(name));
                RawRecord::DirFidName(handle, name)
            }
        }
    }
}

/// Turns file handles and descriptors into open files and paths
pub trait HandleResolver {
    /// Open the object a file handle refers to.
    fn open_handle(&self, handle: &FileHandle<'_>) -> io::Result<OwnedFd>;

    /// Path a descriptor of this process refers to.
    fn fd_path(&self, fd: BorrowedFd<'_>) -> io::Result<PathBuf> {
        fs::read_link(format!("/proc/self/fd/{}", fd.as_raw_fd()))
    }
}

/// Resolves handles relative to an open descriptor on the watched mount
#[derive(Debug, Clone, Copy)]
pub struct MountResolver<'a> {
    mount: BorrowedFd<'a>,
}

impl<'a> MountResolver<'a> {
    pub fn new(mount: BorrowedFd<'a>) -> Self {
        Self { mount }
    }
}

impl HandleResolver for MountResolver<'_> {
    fn open_handle(&self, handle: &FileHandle<'_>) -> io::Result<OwnedFd> {
        linux::open_by_handle_at(self.mount, handle.handle_type, handle.bytes, libc::O_RDONLY)
    }
}

/// Lazy, single-pass iterator over the events of one read
///
/// Yields `Err` only for a metadata version mismatch, after which it is
/// exhausted. Malformed records end the iteration early; records that cannot
/// be resolved are skipped.
pub struct RecordDecoder<'a, R> {
    buf: &'a [u8],
    pos: usize,
    tier: ReportTier,
    resolver: &'a R,
    overflows: u64,
    finished: bool,
}

impl<'a, R: HandleResolver> RecordDecoder<'a, R> {
    /// Decode the first `len` bytes of `buf`.
    pub fn new(buf: &'a [u8], len: usize, tier: ReportTier, resolver: &'a R) -> Self {
        Self {
            buf: &buf[..len.min(buf.len())],
            pos: 0,
            tier,
            resolver,
            overflows: 0,
            finished: false,
        }
    }

    /// Queue overflow records seen so far.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    fn decode(&mut self, header: &MetadataHeader, record: &[u8]) -> Option<Event> {
        if header.mask.is_overflow() {
            self.overflows += 1;
            warn!("fanotify queue overflowed; events were lost");
            if header.fd != FAN_NOFD {
                drop(unsafe { OwnedFd::from_raw_fd(header.fd) });
            }
            return None;
        }

        match RawRecord::parse(header, record, self.tier) {
            RawRecord::NoFid { fd } => {
                if fd == FAN_NOFD {
                    return None;
                }
                // The kernel installed this descriptor in our table for this event.
                let fd = unsafe { OwnedFd::from_raw_fd(fd) };
                match self.resolver.fd_path(fd.as_fd()) {
                    Ok(path) => Some(Event::new(fd, path, None, header.mask, header.pid)),
                    Err(e) => {
                        debug!("cannot resolve path of fd {}: {}", fd.as_raw_fd(), e);
                        None
                    }
                }
            }
            RawRecord::Fid(handle) | RawRecord::DirFid(handle) => {
                self.resolve(handle, None, header)
            }
            RawRecord::DirFidName(handle, name) => {
                self.resolve(handle, name.map(OsStr::to_os_string), header)
            }
            RawRecord::Unsupported { info_type } => {
                debug!("skipping record with info type {}", info_type);
                None
            }
            RawRecord::Truncated | RawRecord::Empty => {
                debug!("skipping record without a usable info record");
                None
            }
        }
    }

    fn resolve(
        &self,
        handle: FileHandle<'_>,
        name: Option<OsString>,
        header: &MetadataHeader,
    ) -> Option<Event> {
        let fd = match self.resolver.open_handle(&handle) {
            Ok(fd) => fd,
            Err(e) => {
                debug!("open_by_handle_at failed: {}", e);
                return None;
            }
        };
        match self.resolver.fd_path(fd.as_fd()) {
            Ok(path) => Some(Event::new(fd, path, name, header.mask, header.pid)),
            Err(e) => {
                debug!("cannot resolve path of fd {}: {}", fd.as_raw_fd(), e);
                None
            }
        }
    }
}

impl<R: HandleResolver> Iterator for RecordDecoder<'_, R> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let remaining = &self.buf[self.pos..];
            let header = match MetadataHeader::parse(remaining) {
                Some(header) => header,
                None => {
                    if !remaining.is_empty() {
                        debug!("dropping {} trailing bytes", remaining.len());
                    }
                    self.finished = true;
                    break;
                }
            };

            let event_len = header.event_len as usize;
            if event_len < EVENT_METADATA_LEN || event_len > remaining.len() {
                warn!(
                    "malformed record of length {} with {} bytes left; dropping rest of buffer",
                    event_len,
                    remaining.len()
                );
                self.finished = true;
                break;
            }
            if header.vers != FANOTIFY_METADATA_VERSION {
                self.finished = true;
                return Some(Err(FanotifyError::IncompatibleMetadataVersion {
                    expected: FANOTIFY_METADATA_VERSION,
                    found: header.vers,
                }));
            }

            let record = &remaining[..event_len];
            self.pos += event_len;
            if let Some(event) = self.decode(&header, record) {
                return Some(Ok(event));
            }
        }
        None
    }
}

impl<R> Drop for RecordDecoder<'_, R> {
    /// Close the descriptors the kernel installed for records that were
    /// never decoded. The walk stops at the first record it cannot trust.
    fn drop(&mut self) {
        let mut pos = self.pos;
        let mut closed = 0;
        while let Some(header) = MetadataHeader::parse(&self.buf[pos..]) {
            let event_len = header.event_len as usize;
            if event_len < EVENT_METADATA_LEN
                || event_len > self.buf.len() - pos
                || header.vers != FANOTIFY_METADATA_VERSION
            {
                break;
            }
            if header.fd >= 0 {
                drop(unsafe { OwnedFd::from_raw_fd(header.fd) });
                closed += 1;
            }
            pos += event_len;
        }
        if closed > 0 {
            debug!("closed {} descriptors of undecoded records", closed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::os::fd::IntoRawFd;

    struct FakeResolver {
        dir: tempfile::TempDir,
    }

    impl FakeResolver {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
            }
        }
    }

    impl HandleResolver for FakeResolver {
        fn open_handle(&self, handle: &FileHandle<'_>) -> io::Result<OwnedFd> {
            if handle.bytes == b"stale" {
                return Err(io::Error::from_raw_os_error(libc::ESTALE));
            }
            Ok(File::open(self.dir.path())?.into())
        }
    }

    fn header(event_len: u32, vers: u8, mask: EventMask, fd: i32, pid: i32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&event_len.to_le_bytes());
        buf.push(vers);
        buf.push(0);
        buf.extend_from_slice(&(EVENT_METADATA_LEN as u16).to_le_bytes());
        buf.extend_from_slice(&mask.bits().to_le_bytes());
        buf.extend_from_slice(&fd.to_le_bytes());
        buf.extend_from_slice(&pid.to_le_bytes());
        buf
    }

    fn fid_record(info_type: u8, handle: &[u8], name: Option<&[u8]>, mask: EventMask) -> Vec<u8> {
        let mut info = vec![info_type, 0, 0, 0];
        info.extend_from_slice(&[0u8; FSID_LEN]);
        info.extend_from_slice(&(handle.len() as u32).to_le_bytes());
        info.extend_from_slice(&1i32.to_le_bytes());
        info.extend_from_slice(handle);
        if let Some(name) = name {
            info.extend_from_slice(name);
            info.push(0);
        }
        while info.len() % 4 != 0 {
            info.push(0);
        }
        let info_len = info.len() as u16;
        info[2..4].copy_from_slice(&info_len.to_le_bytes());

        let event_len = (EVENT_METADATA_LEN + info.len()) as u32;
        let mut record = header(event_len, FANOTIFY_METADATA_VERSION, mask, FAN_NOFD, 42);
        record.extend_from_slice(&info);
        record
    }

    fn decode_all(buf: &[u8], tier: ReportTier, resolver: &FakeResolver) -> Vec<Result<Event>> {
        RecordDecoder::new(buf, buf.len(), tier, resolver).collect()
    }

    #[test]
    fn test_header_parse() {
        let bytes = header(24, 3, EventMask::MODIFY, 7, 99);
        let parsed = MetadataHeader::parse(&bytes).unwrap();
        assert_eq!(parsed.event_len, 24);
        assert_eq!(parsed.vers, 3);
        assert_eq!(parsed.metadata_len, 24);
        assert_eq!(parsed.mask, EventMask::MODIFY);
        assert_eq!(parsed.fd, 7);
        assert_eq!(parsed.pid, 99);
        assert!(MetadataHeader::parse(&bytes[..23]).is_none());
    }

    #[test]
    fn test_name_tier_record() {
        let resolver = FakeResolver::new();
        let buf = fid_record(
            FAN_EVENT_INFO_TYPE_DFID_NAME,
            b"handle01",
            Some(&b"test.dat"[..]),
            EventMask::MODIFY,
        );

        let events = decode_all(&buf, ReportTier::DirFidName, &resolver);
        assert_eq!(events.len(), 1);
        let event = events.into_iter().next().unwrap().unwrap();
        assert_eq!(event.file_name.as_deref(), Some(OsStr::new("test.dat")));
        assert_eq!(
            event.path.canonicalize().unwrap(),
            resolver.dir.path().canonicalize().unwrap()
        );
        assert!(event.mask.has(EventMask::FILE_MODIFIED));
        assert_eq!(event.pid, 42);
    }

    #[test]
    fn test_empty_name_is_none() {
        let resolver = FakeResolver::new();
        let buf = fid_record(
            FAN_EVENT_INFO_TYPE_DFID_NAME,
            b"handle01",
            Some(&b""[..]),
            EventMask::CREATE,
        );

        let events = decode_all(&buf, ReportTier::DirFidName, &resolver);
        assert_eq!(events.len(), 1);
        assert!(events[0].as_ref().unwrap().file_name.is_none());
    }

    #[test]
    fn test_name_is_capped() {
        let long = vec![b'a'; NAME_MAX + 40];
        let buf = fid_record(
            FAN_EVENT_INFO_TYPE_DFID_NAME,
            b"h",
            Some(&long[..]),
            EventMask::CREATE,
        );
        let header = MetadataHeader::parse(&buf).unwrap();
        match RawRecord::parse(&header, &buf, ReportTier::DirFidName) {
            RawRecord::DirFidName(_, Some(name)) => assert_eq!(name.len(), NAME_MAX),
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_truncated_second_record() {
        let resolver = FakeResolver::new();
        let mut buf = fid_record(FAN_EVENT_INFO_TYPE_FID, b"handle01", None, EventMask::MODIFY);
        let mut second = fid_record(FAN_EVENT_INFO_TYPE_FID, b"handle02", None, EventMask::MODIFY);
        // Declare more bytes than the buffer holds.
        second[0..4].copy_from_slice(&4096u32.to_le_bytes());
        buf.extend_from_slice(&second);

        let events = decode_all(&buf, ReportTier::Fid, &resolver);
        assert_eq!(events.len(), 1);
        assert!(events[0].is_ok());
    }

    #[test]
    fn test_short_event_len_stops_scan() {
        let resolver = FakeResolver::new();
        let mut buf = header(8, FANOTIFY_METADATA_VERSION, EventMask::MODIFY, FAN_NOFD, 1);
        buf.extend(fid_record(FAN_EVENT_INFO_TYPE_FID, b"h", None, EventMask::MODIFY));
        assert!(decode_all(&buf, ReportTier::Fid, &resolver).is_empty());
    }

    #[test]
    fn test_version_mismatch_is_fatal() {
        let resolver = FakeResolver::new();
        let mut buf = fid_record(FAN_EVENT_INFO_TYPE_FID, b"handle01", None, EventMask::MODIFY);
        buf[4] = 2;
        buf.extend(fid_record(FAN_EVENT_INFO_TYPE_FID, b"handle02", None, EventMask::MODIFY));

        let events = decode_all(&buf, ReportTier::Fid, &resolver);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            Err(FanotifyError::IncompatibleMetadataVersion {
                expected: 3,
                found: 2
            })
        ));
    }

    #[test]
    fn test_mismatched_info_type_is_skipped() {
        let resolver = FakeResolver::new();
        let mut buf = fid_record(FAN_EVENT_INFO_TYPE_DFID, b"handle01", None, EventMask::MODIFY);
        buf.extend(fid_record(FAN_EVENT_INFO_TYPE_FID, b"handle02", None, EventMask::ATTRIB));

        let events = decode_all(&buf, ReportTier::Fid, &resolver);
        assert_eq!(events.len(), 1);
        assert!(events[0].as_ref().unwrap().mask.has(EventMask::ATTRIB));
    }

    #[test]
    fn test_stale_handle_is_skipped() {
        let resolver = FakeResolver::new();
        let mut buf = fid_record(FAN_EVENT_INFO_TYPE_DFID, b"stale", None, EventMask::DELETE);
        buf.extend(fid_record(FAN_EVENT_INFO_TYPE_DFID, b"fresh", None, EventMask::CREATE));

        let events = decode_all(&buf, ReportTier::DirFid, &resolver);
        assert_eq!(events.len(), 1);
        assert!(events[0].as_ref().unwrap().mask.has(EventMask::CREATE));
    }

    #[test]
    fn test_handle_past_record_end() {
        let mut buf = fid_record(FAN_EVENT_INFO_TYPE_FID, b"handle01", None, EventMask::MODIFY);
        let at = EVENT_METADATA_LEN + INFO_HEADER_LEN + FSID_LEN;
        buf[at..at + 4].copy_from_slice(&512u32.to_le_bytes());
        let header = MetadataHeader::parse(&buf).unwrap();
        assert_eq!(
            RawRecord::parse(&header, &buf, ReportTier::Fid),
            RawRecord::Truncated
        );
    }

    #[test]
    fn test_record_without_info() {
        let buf = header(24, FANOTIFY_METADATA_VERSION, EventMask::MODIFY, FAN_NOFD, 1);
        let header = MetadataHeader::parse(&buf).unwrap();
        assert_eq!(RawRecord::parse(&header, &buf, ReportTier::Fid), RawRecord::Empty);
    }

    #[test]
    fn test_no_fid_record() {
        let resolver = FakeResolver::new();
        let file_path = resolver.dir.path().join("plain.txt");
        fs::write(&file_path, b"data").unwrap();
        let fd = File::open(&file_path).unwrap().into_raw_fd();

        let mut buf = header(24, FANOTIFY_METADATA_VERSION, EventMask::ACCESS, FAN_NOFD, 5);
        buf.extend(header(24, FANOTIFY_METADATA_VERSION, EventMask::ACCESS, fd, 6));

        let events = decode_all(&buf, ReportTier::None, &resolver);
        assert_eq!(events.len(), 1);
        let event = events.into_iter().next().unwrap().unwrap();
        assert_eq!(event.fd.as_raw_fd(), fd);
        assert_eq!(event.pid, 6);
        assert_eq!(
            event.path.canonicalize().unwrap(),
            file_path.canonicalize().unwrap()
        );
        assert!(event.file_name.is_none());
    }

    fn writer_closed(reader: &OwnedFd) -> bool {
        let mut pfd = libc::pollfd {
            fd: reader.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let n = unsafe { libc::poll(&mut pfd, 1, 0) };
        n == 1 && pfd.revents & libc::POLLHUP != 0
    }

    #[test]
    fn test_drop_closes_undecoded_descriptors() {
        let resolver = FakeResolver::new();
        let (first_reader, first_writer) = linux::pipe().unwrap();
        let (second_reader, second_writer) = linux::pipe().unwrap();

        let first_fd = first_writer.into_raw_fd();
        let second_fd = second_writer.into_raw_fd();
        let mut buf = header(24, FANOTIFY_METADATA_VERSION, EventMask::MODIFY, first_fd, 1);
        buf.extend(header(24, FANOTIFY_METADATA_VERSION, EventMask::MODIFY, second_fd, 1));

        let mut decoder = RecordDecoder::new(&buf, buf.len(), ReportTier::None, &resolver);
        let first = decoder.next().unwrap().unwrap();
        drop(decoder);

        assert!(writer_closed(&second_reader));
        assert!(!writer_closed(&first_reader));
        drop(first);
        assert!(writer_closed(&first_reader));
    }

    #[test]
    fn test_version_mismatch_leaves_untrusted_descriptors() {
        let resolver = FakeResolver::new();
        let (reader, writer) = linux::pipe().unwrap();
        let raw = writer.into_raw_fd();

        let buf = header(24, FANOTIFY_METADATA_VERSION - 1, EventMask::MODIFY, raw, 1);
        let events = decode_all(&buf, ReportTier::None, &resolver);
        assert_eq!(events.len(), 1);
        assert!(events[0].is_err());
        assert!(!writer_closed(&reader));

        drop(unsafe { OwnedFd::from_raw_fd(raw) });
    }

    #[test]
    fn test_overflow_is_counted() {
        let resolver = FakeResolver::new();
        let buf = header(
            24,
            FANOTIFY_METADATA_VERSION,
            EventMask::Q_OVERFLOW,
            FAN_NOFD,
            0,
        );
        let mut decoder = RecordDecoder::new(&buf, buf.len(), ReportTier::Fid, &resolver);
        assert!(decoder.next().is_none());
        assert_eq!(decoder.overflows(), 1);
    }

    #[test]
    fn test_unknown_mask_bits_survive() {
        let resolver = FakeResolver::new();
        let mask = EventMask::from_bits_retain(FAN_MODIFY | (1 << 45));
        let buf = fid_record(FAN_EVENT_INFO_TYPE_FID, b"h", None, mask);
        let events = decode_all(&buf, ReportTier::Fid, &resolver);
        assert_eq!(events[0].as_ref().unwrap().mask.bits(), FAN_MODIFY | (1 << 45));
    }

    #[test]
    fn test_len_limits_decoding() {
        let resolver = FakeResolver::new();
        let mut buf = fid_record(FAN_EVENT_INFO_TYPE_FID, b"h", None, EventMask::MODIFY);
        let valid = buf.len();
        buf.extend(fid_record(FAN_EVENT_INFO_TYPE_FID, b"h", None, EventMask::MODIFY));
        let decoder = RecordDecoder::new(&buf, valid, ReportTier::Fid, &resolver);
        assert_eq!(decoder.count(), 1);
    }

    #[test]
    fn test_tier_negotiation() {
        let v4 = KernelVersion::new(4, 19, 0);
        let v5_4 = KernelVersion::new(5, 4, 0);
        let v6 = KernelVersion::new(6, 1, 0);
        assert_eq!(ReportTier::negotiate(&v4, true), ReportTier::None);
        assert_eq!(ReportTier::negotiate(&v5_4, true), ReportTier::Fid);
        assert_eq!(ReportTier::negotiate(&v6, true), ReportTier::DirFidName);
        assert_eq!(ReportTier::negotiate(&v6, false), ReportTier::Fid);
        assert_eq!(ReportTier::DirFidName.init_flags(), InitFlags::REPORT_DFID_NAME);
    }
}
