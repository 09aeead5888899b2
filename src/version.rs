//! Kernel version negotiation
//!
//! fanotify grew its features over several kernel releases. [`KernelVersion`]
//! answers whether a given [`Capability`] (or a set of init flags) can be
//! used on the running kernel.

use std::ffi::CStr;
use std::fmt;

use crate::error::{FanotifyError, Result};
use crate::flags::InitFlags;

/// A kernel release as `major.minor.patch`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KernelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// Features that only exist from a given kernel release onwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    EnableAudit,
    FilesystemMark,
    OpenExec,
    ReportFid,
    ReportDirFid,
    ReportName,
    ReportDirFidName,
}

impl Capability {
    /// Oldest kernel release providing this capability.
    pub fn minimum_version(self) -> (u32, u32) {
        match self {
            Capability::EnableAudit => (4, 15),
            Capability::FilesystemMark => (4, 20),
            Capability::OpenExec => (5, 0),
            Capability::ReportFid => (5, 1),
            Capability::ReportDirFid | Capability::ReportName | Capability::ReportDirFidName => {
                (5, 9)
            }
        }
    }

    /// Kernel name of the flag behind this capability.
    pub fn name(self) -> &'static str {
        match self {
            Capability::EnableAudit => "FAN_ENABLE_AUDIT",
            Capability::FilesystemMark => "FAN_MARK_FILESYSTEM",
            Capability::OpenExec => "FAN_OPEN_EXEC",
            Capability::ReportFid => "FAN_REPORT_FID",
            Capability::ReportDirFid => "FAN_REPORT_DIR_FID",
            Capability::ReportName => "FAN_REPORT_NAME",
            Capability::ReportDirFidName => "FAN_REPORT_DFID_NAME",
        }
    }
}

/// Init flags gated on a kernel release
const GATED_INIT_FLAGS: [(InitFlags, Capability); 5] = [
    (InitFlags::ENABLE_AUDIT, Capability::EnableAudit),
    (InitFlags::REPORT_FID, Capability::ReportFid),
    (InitFlags::REPORT_DIR_FID, Capability::ReportDirFid),
    (InitFlags::REPORT_NAME, Capability::ReportName),
    (InitFlags::REPORT_DFID_NAME, Capability::ReportDirFidName),
];

impl KernelVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a release string such as `5.15.0-91-generic`.
    pub fn parse(release: &str) -> Result<Self> {
        let mut numbers = release
            .split(|c: char| !c.is_ascii_digit())
            .filter(|s| !s.is_empty())
            .map(str::parse::<u32>);

        let mut next = || -> Result<u32> {
            numbers
                .next()
                .and_then(|n| n.ok())
                .ok_or_else(|| FanotifyError::KernelVersion {
                    release: release.to_string(),
                })
        };
        let major = next()?;
        let minor = next()?;
        let patch = next()?;
        Ok(Self::new(major, minor, patch))
    }

    /// Returns true if `capability` is usable on this kernel.
    pub fn supports(&self, capability: Capability) -> bool {
        let (major, minor) = capability.minimum_version();
        (self.major, self.minor) >= (major, minor)
    }

    /// Returns true if every gated flag in `flags` is usable on this kernel.
    ///
    /// A flag set that contains none of the gated flags is usable on any kernel.
    pub fn supports_init_flags(&self, flags: InitFlags) -> bool {
        self.first_unsupported(flags).is_none()
    }

    /// First gated flag in `flags` this kernel does not provide.
    pub fn first_unsupported(&self, flags: InitFlags) -> Option<Capability> {
        GATED_INIT_FLAGS
            .iter()
            .filter(|(flag, _)| flags.contains(*flag))
            .map(|(_, capability)| *capability)
            .find(|capability| !self.supports(*capability))
    }

    /// Fail with [`FanotifyError::UnsupportedOnKernelVersion`] unless supported.
    pub fn require(&self, capability: Capability) -> Result<()> {
        if self.supports(capability) {
            Ok(())
        } else {
            Err(FanotifyError::UnsupportedOnKernelVersion {
                feature: capability.name(),
                version: *self,
            })
        }
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Source of the running kernel's version
pub trait VersionOracle {
    fn kernel_version(&self) -> Result<KernelVersion>;
}

/// Reads the release string from `uname(2)`
#[derive(Debug, Default, Clone, Copy)]
pub struct UnameVersion;

impl VersionOracle for UnameVersion {
    fn kernel_version(&self) -> Result<KernelVersion> {
        let mut uts = unsafe { std::mem::zeroed::<libc::utsname>() };
        if unsafe { libc::uname(&mut uts) } < 0 {
            return Err(FanotifyError::last_os_error("uname"));
        }
        let release = unsafe { CStr::from_ptr(uts.release.as_ptr()) };
        KernelVersion::parse(&release.to_string_lossy())
    }
}

/// A fixed version, for callers that already know it
impl VersionOracle for KernelVersion {
    fn kernel_version(&self) -> Result<KernelVersion> {
        Ok(*self)
    }
}
