//! CAP_SYS_ADMIN detection

use std::fs;
use std::io;

/// Bit of CAP_SYS_ADMIN in the capability sets
const CAP_SYS_ADMIN: u32 = 21;

/// Answers whether this process may create a notification group
pub trait PrivilegeOracle {
    fn has_required_privilege(&self) -> io::Result<bool>;
}

/// Reads the effective capability set from `/proc/self/status`
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcStatusPrivilege;

impl PrivilegeOracle for ProcStatusPrivilege {
    fn has_required_privilege(&self) -> io::Result<bool> {
        let status = fs::read_to_string("/proc/self/status")?;
        let effective = effective_capabilities(&status).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "no CapEff line in /proc/self/status")
        })?;
        Ok(effective & (1 << CAP_SYS_ADMIN) != 0)
    }
}

/// A fixed answer
impl PrivilegeOracle for bool {
    fn has_required_privilege(&self) -> io::Result<bool> {
        Ok(*self)
    }
}

fn effective_capabilities(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("CapEff:"))
        .and_then(|hex| u64::from_str_radix(hex.trim(), 16).ok())
}
