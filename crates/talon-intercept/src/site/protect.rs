//! Page-protection helpers for patching pointer-sized slots in foreign memory.

use talon_core::error::{AppError, ErrorKind};
use talon_core::result::AppResult;

/// Overwrites the pointer stored at `slot`, lifting write protection first.
///
/// The page's previous protection is restored afterwards. On Unix targets
/// without `/proc/self/maps` the previous protection cannot be read, and the
/// page keeps write access added to what it had.
///
/// # Safety
///
/// `slot` must be a valid, aligned pointer-sized location inside a mapped page.
pub(crate) unsafe fn write_slot(slot: *mut *const (), value: *const ()) -> AppResult<()> {
    let _guard = unsafe { WritableRegion::acquire(slot.cast(), size_of::<*const ()>())? };
    unsafe { std::ptr::write_volatile(slot, value) };
    Ok(())
}

#[cfg(unix)]
struct WritableRegion {
    start: usize,
    len: usize,
    /// Protection to put back on drop; `None` when nothing was changed or the
    /// previous protection is unknown.
    restore: Option<libc::c_int>,
}

#[cfg(unix)]
impl WritableRegion {
    unsafe fn acquire(addr: *mut u8, len: usize) -> AppResult<Self> {
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if page <= 0 {
            return Err(AppError::hook_failed("Could not determine the system page size"));
        }
        let page = page as usize;
        let start = (addr as usize) & !(page - 1);
        let end = (addr as usize + len + page - 1) & !(page - 1);

        let previous = current_protection(start, end);
        if previous.is_some_and(|prot| prot & libc::PROT_WRITE != 0) {
            return Ok(Self {
                start,
                len: end - start,
                restore: None,
            });
        }
        if previous.is_none() {
            tracing::debug!(
                addr = %format!("{:#x}", addr as usize),
                "Page protection unknown; leaving the slot page writable"
            );
        }

        let writable = previous.unwrap_or(libc::PROT_READ) | libc::PROT_READ | libc::PROT_WRITE;
        let rc = unsafe { libc::mprotect(start as *mut libc::c_void, end - start, writable) };
        if rc != 0 {
            return Err(AppError::with_source(
                ErrorKind::HookFailed,
                format!("mprotect failed for {:#x}", addr as usize),
                std::io::Error::last_os_error(),
            ));
        }
        Ok(Self {
            start,
            len: end - start,
            restore: previous,
        })
    }
}

#[cfg(unix)]
impl Drop for WritableRegion {
    fn drop(&mut self) {
        let Some(previous) = self.restore else {
            return;
        };
        let rc = unsafe { libc::mprotect(self.start as *mut libc::c_void, self.len, previous) };
        if rc != 0 {
            tracing::warn!(
                addr = %format!("{:#x}", self.start),
                error = %std::io::Error::last_os_error(),
                "Could not restore page protection"
            );
        }
    }
}

/// Protection of the mapping covering `[start, end)`, read from `/proc/self/maps`.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn current_protection(start: usize, end: usize) -> Option<libc::c_int> {
    let maps = std::fs::read_to_string("/proc/self/maps").ok()?;
    maps.lines()
        .filter_map(parse_mapping)
        .find(|&(low, high, _)| low <= start && end <= high)
        .map(|(_, _, prot)| prot)
}

#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
fn current_protection(_start: usize, _end: usize) -> Option<libc::c_int> {
    None
}

/// Parses `low-high perms ...` into the range and its `PROT_*` bits.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn parse_mapping(line: &str) -> Option<(usize, usize, libc::c_int)> {
    let mut fields = line.split_whitespace();
    let (low, high) = fields.next()?.split_once('-')?;
    let perms = fields.next()?.as_bytes();
    if perms.len() < 3 {
        return None;
    }

    let mut prot = libc::PROT_NONE;
    if perms[0] == b'r' {
        prot |= libc::PROT_READ;
    }
    if perms[1] == b'w' {
        prot |= libc::PROT_WRITE;
    }
    if perms[2] == b'x' {
        prot |= libc::PROT_EXEC;
    }
    Some((
        usize::from_str_radix(low, 16).ok()?,
        usize::from_str_radix(high, 16).ok()?,
        prot,
    ))
}

#[cfg(windows)]
struct WritableRegion {
    addr: *mut u8,
    len: usize,
    previous: windows::Win32::System::Memory::PAGE_PROTECTION_FLAGS,
}

#[cfg(windows)]
impl WritableRegion {
    unsafe fn acquire(addr: *mut u8, len: usize) -> AppResult<Self> {
        use windows::Win32::System::Memory::{
            PAGE_PROTECTION_FLAGS, PAGE_READWRITE, VirtualProtect,
        };

        let mut previous = PAGE_PROTECTION_FLAGS(0);
        unsafe { VirtualProtect(addr.cast_const().cast(), len, PAGE_READWRITE, &mut previous) }.map_err(|e| {
            AppError::with_source(
                ErrorKind::HookFailed,
                format!("VirtualProtect failed for {:#x}", addr as usize),
                e,
            )
        })?;
        Ok(Self {
            addr,
            len,
            previous,
        })
    }
}

#[cfg(windows)]
impl Drop for WritableRegion {
    fn drop(&mut self) {
        use windows::Win32::System::Memory::{PAGE_PROTECTION_FLAGS, VirtualProtect};

        let mut ignored = PAGE_PROTECTION_FLAGS(0);
        if let Err(e) =
            unsafe { VirtualProtect(self.addr.cast_const().cast(), self.len, self.previous, &mut ignored) }
        {
            tracing::warn!(
                addr = %format!("{:#x}", self.addr as usize),
                error = %e,
                "Could not restore page protection"
            );
        }
    }
}
