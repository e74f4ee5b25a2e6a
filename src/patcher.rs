//! The relocation patcher (spec.md §4.2): overwrites one pointer-sized GOT
//! slot with a new value, widening page protection only as far as needed
//! and restoring it before returning, then flushing the instruction cache
//! on architectures where a stale icache entry could otherwise alias the
//! slot. Grounded on the page-alignment and `nix::sys::mman` usage in the
//! teacher's `mmap.rs`, adapted from "map a fresh region" to "temporarily
//! widen an existing mapping's protection". Current protection is read
//! back from `/proc/self/maps` the same way `xh_elf.c` does, rather than
//! assumed, so the restore step never strips a flag (e.g. `PROT_WRITE` on
//! a non-RELRO `.got.plt` page still being lazily bound) or adds one
//! (`PROT_EXEC` on a data page) the page didn't already carry.

use std::ffi::c_void;
use std::fs;

use nix::sys::mman::{mprotect, ProtFlags};
use nix::unistd::{sysconf, SysconfVar};

use crate::error::{Error, Result};

fn page_size() -> usize {
    sysconf(SysconfVar::PAGE_SIZE).ok().flatten().unwrap_or(4096) as usize
}

fn align_down(addr: usize, align: usize) -> usize {
    addr & !(align - 1)
}

/// Reads `/proc/self/maps` and returns the protection flags of the mapping
/// containing `addr`, matching spec.md §4.2's "Query current protection".
fn current_protection(addr: usize) -> Result<ProtFlags> {
    let report = fs::read_to_string("/proc/self/maps").map_err(Error::MapsUnavailable)?;
    for line in report.lines() {
        let mut parts = line.splitn(2, ' ');
        let Some(range) = parts.next() else { continue };
        let Some((start_str, end_str)) = range.split_once('-') else { continue };
        let (Ok(start), Ok(end)) = (usize::from_str_radix(start_str, 16), usize::from_str_radix(end_str, 16)) else {
            continue;
        };
        if addr < start || addr >= end {
            continue;
        }
        let perms = parts.next().unwrap_or("").trim_start().as_bytes();
        if perms.len() < 3 {
            continue;
        }
        let mut flags = ProtFlags::empty();
        if perms[0] == b'r' {
            flags |= ProtFlags::PROT_READ;
        }
        if perms[1] == b'w' {
            flags |= ProtFlags::PROT_WRITE;
        }
        if perms[2] == b'x' {
            flags |= ProtFlags::PROT_EXEC;
        }
        return Ok(flags);
    }
    Err(Error::ProtectionDenied(addr, 0, std::io::Error::new(std::io::ErrorKind::NotFound, "address not present in /proc/self/maps")))
}

/// Writes `new_value` into the pointer-sized slot at `addr`, returning the
/// value that was there before (spec.md §4.2's "old function pointer").
/// Rejects slots whose pointer-sized span straddles a page boundary
/// (`Error::UnalignedStraddle`) rather than widening two pages, matching
/// spec.md §4.2's explicit edge case. Idempotent: patching a slot that
/// already holds `new_value` is a no-op write that still reports
/// `new_value` as the "old" value.
pub fn patch(addr: usize, new_value: usize) -> Result<usize> {
    let ptr_size = std::mem::size_of::<usize>();
    let size = page_size();

    if addr % ptr_size != 0 {
        return Err(Error::UnalignedStraddle(addr));
    }
    let page_start = align_down(addr, size);
    if page_start != align_down(addr + ptr_size - 1, size) {
        return Err(Error::UnalignedStraddle(addr));
    }

    let slot = addr as *mut usize;
    let old_value = unsafe { std::ptr::read_volatile(slot) };
    if old_value == new_value {
        log::trace!("slot at {addr:#x} already holds {new_value:#x}, no-op");
        return Ok(old_value);
    }

    let current = current_protection(page_start)?;
    unsafe { widen_and_write(page_start, size, slot, new_value, current)? };
    flush_icache(addr, ptr_size);
    log::trace!("slot at {addr:#x}: {old_value:#x} -> {new_value:#x}");
    Ok(old_value)
}

/// Widens `page_start..page_start+page_len` to `current | PROT_WRITE` only
/// if it isn't already writable, performs the store, then restores exactly
/// `current` — never a hardcoded guess (spec.md §4.2: "Restore the prior
/// protection").
unsafe fn widen_and_write(page_start: usize, page_len: usize, slot: *mut usize, new_value: usize, current: ProtFlags) -> Result<()> {
    let page_ptr = page_start as *mut c_void;
    let widened = current | ProtFlags::PROT_WRITE;
    let needs_widen = widened != current;

    if needs_widen {
        mprotect(page_ptr, page_len, widened).map_err(|e| Error::ProtectionDenied(page_start, page_len, std::io::Error::from(e)))?;
    }

    std::ptr::write_volatile(slot, new_value);

    if needs_widen {
        mprotect(page_ptr, page_len, current).map_err(|e| Error::ProtectionDenied(page_start, page_len, std::io::Error::from(e)))?;
    }
    Ok(())
}

#[cfg(any(target_arch = "arm", target_arch = "aarch64"))]
fn flush_icache(addr: usize, len: usize) {
    extern "C" {
        fn __clear_cache(begin: *mut c_void, end: *mut c_void);
    }
    unsafe { __clear_cache(addr as *mut c_void, (addr + len) as *mut c_void) };
}

/// x86/x86-64 keep the instruction and data caches coherent in hardware; a
/// GOT slot write is visible to subsequent jump-slot reads without an
/// explicit flush.
#[cfg(not(any(target_arch = "arm", target_arch = "aarch64")))]
fn flush_icache(_addr: usize, _len: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_rejects_misaligned_slot() {
        let err = patch(1, 0x1234).unwrap_err();
        assert!(matches!(err, Error::UnalignedStraddle(1)));
    }

    #[test]
    fn patch_is_idempotent_against_the_same_value() {
        let mut slot: usize = 0xdead_beef;
        let addr = &mut slot as *mut usize as usize;
        let old = patch(addr, 0xdead_beef).expect("same-value patch is a no-op write");
        assert_eq!(old, 0xdead_beef);
        assert_eq!(slot, 0xdead_beef);
    }

    #[test]
    fn patch_writes_through_on_a_non_executable_data_page() {
        // A stack slot's page is read/write but never executable. Patching
        // it must not require PROT_EXEC, and must leave the page writable
        // and non-executable afterward rather than assuming R|X.
        let mut slot: usize = 0x1111_1111;
        let addr = &mut slot as *mut usize as usize;
        let old = patch(addr, 0x2222_2222).expect("patch should succeed against a real data page");
        assert_eq!(old, 0x1111_1111);
        assert_eq!(slot, 0x2222_2222);

        let page_start = align_down(addr, page_size());
        let protection = current_protection(page_start).expect("the page should still be mapped");
        assert!(protection.contains(ProtFlags::PROT_WRITE), "protection should have been restored to writable");
        assert!(!protection.contains(ProtFlags::PROT_EXEC), "a data page must not gain PROT_EXEC");
    }
}
