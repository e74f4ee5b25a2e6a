//! Raw ELF header/program-header/dynamic-tag overlays read directly out of
//! a live, already-mapped image.
//!
//! The `elf` crate's header parsers (`elf::file::FileHeader`,
//! `elf::segment::ProgramHeader`) are built around a contiguous on-disk
//! byte buffer (`ElfBytes`/`ElfStream`); the image this crate inspects has
//! already been relocated and paged in by the dynamic loader, so its
//! `e_shoff`-relative layout no longer corresponds to file offsets in any
//! useful way at this level. Header/program-header/dynamic-tag structs are
//! therefore read as repr(C) overlays directly from `base_addr`, matching
//! `xh_elf.c`'s `ELFW()`-macro-driven pointer walk. Everything downstream
//! of the dynamic section (hash tables, symbol table, string table,
//! relocation tables) is handed off to the `elf` crate's slice-based
//! parsing primitives in `crate::elf::hash` and `crate::elf::reloc`.

use std::mem::size_of;

use crate::error::{Error, Result};
use crate::probe_guard::probe;

pub const EI_NIDENT: usize = 16;
pub const ELFMAG: [u8; 4] = [0x7f, b'E', b'L', b'F'];

pub const ELFCLASS32: u8 = 1;
pub const ELFCLASS64: u8 = 2;
pub const ELFDATA2LSB: u8 = 1;
pub const ET_DYN: u16 = 3;
pub const ET_EXEC: u16 = 2;
pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;

pub const DT_NULL: i64 = 0;
pub const DT_HASH: i64 = 4;
pub const DT_STRTAB: i64 = 5;
pub const DT_SYMTAB: i64 = 6;
pub const DT_RELA: i64 = 7;
pub const DT_RELASZ: i64 = 8;
pub const DT_RELAENT: i64 = 9;
pub const DT_STRSZ: i64 = 10;
pub const DT_SYMENT: i64 = 11;
pub const DT_REL: i64 = 17;
pub const DT_RELSZ: i64 = 18;
pub const DT_RELENT: i64 = 19;
pub const DT_PLTREL: i64 = 20;
pub const DT_JMPREL: i64 = 23;
pub const DT_PLTRELSZ: i64 = 2;
pub const DT_GNU_HASH: i64 = 0x6ffffef5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Elf32,
    Elf64,
}

/// Fields extracted from the ELF header that the rest of the reader needs,
/// independent of 32/64-bit class.
#[derive(Debug)]
pub struct ElfHeader {
    pub class: Class,
    pub e_type: u16,
    pub e_phoff: u64,
    pub e_phentsize: u16,
    pub e_phnum: u16,
}

#[repr(C)]
struct Elf64Ehdr {
    e_ident: [u8; EI_NIDENT],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u64,
    e_phoff: u64,
    e_shoff: u64,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

#[repr(C)]
struct Elf32Ehdr {
    e_ident: [u8; EI_NIDENT],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u32,
    e_phoff: u32,
    e_shoff: u32,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Elf64Phdr {
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_paddr: u64,
    p_filesz: u64,
    p_memsz: u64,
    p_align: u64,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Elf32Phdr {
    p_type: u32,
    p_offset: u32,
    p_vaddr: u32,
    p_paddr: u32,
    p_filesz: u32,
    p_memsz: u32,
    p_flags: u32,
    p_align: u32,
}

/// A single `PT_LOAD` segment's virtual address, memory size and type,
/// normalized to `u64` regardless of class.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub p_type: u32,
    pub p_vaddr: u64,
    pub p_memsz: u64,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Elf64Dyn {
    d_tag: i64,
    d_val: u64,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Elf32Dyn {
    d_tag: i32,
    d_val: u32,
}

/// One parsed `PT_DYNAMIC` tag, value already widened to `u64`.
#[derive(Debug, Clone, Copy)]
pub struct DynTag {
    pub tag: i64,
    pub val: u64,
}

/// Validates the ELF magic/class/encoding/type at `base_addr` and returns
/// the normalized header fields. This is the "late, cheap" check spec.md
/// §4.5 step 3 calls for, performed with the probe guard active so a
/// transient unreadable mapping becomes a `ProbeFault` instead of a crash.
pub fn read_header(base_addr: usize) -> Result<ElfHeader> {
    probe(base_addr, EI_NIDENT, || unsafe { read_header_unchecked(base_addr) })
}

unsafe fn read_header_unchecked(base_addr: usize) -> Result<ElfHeader> {
    let ident = std::slice::from_raw_parts(base_addr as *const u8, EI_NIDENT);
    if ident[0..4] != ELFMAG {
        return Err(Error::MalformedElfHeader(base_addr));
    }
    let class = match ident[4] {
        ELFCLASS32 => Class::Elf32,
        ELFCLASS64 => Class::Elf64,
        _ => return Err(Error::MalformedElfHeader(base_addr)),
    };
    if ident[5] != ELFDATA2LSB {
        // Only little-endian targets are supported (spec.md §4.1 step 1).
        return Err(Error::MalformedElfHeader(base_addr));
    }
    #[cfg(target_pointer_width = "64")]
    let host_class = Class::Elf64;
    #[cfg(target_pointer_width = "32")]
    let host_class = Class::Elf32;
    if class != host_class {
        return Err(Error::MalformedElfHeader(base_addr));
    }

    match class {
        Class::Elf64 => {
            let hdr = &*(base_addr as *const Elf64Ehdr);
            if hdr.e_type != ET_DYN && hdr.e_type != ET_EXEC {
                return Err(Error::MalformedElfHeader(base_addr));
            }
            Ok(ElfHeader { class, e_type: hdr.e_type, e_phoff: hdr.e_phoff, e_phentsize: hdr.e_phentsize, e_phnum: hdr.e_phnum })
        },
        Class::Elf32 => {
            let hdr = &*(base_addr as *const Elf32Ehdr);
            if hdr.e_type != ET_DYN && hdr.e_type != ET_EXEC {
                return Err(Error::MalformedElfHeader(base_addr));
            }
            Ok(ElfHeader {
                class,
                e_type: hdr.e_type,
                e_phoff: hdr.e_phoff as u64,
                e_phentsize: hdr.e_phentsize,
                e_phnum: hdr.e_phnum,
            })
        },
    }
}

/// Walks the program header table, returning every segment plus the load
/// bias computed from the first `PT_LOAD` segment (spec.md §4.1 step 2).
pub fn read_segments(base_addr: usize, header: &ElfHeader) -> Result<(Vec<Segment>, u64)> {
    let table_addr = base_addr + header.e_phoff as usize;
    let count = header.e_phnum as usize;
    let mut segments = Vec::with_capacity(count);

    match header.class {
        Class::Elf64 => {
            let size = size_of::<Elf64Phdr>();
            probe(table_addr, size * count, || unsafe {
                let raw = std::slice::from_raw_parts(table_addr as *const Elf64Phdr, count);
                for phdr in raw {
                    segments.push(Segment { p_type: phdr.p_type, p_vaddr: phdr.p_vaddr, p_memsz: phdr.p_memsz });
                }
                Ok(())
            })?;
        },
        Class::Elf32 => {
            let size = size_of::<Elf32Phdr>();
            probe(table_addr, size * count, || unsafe {
                let raw = std::slice::from_raw_parts(table_addr as *const Elf32Phdr, count);
                for phdr in raw {
                    segments.push(Segment { p_type: phdr.p_type, p_vaddr: phdr.p_vaddr as u64, p_memsz: phdr.p_memsz as u64 });
                }
                Ok(())
            })?;
        },
    }

    let first_load_vaddr = segments.iter().find(|s| s.p_type == PT_LOAD).map(|s| s.p_vaddr).unwrap_or(0);
    let load_bias = if first_load_vaddr != 0 { base_addr as u64 - first_load_vaddr } else { base_addr as u64 };
    Ok((segments, load_bias))
}

/// Locates `PT_DYNAMIC` among already-parsed segments and walks its tags,
/// applying `load_bias` to every pointer-valued tag (spec.md §4.1 step 3).
/// Stops at `DT_NULL`, matching every ELF consumer's dynamic-tag walk.
pub fn read_dynamic_tags(base_addr: usize, class: Class, segments: &[Segment], load_bias: u64) -> Result<Vec<DynTag>> {
    let dynamic = segments.iter().find(|s| s.p_type == PT_DYNAMIC).ok_or(Error::MissingDynamicTag(0))?;
    let dyn_addr = (dynamic.p_vaddr + load_bias) as usize;

    let mut tags = Vec::new();
    match class {
        Class::Elf64 => {
            let mut cursor = dyn_addr;
            loop {
                let entry = probe(cursor, size_of::<Elf64Dyn>(), || unsafe { Ok(*(cursor as *const Elf64Dyn)) })?;
                if entry.d_tag == DT_NULL {
                    break;
                }
                tags.push(DynTag { tag: entry.d_tag, val: entry.d_val });
                cursor += size_of::<Elf64Dyn>();
            }
        },
        Class::Elf32 => {
            let mut cursor = dyn_addr;
            loop {
                let entry = probe(cursor, size_of::<Elf32Dyn>(), || unsafe { Ok(*(cursor as *const Elf32Dyn)) })?;
                if entry.d_tag as i64 == DT_NULL {
                    break;
                }
                tags.push(DynTag { tag: entry.d_tag as i64, val: entry.d_val as u64 });
                cursor += size_of::<Elf32Dyn>();
            }
        },
    }
    Ok(tags)
}

pub fn find_tag(tags: &[DynTag], tag: i64) -> Option<u64> {
    tags.iter().find(|t| t.tag == tag).map(|t| t.val)
}

/// Size of the mapped image from the first `PT_LOAD` segment's vaddr to the
/// highest `p_vaddr + p_memsz` among all `PT_LOAD` segments. Used to bound
/// the single unsafe byte slice handed to the `elf` crate's hash/symbol/
/// string/relocation table parsers (none of those on-disk formats carry
/// their own total length, so some conservative upper bound is required).
pub fn image_span(segments: &[Segment]) -> u64 {
    let first = segments.iter().find(|s| s.p_type == PT_LOAD).map(|s| s.p_vaddr).unwrap_or(0);
    let end = segments.iter().filter(|s| s.p_type == PT_LOAD).map(|s| s.p_vaddr + s.p_memsz).max().unwrap_or(0);
    end.saturating_sub(first)
}
