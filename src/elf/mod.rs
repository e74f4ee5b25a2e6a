//! The ELF reader (spec.md §4.1): turns a bare `(base_addr, pathname)` pair
//! into a resolved view over one loaded object's dynamic section, capable
//! of locating a symbol and patching every relocation slot bound to it.
//!
//! Grounded on the teacher's `jni.rs` (the overall "parse once, hook many
//! times" shape of `JNI::new` + repeated `override_symbol`/`get_symbol`
//! calls) with the on-disk/in-file parsing swapped for the raw in-memory
//! overlays in [`raw`] plus the `elf` crate's slice-based table parsers in
//! [`hash`] and [`reloc`] for everything past the dynamic section.

pub mod arch;
pub mod hash;
pub mod raw;
pub mod reloc;

use elf::endian::LittleEndian;
use elf::string_table::StringTable;
use elf::symbol::SymbolTable;

use crate::error::{Error, Result};
use crate::patcher;
use raw::Class as RawClass;

fn to_elf_class(class: RawClass) -> elf::file::Class {
    match class {
        RawClass::Elf32 => elf::file::Class::ELF32,
        RawClass::Elf64 => elf::file::Class::ELF64,
    }
}

/// A resolved view over one loaded object, lazily built by [`ElfView::init`].
/// Holds only addresses and byte-slice bounds, never owns the memory it
/// describes — the object outlives the view for as long as it stays mapped.
pub struct ElfView {
    resolved: Option<Resolved>,
}

struct Resolved {
    base_addr: usize,
    class: elf::file::Class,
    reloc_form: arch::RelocForm,
    pointer_types: &'static [u32],
    symtab_addr: usize,
    strtab_addr: usize,
    strtab_size: usize,
    gnu_hash_addr: Option<usize>,
    sysv_hash_addr: Option<usize>,
    /// `(addr, size)` of the `.rel.plt`/`.rela.plt` table (`DT_JMPREL`).
    plt_reloc: Option<(usize, usize)>,
    /// `(addr, size)` of the `.rel.dyn`/`.rela.dyn` table (`DT_REL`/`DT_RELA`).
    general_reloc: Option<(usize, usize)>,
    /// Conservative upper bound on the object's mapped extent, used to
    /// bound every unsafe slice constructed over its memory.
    image_end: usize,
}

impl ElfView {
    /// A view with nothing resolved yet, matching `object_record.rs`'s
    /// "record exists, contents unread" state before the first refresh
    /// pass reaches it.
    pub fn unopened() -> Self {
        Self { resolved: None }
    }

    pub fn is_initialized(&self) -> bool {
        self.resolved.is_some()
    }

    /// Runs the full resolution sequence spec.md §4.1 describes: header
    /// validation, program-header walk, dynamic-tag walk, then locating
    /// every table needed for symbol lookup and relocation patching.
    /// Leaves the view in the unopened state on any failure so a later
    /// `hook` call fails fast rather than operating on partial state.
    pub fn init(&mut self, base_addr: usize) -> Result<()> {
        match self.try_init(base_addr) {
            Ok(resolved) => {
                log::trace!(
                    "ELF view resolved at {base_addr:#x} ({:?}, gnu_hash={}, sysv_hash={})",
                    resolved.class,
                    resolved.gnu_hash_addr.is_some(),
                    resolved.sysv_hash_addr.is_some()
                );
                self.resolved = Some(resolved);
                Ok(())
            },
            Err(err) => {
                self.resolved = None;
                Err(err)
            },
        }
    }

    fn try_init(&self, base_addr: usize) -> Result<Resolved> {
        let header = raw::read_header(base_addr)?;
        let (segments, load_bias) = raw::read_segments(base_addr, &header)?;
        let tags = raw::read_dynamic_tags(base_addr, header.class, &segments, load_bias)?;

        let addr_of = |tag: i64| -> Option<usize> { raw::find_tag(&tags, tag).map(|v| (v + load_bias) as usize) };
        let val_of = |tag: i64| -> Option<u64> { raw::find_tag(&tags, tag) };

        let symtab_addr = addr_of(raw::DT_SYMTAB).ok_or(Error::MissingDynamicTag(raw::DT_SYMTAB as u64))?;
        let strtab_addr = addr_of(raw::DT_STRTAB).ok_or(Error::MissingDynamicTag(raw::DT_STRTAB as u64))?;
        let strtab_size = val_of(raw::DT_STRSZ).ok_or(Error::MissingDynamicTag(raw::DT_STRSZ as u64))? as usize;

        let gnu_hash_addr = addr_of(raw::DT_GNU_HASH);
        let sysv_hash_addr = addr_of(raw::DT_HASH);
        if gnu_hash_addr.is_none() && sysv_hash_addr.is_none() {
            return Err(Error::MissingDynamicTag(raw::DT_HASH as u64));
        }

        let plt_reloc = match (addr_of(raw::DT_JMPREL), val_of(raw::DT_PLTRELSZ)) {
            (Some(addr), Some(size)) => Some((addr, size as usize)),
            _ => None,
        };
        let general_reloc = match arch::host().reloc_form {
            arch::RelocForm::Rela => match (addr_of(raw::DT_RELA), val_of(raw::DT_RELASZ)) {
                (Some(addr), Some(size)) => Some((addr, size as usize)),
                _ => None,
            },
            arch::RelocForm::Rel => match (addr_of(raw::DT_REL), val_of(raw::DT_RELSZ)) {
                (Some(addr), Some(size)) => Some((addr, size as usize)),
                _ => None,
            },
        };

        let span = raw::image_span(&segments);
        let image_end = base_addr + span as usize;

        let host = arch::host();
        Ok(Resolved {
            base_addr,
            class: to_elf_class(header.class),
            reloc_form: host.reloc_form,
            pointer_types: host.pointer_types,
            symtab_addr,
            strtab_addr,
            strtab_size,
            gnu_hash_addr,
            sysv_hash_addr,
            plt_reloc,
            general_reloc,
            image_end,
        })
    }

    /// Resolves `symbol_name` and patches every PLT-then-general relocation
    /// slot bound to it, writing `new_fn` and reporting the prior value
    /// through `original_fn_out` (spec.md §4.1's `Hook` operation). Returns
    /// `Err(Error::InvalidArgument)`-free success even when no slot matched
    /// (the symbol being entirely absent from this object is not an error —
    /// spec.md §4.1 step 7 treats it as a no-op match).
    pub fn hook(&self, symbol_name: &[u8], new_fn: *const (), original_fn_out: Option<*mut *const ()>) -> Result<()> {
        let resolved = self.resolved.as_ref().ok_or(Error::NotInitialized)?;

        let tail_len = resolved.image_end.saturating_sub(resolved.strtab_addr);
        let strtab_bytes = unsafe { std::slice::from_raw_parts(resolved.strtab_addr as *const u8, resolved.strtab_size.min(tail_len)) };
        let strtab = StringTable::new(strtab_bytes);

        let symtab_tail = resolved.image_end.saturating_sub(resolved.symtab_addr);
        let symtab_bytes = unsafe { std::slice::from_raw_parts(resolved.symtab_addr as *const u8, symtab_tail) };
        let symtab: SymbolTable<LittleEndian> = SymbolTable::new(LittleEndian, resolved.class, symtab_bytes);

        let gnu_hash_bytes = resolved
            .gnu_hash_addr
            .map(|addr| unsafe { std::slice::from_raw_parts(addr as *const u8, resolved.image_end.saturating_sub(addr)) });
        let sysv_hash_bytes = resolved
            .sysv_hash_addr
            .map(|addr| unsafe { std::slice::from_raw_parts(addr as *const u8, resolved.image_end.saturating_sub(addr)) });

        let symbol_display = String::from_utf8_lossy(symbol_name).into_owned();
        let Some((symbol_index, _symbol)) =
            hash::lookup_symbol(resolved.class, gnu_hash_bytes.as_deref(), sysv_hash_bytes.as_deref(), &symtab, &strtab, symbol_name)
        else {
            log::trace!("{symbol_display} not present in this object's dynamic symbol table");
            return Ok(());
        };

        let mut patched_any = false;
        for table in [resolved.plt_reloc, resolved.general_reloc].into_iter().flatten() {
            let (table_addr, table_size) = table;
            let bytes = unsafe { std::slice::from_raw_parts(table_addr as *const u8, table_size) };
            let entries = reloc::iter_entries(resolved.reloc_form, resolved.class, bytes);
            let slots = reloc::matching_slots(&entries, symbol_index, resolved.pointer_types, resolved.base_addr);
            for slot in slots {
                let old = patcher::patch(slot, new_fn as usize)?;
                log::debug!("patched {symbol_display} relocation slot at {slot:#x}: {old:#x} -> {:#x}", new_fn as usize);
                if let Some(out) = original_fn_out {
                    if !patched_any {
                        unsafe { *out = old as *const () };
                    }
                }
                patched_any = true;
            }
        }
        if !patched_any {
            log::trace!("{symbol_display} resolved but bound to no PLT/GOT relocation slot in this object");
        }

        Ok(())
    }
}
