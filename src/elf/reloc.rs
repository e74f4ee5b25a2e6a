//! Relocation table iteration and the symbol-to-relocation-slot lookup
//! spec.md §4.1 asks the ELF reader to expose. Grounded on the relocation
//! handling in the teacher's `jni.rs::initialize`/`plt_callback`, adapted
//! from "apply every relocation while loading" to "find the slot(s)
//! matching one symbol and report their addresses" — this crate never
//! resolves or applies a relocation's *original* meaning, it only locates
//! slots for the patcher to retarget.

use elf::endian::LittleEndian;
use elf::parse::ParsingTable;
use elf::relocation::{Rel, Rela};

use crate::elf::arch::RelocForm;

/// One relocation entry normalized across `Rel`/`Rela`, with the addend
/// folded in as `0` for `Rel` forms (spec.md §4.1 step 4).
#[derive(Debug, Clone, Copy)]
pub struct RelocEntry {
    pub r_offset: u64,
    pub r_type: u32,
    pub r_sym: u32,
}

pub fn iter_entries(form: RelocForm, class: elf::file::Class, bytes: &[u8]) -> Vec<RelocEntry> {
    match form {
        RelocForm::Rel => {
            let table: ParsingTable<LittleEndian, Rel> = ParsingTable::new(LittleEndian, class, bytes);
            table.iter().map(|r| RelocEntry { r_offset: r.r_offset, r_type: r.r_type, r_sym: r.r_sym }).collect()
        },
        RelocForm::Rela => {
            let table: ParsingTable<LittleEndian, Rela> = ParsingTable::new(LittleEndian, class, bytes);
            table.iter().map(|r| RelocEntry { r_offset: r.r_offset, r_type: r.r_type, r_sym: r.r_sym }).collect()
        },
    }
}

/// Finds every relocation slot in `entries` bound to `symbol_index` whose
/// type is one of `pointer_types` (spec.md §4.1's "absolute pointer or
/// jump-slot types"), returning each slot's virtual address
/// (`base_addr + r_offset`).
pub fn matching_slots(entries: &[RelocEntry], symbol_index: usize, pointer_types: &[u32], base_addr: usize) -> Vec<usize> {
    entries
        .iter()
        .filter(|e| e.r_sym as usize == symbol_index && pointer_types.contains(&e.r_type))
        .map(|e| base_addr + e.r_offset as usize)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_slots_filters_by_symbol_and_type() {
        let entries = vec![
            RelocEntry { r_offset: 0x10, r_type: 1, r_sym: 5 },
            RelocEntry { r_offset: 0x20, r_type: 7, r_sym: 5 },
            RelocEntry { r_offset: 0x30, r_type: 1, r_sym: 9 },
        ];
        let slots = matching_slots(&entries, 5, &[1], 0x1000);
        assert_eq!(slots, vec![0x1010]);
    }
}
