//! Symbol-name -> symbol-table-index lookup via the dynamic symbol hash
//! tables, reusing the `elf` crate's `GnuHashTable`/`SysVHashTable` exactly
//! as the teacher's `jni.rs::find_local_symbol_by_name` does — the
//! difference here is the backing bytes come from an unsafe slice over
//! this process's own mapped memory rather than a file read into a `Vec`.

use elf::endian::LittleEndian;
use elf::file::Class;
use elf::hash::{GnuHashTable, SysVHashTable};
use elf::string_table::StringTable;
use elf::symbol::{Symbol, SymbolTable};

/// Prefers the GNU hash table when present (faster, and the form every
/// modern glibc/musl `.so` ships), falling back to the SysV `.hash`
/// section, matching spec.md §4.1's "prefer GNU hash when present, else
/// SysV hash".
pub fn lookup_symbol(
    class: Class, gnu_hash: Option<&[u8]>, sysv_hash: Option<&[u8]>, symtab: &SymbolTable<LittleEndian>,
    strtab: &StringTable, symbol_name: &[u8],
) -> Option<(usize, Symbol)> {
    if let Some(bytes) = gnu_hash {
        if let Ok(table) = GnuHashTable::new(LittleEndian, class, bytes) {
            if let Ok(Some(found)) = table.find(symbol_name, symtab, strtab) {
                return Some(found);
            }
        }
    }
    if let Some(bytes) = sysv_hash {
        if let Ok(table) = SysVHashTable::new(LittleEndian, class, bytes) {
            if let Ok(Some(found)) = table.find(symbol_name, symtab, strtab) {
                return Some(found);
            }
        }
    }
    None
}
