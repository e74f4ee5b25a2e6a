//! Architecture-specific "which relocation types are hookable pointer
//! slots" tables. Grounded on the per-architecture relocation match arms
//! in the teacher's `jni.rs::initialize` (`R_X86_64_GLOB_DAT` /
//! `R_X86_64_JUMP_SLOT` / `R_AARCH64_GLOB_DAT` / `R_AARCH64_JUMP_SLOT` /
//! `R_AARCH64_ABS64`) and the constant tables in
//! `weizhiao-rust-elfloader`'s `src/arch/*.rs`. spec.md §4.1 requires
//! "the common 32- and 64-bit RISC and CISC variants"; this table covers
//! x86, x86-64, arm, aarch64 and riscv64.

use elf::abi::*;

/// Whether the platform's relocation entries carry an explicit addend
/// (`Rela`, e.g. `.rela.plt`) or not (`Rel`, e.g. `.rel.plt`) — spec.md
/// §4.1 step 4. This is a property of the ABI, not of any single
/// relocation section, so it is looked up once per `ElfView`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocForm {
    Rel,
    Rela,
}

/// The architecture-specific table this crate currently understands.
/// `host()` returns the table matching the architecture this crate itself
/// was compiled for — the engine only ever hooks objects loaded into its
/// own address space, so the host architecture is always the relevant one.
pub struct ArchTable {
    pub reloc_form: RelocForm,
    /// Relocation types meaning "write the resolved symbol's absolute
    /// address into this slot" — the PLT/GOT jump-slot and glob-dat types,
    /// plus any plain absolute-pointer type sharing their semantics.
    pub pointer_types: &'static [u32],
}

#[cfg(target_arch = "x86_64")]
pub fn host() -> ArchTable {
    ArchTable { reloc_form: RelocForm::Rela, pointer_types: &[R_X86_64_GLOB_DAT, R_X86_64_JUMP_SLOT, R_X86_64_64] }
}

#[cfg(target_arch = "x86")]
pub fn host() -> ArchTable {
    ArchTable { reloc_form: RelocForm::Rel, pointer_types: &[R_386_GLOB_DAT, R_386_JMP_SLOT, R_386_32] }
}

#[cfg(target_arch = "aarch64")]
pub fn host() -> ArchTable {
    ArchTable {
        reloc_form: RelocForm::Rela,
        pointer_types: &[R_AARCH64_GLOB_DAT, R_AARCH64_JUMP_SLOT, R_AARCH64_ABS64],
    }
}

#[cfg(target_arch = "arm")]
pub fn host() -> ArchTable {
    ArchTable { reloc_form: RelocForm::Rel, pointer_types: &[R_ARM_GLOB_DAT, R_ARM_JUMP_SLOT, R_ARM_ABS32] }
}

#[cfg(target_arch = "riscv64")]
pub fn host() -> ArchTable {
    ArchTable { reloc_form: RelocForm::Rela, pointer_types: &[R_RISCV_JUMP_SLOT, R_RISCV_64] }
}

#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "x86",
    target_arch = "aarch64",
    target_arch = "arm",
    target_arch = "riscv64"
)))]
compile_error!("relohook has no relocation-type table for this architecture yet");
