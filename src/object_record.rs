//! One entry in the reconciler's keyed view of currently-known loaded
//! objects. Grounded on `xh_core_map_info_t` in `xh_core.c` (a red-black
//! tree keyed by `pathname`); this crate uses a `HashMap<String, ObjectRecord>`
//! instead, per `DESIGN.md`'s note on replacing the intrusive RB-tree with
//! an ordinary keyed associative container.

use crate::elf::ElfView;

pub struct ObjectRecord {
    pub pathname: String,
    pub base_addr: usize,
    pub elf_view: ElfView,
}

impl ObjectRecord {
    pub fn new(pathname: String, base_addr: usize) -> Self {
        Self { pathname, base_addr, elf_view: ElfView::unopened() }
    }
}
