//! `relohook`: a runtime PLT/GOT hooking engine for ELF shared objects.
//!
//! A client [`register`]s a pathname pattern, a symbol name, and a
//! replacement function pointer, then calls [`refresh`] to reconcile the
//! registry against the set of currently loaded shared objects, patching
//! every matching relocation slot found. [`refresh`] may be run
//! synchronously on the calling thread or dispatched to a lazily-spawned
//! background worker. [`clear`] tears the whole engine down.

mod elf;
mod engine;
mod error;
mod maps;
mod object_record;
mod patcher;
mod probe_guard;
mod reconciler;
mod registry;
mod version;
mod worker;

use std::sync::OnceLock;

pub use error::{Error, ErrorCode, Result};
pub use version::version;

static ENGINE: OnceLock<engine::Engine> = OnceLock::new();

fn engine() -> &'static engine::Engine {
    ENGINE.get_or_init(engine::Engine::new)
}

/// Appends a hook binding: `pattern` is matched against each loaded
/// object's absolute pathname, `symbol_name` is looked up in that object's
/// dynamic symbol table, `replacement_fn` becomes the new target for every
/// matching relocation slot, and `original_fn_out` (if given) receives the
/// value the slot held immediately before the first patch applied to it.
///
/// Never blocks on a refresh; the binding only takes effect on the next
/// [`refresh`].
///
/// # Safety
///
/// `replacement_fn` must be a valid function pointer with a signature
/// compatible with the symbol it replaces, and must remain valid for as
/// long as any patched object might call through it. `original_fn_out`, if
/// given, must point to writable storage valid for the same duration.
pub unsafe fn register(
    pattern: &str, symbol_name: &str, replacement_fn: *const (), original_fn_out: Option<*mut *const ()>,
) -> Result<()> {
    engine().register(pattern, symbol_name, replacement_fn, original_fn_out)
}

/// Reconciles the registry against the loader's current mapping report.
/// `asynchronous = false` patches every matching object before returning;
/// `asynchronous = true` wakes the background worker and returns
/// immediately, coalescing with any refresh already in flight.
pub fn refresh(asynchronous: bool) -> Result<()> {
    engine().refresh(asynchronous)
}

/// Raises or lowers the `log` facade's effective level threshold.
pub fn set_debug(enabled: bool) {
    engine().set_debug(enabled);
}

/// Stops the background worker, uninstalls the probe guard, and frees
/// every registered hook and known object. Matches spec.md §3's "single
/// init/teardown cycle" for the process-wide engine state: calls to
/// [`register`]/[`refresh`] after [`clear`] reuse the same emptied
/// registry and known-object map, but the probe guard and worker are not
/// reinstalled (`core_init`/worker spawn are each one-shot for the life of
/// the process).
pub fn clear() {
    engine().clear();
}
