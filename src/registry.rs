//! The hook registry: an append-only, insertion-ordered sequence of
//! [`HookSpec`]s. Grounded on `xh_core_register`/`xh_core_hook_info` in
//! `xh_core.c` — a `TAILQ` of hook entries consulted on every refresh.

use regex::Regex;

use crate::error::{Error, Result};

/// One registered hook binding. Immutable once created; the only way to
/// remove it is [`crate::Engine::clear`], which drops the whole registry.
pub struct HookSpec {
    pub(crate) pathname_pattern: Regex,
    pub(crate) pattern_str: String,
    pub(crate) symbol_name: String,
    pub(crate) replacement_fn: *const (),
    pub(crate) original_fn_out: Option<*mut *const ()>,
}

// HookSpec is only ever touched under `registry_lock`/`refresh_lock`, and
// the raw pointers it carries are opaque function addresses the caller is
// responsible for, matching spec.md §5's "no thread-safety for the
// replacement function's own state".
unsafe impl Send for HookSpec {}
unsafe impl Sync for HookSpec {}

impl HookSpec {
    pub fn pathname_matches(&self, pathname: &str) -> bool {
        self.pathname_pattern.is_match(pathname)
    }
}

/// Append-only sequence of [`HookSpec`]s, guarded by the owning
/// [`crate::Engine`]'s `registry_lock`.
#[derive(Default)]
pub struct Registry {
    specs: Vec<HookSpec>,
}

impl Registry {
    pub const fn new() -> Self {
        Self { specs: Vec::new() }
    }

    /// Compiles `pattern_str` and appends the resulting [`HookSpec`] to the
    /// tail of the registry. Never triggers a refresh (spec.md §4.4).
    ///
    /// `pattern_str` is compiled with the `regex` crate, which accepts a
    /// superset of POSIX extended regular expressions for the constructs
    /// this crate's scenarios use (anchors, alternation, character classes,
    /// basic quantifiers) — not a strict POSIX ERE implementation. See
    /// `DESIGN.md` for the rationale.
    pub fn register(
        &mut self, pattern_str: &str, symbol_name: &str, replacement_fn: *const (),
        original_fn_out: Option<*mut *const ()>,
    ) -> Result<()> {
        if pattern_str.is_empty() || symbol_name.is_empty() || replacement_fn.is_null() {
            return Err(Error::InvalidArgument);
        }
        let pathname_pattern = Regex::new(pattern_str)?;
        log::debug!("registered hook for symbol {symbol_name} against pattern {pattern_str:?}");
        self.specs.push(HookSpec {
            pathname_pattern,
            pattern_str: pattern_str.to_owned(),
            symbol_name: symbol_name.to_owned(),
            replacement_fn,
            original_fn_out,
        });
        Ok(())
    }

    /// Insertion-order snapshot of every registered hook.
    pub fn iter(&self) -> impl Iterator<Item = &HookSpec> {
        self.specs.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Drops every registered hook. Only called from [`crate::Engine::clear`].
    pub fn clear(&mut self) {
        self.specs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_rejects_empty_fields() {
        let mut registry = Registry::new();
        let dummy = 0x1000 as *const ();
        assert!(matches!(registry.register("", "malloc", dummy, None), Err(Error::InvalidArgument)));
        assert!(matches!(registry.register(".*", "", dummy, None), Err(Error::InvalidArgument)));
        assert!(matches!(
            registry.register(".*", "malloc", std::ptr::null(), None),
            Err(Error::InvalidArgument)
        ));
    }

    #[test]
    fn register_rejects_invalid_regex() {
        let mut registry = Registry::new();
        let dummy = 0x1000 as *const ();
        assert!(matches!(registry.register("[", "malloc", dummy, None), Err(Error::InvalidRegex(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn register_appends_in_order() {
        let mut registry = Registry::new();
        let a = 0x1000 as *const ();
        let b = 0x2000 as *const ();
        registry.register(".*/liba\\.so$", "foo", a, None).unwrap();
        registry.register(".*/libb\\.so$", "bar", b, None).unwrap();
        let symbols: Vec<&str> = registry.iter().map(|h| h.symbol_name.as_str()).collect();
        assert_eq!(symbols, vec!["foo", "bar"]);
    }

    #[test]
    fn pattern_matching_is_zero_or_multi() {
        let mut registry = Registry::new();
        let dummy = 0x1000 as *const ();
        registry.register(".*/libfoo\\.so$", "malloc", dummy, None).unwrap();
        let spec = registry.iter().next().unwrap();
        assert!(!spec.pathname_matches("/lib/libbar.so"));
        assert!(spec.pathname_matches("/usr/lib/libfoo.so"));
    }
}
