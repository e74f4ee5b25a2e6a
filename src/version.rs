//! Version reporting. spec.md §1 names this crate's own version as an
//! external collaborator it exposes but does not otherwise specify the
//! implementation of; this just echoes Cargo's own notion of the crate
//! version back to callers, the way `xh_version.c` echoes a baked-in
//! `XH_VERSION_STR` constant.

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_non_empty() {
        assert!(!version().is_empty());
    }
}
