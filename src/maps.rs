//! The loader's mapping report: `/proc/self/maps` on Linux, one line per
//! mapped region (`start-end perms offset dev inode pathname`). Grounded on
//! `xh_core_refresh_impl`'s `fgets`/`sscanf` loop in `xh_core.c`, reworked
//! around an injectable source so the reconciler (`crate::reconciler`) is
//! testable without real `dlopen`/`dlclose` timing (spec.md §9's second
//! open question: this crate grows rather than truncates long lines, since
//! `BufRead::lines` has no fixed-size buffer to overflow).

use std::fs;
use std::io;

/// Where the reconciler reads the current set of mapped regions from.
///
/// Production code uses [`ProcSelfMaps`]; tests inject a fixed string via
/// `crate::maps::StaticMaps` so duplicate-pathname, unload, and rebase
/// scenarios (spec.md §8) can be driven deterministically.
pub trait MapsSource {
    fn read(&self) -> io::Result<String>;
}

#[derive(Default)]
pub struct ProcSelfMaps;

impl MapsSource for ProcSelfMaps {
    fn read(&self) -> io::Result<String> {
        fs::read_to_string("/proc/self/maps")
    }
}

#[cfg(test)]
pub struct StaticMaps(pub String);

#[cfg(test)]
impl MapsSource for StaticMaps {
    fn read(&self) -> io::Result<String> {
        Ok(self.0.clone())
    }
}

/// One parsed, already-filtered candidate line: readable, private,
/// offset-zero, with a non-synthetic, non-empty pathname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    pub base_addr: usize,
    pub pathname: String,
}

/// Parses a single `/proc/self/maps` line into a candidate [`MapEntry`],
/// applying every filter spec.md §4.5 step 1 names. Returns `None` for
/// lines that are not offset-zero, readable, private ELF-header
/// candidates, or whose pathname is synthetic/empty/unreadable.
fn parse_line(line: &str) -> Option<MapEntry> {
    let mut parts = line.splitn(6, ' ');
    let addr_range = parts.next()?;
    let perms = parts.next()?;
    let offset = parts.next()?;
    let _dev = parts.next()?;
    let _inode = parts.next()?;
    let rest = parts.next().unwrap_or("").trim();

    let (start_str, _end_str) = addr_range.split_once('-')?;
    let base_addr = usize::from_str_radix(start_str, 16).ok()?;

    let perms = perms.as_bytes();
    if perms.len() < 4 {
        return None;
    }
    if perms[0] != b'r' {
        return None;
    }
    if perms[3] != b'p' {
        return None;
    }

    let offset = u64::from_str_radix(offset, 16).ok()?;
    if offset != 0 {
        return None;
    }

    if rest.is_empty() {
        return None;
    }
    if rest.starts_with('[') {
        return None;
    }

    Some(MapEntry { base_addr, pathname: rest.to_owned() })
}

/// Parses every candidate mapping out of a full mapping-report string, in
/// report order.
pub fn parse_candidates(report: &str) -> Vec<MapEntry> {
    report.lines().filter_map(parse_line).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_non_candidate_lines() {
        let report = concat!(
            "55a1b2c3d000-55a1b2c3e000 r-xp 00000000 08:01 131 /usr/lib/libfoo.so\n",
            "55a1b2c3e000-55a1b2c3f000 rw-p 00001000 08:01 131 /usr/lib/libfoo.so\n",
            "7fabc0000000-7fabc0021000 rw-s 00000000 00:00 0 /dev/zero (deleted)\n",
            "7fabc1000000-7fabc1021000 r--p 00000000 08:01 200 [vdso]\n",
            "7fabc2000000-7fabc2021000 ---p 00000000 00:00 0 \n",
        );
        let candidates = parse_candidates(report);
        assert_eq!(candidates, vec![MapEntry { base_addr: 0x55a1b2c3d000, pathname: "/usr/lib/libfoo.so".into() }]);
    }

    #[test]
    fn ignores_shared_mappings() {
        let report = "7fabc0000000-7fabc0021000 r--s 00000000 08:01 5 /usr/lib/libshared.so\n";
        assert!(parse_candidates(report).is_empty());
    }

    #[test]
    fn keeps_report_order_for_duplicates() {
        let report = concat!(
            "10000-11000 r-xp 00000000 08:01 1 /lib/libdup.so\n",
            "20000-21000 r-xp 00000000 08:01 1 /lib/libdup.so\n",
        );
        let candidates = parse_candidates(report);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].base_addr, 0x10000);
        assert_eq!(candidates[1].base_addr, 0x20000);
    }
}
