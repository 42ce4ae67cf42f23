//! Scanner for the kernel's per-process memory-map listing.

use std::fs;

use nix::unistd::Pid;

use crate::error::{Error, Result};

/// Substring identifying the C library in a maps pathname.
pub const LIBC_NEEDLE: &str = "/libc";

/// Start address of the text mapping of the library identified by
/// `needle` in a `/proc/<pid>/maps` listing.
///
/// Only executable, non-writable, private mappings qualify. A needle
/// match followed by a lowercase letter is a prefix of a longer
/// library name (`/libc` inside `/libcrypt`) and is skipped.
pub fn scan(listing: &str, needle: &str) -> Option<u64> {
    for line in listing.lines() {
        let mut fields = line.split_whitespace();
        let (Some(range), Some(perms)) = (fields.next(), fields.next()) else {
            continue;
        };
        if perms != "r-xp" {
            continue;
        }
        // skip offset, device and inode to reach the pathname
        let Some(path) = fields.nth(3) else {
            continue;
        };
        let Some(pos) = path.find(needle) else {
            continue;
        };
        let tail = &path[pos + needle.len()..];
        if tail.chars().next().is_some_and(|c| c.is_ascii_lowercase()) {
            continue;
        }
        let start = range.split('-').next()?;
        return u64::from_str_radix(start, 16).ok();
    }
    None
}

/// Scans the target's maps listing for the library's load base.
pub fn library_base(pid: Pid, needle: &str) -> Result<u64> {
    let listing = fs::read_to_string(format!("/proc/{}/maps", pid))?;
    scan(&listing, needle).ok_or_else(|| Error::LibraryNotFound {
        needle: needle.to_string(),
        pid: pid.as_raw(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::getpid;

    const LIBC: &str =
        "7f1c7a446000-7f1c7a5db000 r-xp 00022000 103:02 3675501                   /usr/lib/x86_64-linux-gnu/libc-2.31.so\n";
    const LIBC_DATA: &str =
        "7f1c7a5db000-7f1c7a629000 rw-p 001b7000 103:02 3675501                   /usr/lib/x86_64-linux-gnu/libc-2.31.so\n";
    const LIBCRYPT: &str =
        "7f1c7a3f0000-7f1c7a40e000 r-xp 00008000 103:02 3675542                   /usr/lib/x86_64-linux-gnu/libcrypt.so.1\n";
    const ANON: &str = "7f1c7a880000-7f1c7a881000 r-xp 00000000 00:00 0\n";

    #[test]
    fn scan_prefers_libc_over_libcrypt() {
        let listing = format!("{LIBCRYPT}{LIBC}");
        assert_eq!(scan(&listing, LIBC_NEEDLE), Some(0x7f1c_7a44_6000));
    }

    #[test]
    fn scan_rejects_a_lone_libcrypt() {
        assert_eq!(scan(LIBCRYPT, LIBC_NEEDLE), None);
    }

    #[test]
    fn scan_skips_non_text_segments() {
        assert_eq!(scan(LIBC_DATA, LIBC_NEEDLE), None);
        let listing = format!("{LIBC_DATA}{LIBC}");
        assert_eq!(scan(&listing, LIBC_NEEDLE), Some(0x7f1c_7a44_6000));
    }

    #[test]
    fn scan_ignores_anonymous_mappings() {
        assert_eq!(scan(ANON, LIBC_NEEDLE), None);
    }

    #[test]
    fn scan_accepts_the_unversioned_soname() {
        let line =
            "7f0a12c00000-7f0a12d85000 r-xp 00028000 fe:01 132  /usr/lib/x86_64-linux-gnu/libc.so.6\n";
        assert_eq!(scan(line, LIBC_NEEDLE), Some(0x7f0a_12c0_0000));
    }

    #[test]
    fn this_process_has_a_locatable_libc() {
        let base = library_base(getpid(), LIBC_NEEDLE).unwrap();
        assert_ne!(base, 0);
    }
}
