//! Cross-address-space symbol resolution.
//!
//! Both this tool and the target map the same C library image; a
//! symbol therefore sits at the same offset from the image base in
//! each process, and the target-space address follows from the two
//! load bases. This holds only while the on-disk library has not been
//! swapped or upgraded underneath the target.

use libloading::os::unix::Library;
use nix::unistd::{getpid, Pid};

use crate::addr::{LocalAddr, RemoteAddr};
use crate::error::{Error, Result};
use crate::maps;

/// Soname the dynamic loader resolves to the already-mapped C library.
const LIBC_SONAME: &str = "libc.so.6";

/// The environment-lookup routine called inside the target.
pub const LOOKUP_SYMBOL: &str = "getenv";

/// Load bases of the same library image in this process and in the
/// target.
#[derive(Debug, Clone, Copy)]
pub struct LibraryPlacement {
    local_base: LocalAddr,
    remote_base: RemoteAddr,
}

impl LibraryPlacement {
    /// Locates the library's text mapping in both address spaces.
    /// Fails before any target mutation when either is missing.
    pub fn locate(target: Pid, needle: &str) -> Result<Self> {
        let remote_base = RemoteAddr::new(maps::library_base(target, needle)?);
        let local_base = LocalAddr::new(maps::library_base(getpid(), needle)?);
        log::debug!(
            "library bases: local {:#x}, remote {:#x}",
            local_base,
            remote_base
        );
        Ok(Self {
            local_base,
            remote_base,
        })
    }

    /// Applies this placement's base offset to a symbol address mapped
    /// into this process.
    pub fn resolve(&self, local_sym: LocalAddr) -> RemoteAddr {
        let offset = local_sym.get().wrapping_sub(self.local_base.get());
        RemoteAddr::new(self.remote_base.get().wrapping_add(offset))
    }
}

/// Address of the lookup routine as mapped into this process. Asking
/// the dynamic loader avoids the PLT stub this binary itself links
/// against.
pub fn local_lookup_symbol() -> Result<LocalAddr> {
    let library =
        unsafe { Library::new(LIBC_SONAME) }.map_err(|source| Error::SymbolResolution {
            symbol: LOOKUP_SYMBOL,
            source,
        })?;
    let symbol = unsafe { library.get::<u64>(LOOKUP_SYMBOL.as_bytes()) }.map_err(|source| {
        Error::SymbolResolution {
            symbol: LOOKUP_SYMBOL,
            source,
        }
    })?;
    Ok(LocalAddr::new(symbol.into_raw() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_applies_the_base_offset() {
        let placement = LibraryPlacement {
            local_base: LocalAddr::new(0x7f00_0000_0000),
            remote_base: RemoteAddr::new(0x7f80_0000_0000),
        };
        let sym = LocalAddr::new(0x7f00_0003_d0b0);
        assert_eq!(placement.resolve(sym).get(), 0x7f80_0003_d0b0);
    }

    #[test]
    fn resolve_handles_a_lower_remote_base() {
        let placement = LibraryPlacement {
            local_base: LocalAddr::new(0x7f80_0000_0000),
            remote_base: RemoteAddr::new(0x7f00_0000_0000),
        };
        let sym = LocalAddr::new(0x7f80_0001_0000);
        assert_eq!(placement.resolve(sym).get(), 0x7f00_0001_0000);
    }

    #[test]
    fn lookup_symbol_lies_inside_this_process_libc() {
        let base = maps::library_base(getpid(), maps::LIBC_NEEDLE).unwrap();
        let sym = local_lookup_symbol().unwrap();
        assert!(sym.get() >= base);
        // well within the mapped image
        assert!(sym.get() - base < 0x1000_0000);
    }
}
