//! Encodings for the handful of x86_64 instructions the protocol
//! injects, and the layout of the trampoline blob.

use crate::addr::RemoteAddr;
use crate::error::{Error, Result};

/// Width of a ptrace word.
pub const WORD: usize = 8;

/// `syscall`
pub const SYSCALL: [u8; 2] = [0x0f, 0x05];
/// `jmp *%rax`
pub const JMP_RAX: [u8; 2] = [0xff, 0xe0];
/// `call rel32` opcode; the displacement follows in the next 4 bytes.
pub const CALL_REL32: u8 = 0xe8;
/// `int3`
pub const INT3: u8 = 0xcc;

/// Offset of the argument string inside the trampoline blob: it sits
/// right behind the 5-byte call and the breakpoint.
pub const NAME_OFFSET: usize = 6;

/// Signed 32-bit displacement from `source` (the first byte after the
/// call instruction) to `dest`. A delta that does not fit means the
/// two addresses are more than 2 GiB apart.
pub fn rel32(source: RemoteAddr, dest: RemoteAddr) -> Result<i32> {
    let delta = dest.get().wrapping_sub(source.get()) as i64;
    i32::try_from(delta).map_err(|_| Error::RangeOverflow { delta })
}

/// The two-instruction probe installed at the pivot: invoke a system
/// call, then jump to whatever the call left in `%rax`. Padded to a
/// full ptrace word with breakpoints.
pub fn syscall_jump_stub() -> [u8; WORD] {
    let mut stub = [INT3; WORD];
    stub[..2].copy_from_slice(&SYSCALL);
    stub[2..4].copy_from_slice(&JMP_RAX);
    stub
}

/// The code+data blob executed from the scratch page: a call to
/// `dest`, a breakpoint to hand control back to the tracer, then the
/// argument string with an explicit NUL terminator.
///
/// The blob is sized to the next power of two that is at least 32
/// bytes and holds the whole layout, which keeps it a multiple of the
/// ptrace word.
pub fn call_trampoline(scratch: RemoteAddr, dest: RemoteAddr, arg: &[u8]) -> Result<Vec<u8>> {
    let needed = NAME_OFFSET + arg.len() + 1;
    let mut size = 32;
    while size < needed {
        size <<= 1;
    }

    let mut blob = vec![0u8; size];
    blob[0] = CALL_REL32;
    let displacement = rel32(scratch.add(1 + 4), dest)?;
    blob[1..5].copy_from_slice(&displacement.to_le_bytes());
    blob[5] = INT3;
    blob[NAME_OFFSET..NAME_OFFSET + arg.len()].copy_from_slice(arg);
    // the byte after the argument stays zero: the C string terminator
    Ok(blob)
}
