//! Argument-marshalling arithmetic
//!
//! Sizing rules for the argv/envp image `exec` pushes onto a fresh user
//! stack: every string occupies a 16-byte-aligned slot, and each pointer
//! array is null-terminated and padded with one zero long when its length
//! is odd, so the stack pointer never loses its 16-byte alignment.

/// Stack bytes occupied by one pushed string (NUL included, slot rounded
/// up to 16).
pub fn string_slot(len: usize) -> usize {
    (len + 1 + 15) & !15
}

/// Stack bytes occupied by a null-terminated pointer array of `count`
/// entries, including the parity pad.
pub fn pointer_block(count: usize) -> usize {
    let longs = count + 1 + (count + 1) % 2;
    longs * 8
}

/// Total bytes [`crate::arch::aarch64::Context::store_program_args`] will
/// consume below the stack pointer. `exec` checks this against the user
/// stack size before marshalling.
pub fn image_size(argv: &[&[u8]], envp: &[&[u8]]) -> usize {
    let strings: usize = argv
        .iter()
        .chain(envp.iter())
        .map(|s| string_slot(s.len()))
        .sum();
    strings + pointer_block(argv.len()) + pointer_block(envp.len())
}
