//! The one native calling convention outbound calls use: up to
//! [`MAX_NATIVE_ARGS`] integer-class arguments, each widened to a 64-bit
//! word, and an integer-class return value.

use std::mem;

use anyhow::{Result, bail, ensure};

use super::Unsupported;

pub const MAX_NATIVE_ARGS: usize = 8;

type Word = u64;

/// Calls the C-ABI function at `address` with `args`.
///
/// # Safety
///
/// `address` must point to an `extern "C"` function whose parameters are all
/// integer-class (integers, booleans, pointers) and whose arity matches
/// `args.len()`. Pointers in `args` must stay valid for the whole call.
pub unsafe fn call_native(address: usize, args: &[Word]) -> Result<Word> {
    ensure!(address != 0, "native call through a null function pointer");
    // SAFETY: the caller guarantees the signature; every arm transmutes the
    // address to the matching arity.
    let result = unsafe {
        match *args {
            [] => mem::transmute::<usize, extern "C" fn() -> Word>(address)(),
            [a] => mem::transmute::<usize, extern "C" fn(Word) -> Word>(address)(a),
            [a, b] => mem::transmute::<usize, extern "C" fn(Word, Word) -> Word>(address)(a, b),
            [a, b, c] => mem::transmute::<usize, extern "C" fn(Word, Word, Word) -> Word>(address)(a, b, c),
            [a, b, c, d] => {
                mem::transmute::<usize, extern "C" fn(Word, Word, Word, Word) -> Word>(address)(a, b, c, d)
            }
            [a, b, c, d, e] => {
                mem::transmute::<usize, extern "C" fn(Word, Word, Word, Word, Word) -> Word>(address)(a, b, c, d, e)
            }
            [a, b, c, d, e, f] => mem::transmute::<usize, extern "C" fn(Word, Word, Word, Word, Word, Word) -> Word>(
                address,
            )(a, b, c, d, e, f),
            [a, b, c, d, e, f, g] => mem::transmute::<
                usize,
                extern "C" fn(Word, Word, Word, Word, Word, Word, Word) -> Word,
            >(address)(a, b, c, d, e, f, g),
            [a, b, c, d, e, f, g, h] => mem::transmute::<
                usize,
                extern "C" fn(Word, Word, Word, Word, Word, Word, Word, Word) -> Word,
            >(address)(a, b, c, d, e, f, g, h),
            _ => bail!(Unsupported(format!(
                "{} native arguments (at most {})",
                args.len(),
                MAX_NATIVE_ARGS
            ))),
        }
    };
    Ok(result)
}
