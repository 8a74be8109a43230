//! Wipe-safe handling of sensitive buffers.
//!
//! Every buffer that ever holds a passphrase, a key-encryption-key or the
//! cached key passes through here (or through [`Zeroizing`], which calls the
//! same code on drop).
//!
//! The conversions below size their output up front so that the output
//! vector never reallocates: a reallocation would leave an unwiped copy of
//! the plaintext behind in freed memory.

use zeroize::Zeroize;
use zeroize::Zeroizing;

use crate::error::CacheError;
use crate::error::Result;

/// Overwrite every element of `buf` with its zero value, in place.
///
/// Works for byte slices, char slices (zeroed to `'\0'`), fixed arrays and
/// anything else implementing [`Zeroize`].
#[inline]
pub fn wipe<Z: Zeroize + ?Sized>(buf: &mut Z) {
    buf.zeroize();
}

/// Record that a sensitive buffer named `label` now holds plaintext.
///
/// Pairs with [`wipe_tracked`]. Only test builds keep the tally, in the
/// `audit` module.
#[inline]
pub(crate) fn track_created(label: &'static str) {
    #[cfg(test)]
    audit::created(label);
    #[cfg(not(test))]
    let _ = label;
}

/// [`wipe`] a buffer announced with [`track_created`].
#[inline]
pub(crate) fn wipe_tracked(label: &'static str, buf: &mut [u8]) {
    wipe(buf);
    #[cfg(test)]
    audit::wiped(label, buf);
    #[cfg(not(test))]
    let _ = label;
}

/// Encode `chars` as UTF-8.
///
/// The per-character scratch buffer is wiped before returning. The caller
/// owns the input and must wipe it; the returned buffer wipes itself on drop.
pub fn chars_to_utf8_bytes(chars: &[char]) -> Zeroizing<Vec<u8>> {
    let len = chars.iter().map(|c| c.len_utf8()).sum();
    let mut out = Zeroizing::new(Vec::with_capacity(len));
    let mut scratch = [0u8; 4];
    track_created("utf8 scratch");

    for c in chars {
        out.extend_from_slice(c.encode_utf8(&mut scratch[..]).as_bytes());
    }

    wipe_tracked("utf8 scratch", &mut scratch);
    out
}

/// Decode UTF-8 `bytes` into chars.
///
/// Decoding borrows the input in place, so no intermediate copy of the
/// plaintext is made. Invalid UTF-8 yields [`CacheError::InvalidUtf8`]
/// without echoing any part of the input.
pub fn utf8_bytes_to_chars(bytes: &[u8]) -> Result<Zeroizing<Vec<char>>> {
    let text = std::str::from_utf8(bytes).map_err(|_| CacheError::InvalidUtf8)?;

    let mut out = Zeroizing::new(Vec::with_capacity(text.chars().count()));
    out.extend(text.chars());

    Ok(out)
}
