use crate::result::*;

/// A checked cast from u64 to usize
///
/// Archive offsets and sizes are 64-bit stream positions,
/// but anything we pull into memory has to fit the address space.
pub fn usize<I: Into<u64>>(i: I) -> StreamResult<usize> {
    let i: u64 = i.into();
    usize::try_from(i).map_err(|_| StreamError::InsufficientAddressSpace)
}
