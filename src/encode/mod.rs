//! Self-describing binary document encoder (spec.md §4.C, §6).
//!
//! Both document kinds are built by first rendering each record as its own
//! CBOR value, then assembling as many of those values as fit under a fixed
//! size budget. This produces the same end result as the original's
//! streaming "truncate by closing open containers" approach without
//! needing a fallible fixed-size writer: by the time an item is dropped for
//! space, the document built so far is already a complete, valid CBOR
//! value.

pub mod data;
pub mod meta;

pub use data::{BootSection, DataDocument};
pub use meta::MetaDocument;

use minicbor::Encoder;

type CborResult<T> = Result<T, minicbor::encode::Error<std::convert::Infallible>>;

pub(crate) fn encode_to_vec(f: impl FnOnce(&mut Encoder<Vec<u8>>) -> CborResult<()>) -> Vec<u8> {
    let mut enc = Encoder::new(Vec::new());
    match f(&mut enc) {
        Ok(()) => enc.into_writer(),
        Err(_) => Vec::new(),
    }
}

/// Number of leading `items` that fit within `budget` bytes, in order.
fn fit_within(items: &[Vec<u8>], budget: usize) -> usize {
    let mut used = 0;
    let mut count = 0;
    for item in items {
        if used + item.len() > budget {
            break;
        }
        used += item.len();
        count += 1;
    }
    count
}
