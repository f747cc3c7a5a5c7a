//! PE32+ format layer: on-disk parsing and the staging byte cursor.
//!
//! [`parser`] validates and indexes a raw image; [`cursor`] is the bounded
//! writer the loader uses to copy headers and sections into the mapped
//! region.  All multi-byte values are little-endian, matching both the PE
//! format and the x86-64 target, so no conversion is ever performed.

pub mod cursor;
pub mod parser;

pub use cursor::ByteCursor;
pub use parser::{
    DataDirectory, DosHeader, CoffHeader, OptionalHeader, PeError, PeImage, SectionHeader,
};
