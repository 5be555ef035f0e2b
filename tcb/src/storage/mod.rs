//! Bookkeeping structures used by the provided buffers.
mod assembler;

pub use self::assembler::{Assembler, AssemblerIter, Contig, TooManyHoles};
