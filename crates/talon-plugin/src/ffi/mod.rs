//! C-linkage boundary between the host and extension libraries.

pub mod abi;
pub mod safety;
