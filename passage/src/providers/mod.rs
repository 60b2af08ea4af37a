//! Identity providers shipped with the crate

#[cfg(feature = "in-memory")]
#[cfg_attr(docsrs, doc(cfg(feature = "in-memory")))]
pub mod in_memory;
