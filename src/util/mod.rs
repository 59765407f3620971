//! # Basic primitives and helpers

pub(crate) use self::symbol_mask::*;

mod symbol_mask;
