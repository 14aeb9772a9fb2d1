//! A crate to hold types and functions common to all lunapr components.

pub mod cformat;
pub mod float_ops;
pub mod lock;
pub mod str;
