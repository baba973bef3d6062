//! Pretrained classifiers and their label tables.
//!
//! The set of architectures is closed ([`ModelId`]); which of them a
//! deployment serves is decided by the allow-list handed to
//! [`ModelRegistry`].

pub mod classification;

pub use classification::*;
