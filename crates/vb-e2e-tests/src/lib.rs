//! End-to-end scenarios across the vcan bridge crates.
//!
//! Everything lives under `tests/`; this library is empty.
