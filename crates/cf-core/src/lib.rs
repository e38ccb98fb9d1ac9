//! Clawfarm core library.
//!
//! Wires the leaf crates into the instance orchestrator:
//! - Per-instance locking and persisted view state
//! - Instance metadata records
//! - The image catalog feeding the blob store
//! - Cloud-init payload synthesis
//! - OpenClaw credential preflight
//! - The VM backend boundary (QEMU in production, a fake in tests)
//! - The end-to-end `run`/`remove`/`ps`/`export`/`checkpoint`/`restore`
//!   flows
//!
//! The binary entry point is in `main.rs`.

pub mod backend;
pub mod catalog;
pub mod cloudinit;
pub mod instance;
pub mod logging;
pub mod orchestrator;
pub mod preflight;
