//! In-process [`zephyr_kernel::Transport`] for tests and single-binary demos.

pub mod transport;

pub use transport::MemoryTransport;
