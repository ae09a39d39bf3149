//! NATS-backed [`zephyr_kernel::Transport`].

pub mod body;
pub mod transport;

pub use transport::NatsTransport;
