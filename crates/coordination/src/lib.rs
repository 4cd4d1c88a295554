pub mod client;
pub mod error;
pub mod etcd_impl;
pub mod memory;
pub mod signal;
pub mod store;
pub mod util;

pub use client::CoordinationClient;
pub use etcd_impl::{EtcdCoordinationClient, EtcdCoordinationClientConfig};
pub use memory::InMemoryCoordinationClient;
pub use signal::ChangeSignal;
