//! Concrete per-link-type backend implementations.
mod at;
mod at_radio;
mod datagram;
mod kernel_mesh;
mod serial;
mod stream;

pub use at_radio::{AtRadioBackend, RadioProfile};
pub use datagram::DatagramSocketBackend;
pub use kernel_mesh::KernelMeshBackend;
pub use serial::SerialBackend;
pub use stream::StreamSocketBackend;
