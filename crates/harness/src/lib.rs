pub mod client;
pub mod remote;

pub use client::{TestClient, synced_task};
pub use remote::InMemoryRemote;
