//! # cascade-swarm
//!
//! The swarm engine: everything between the RLNC codec and the sockets.
//!
//! Peers advertise a file as a sequence of 128 MiB generations, each with
//! its own SHA-1 identifier, and exchange random linear combinations of a
//! generation's pieces over a small TCP protocol. A generation flows
//! through three roles as it is acquired: *encoder* while the local copy
//! is plaintext, *decoder plus recoder* while pieces are still being
//! collected, and back to *encoder* once the slab is persisted.
//!
//! ## Crate structure
//!
//! - [`wire`] — 45-byte handshake and typed frames, bit-exact
//! - [`peer`] — a remote endpoint and its liveness flags
//! - [`generation`] — per-block role state machine and persistence
//! - [`file`] — the ordered generation list of one shared file
//! - [`directory`] — process-wide registry of files, generations, peers
//! - [`server`] — TCP accept loop with supervised panic reporting
//! - [`client`] — outbound requests and the ambient maintenance sweeps

pub mod client;
pub mod directory;
pub mod file;
pub mod generation;
pub mod peer;
pub mod server;
pub mod wire;

pub use directory::Directory;
pub use file::SharedFile;
pub use generation::{Generation, GenerationInfo};
pub use peer::Peer;
pub use server::Server;
