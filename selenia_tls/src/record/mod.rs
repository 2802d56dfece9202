//! The record layer: per-direction cipher state, message reassembly, and
//! the I/O engine that turns application/handshake bytes into encrypted
//! records and back (§4.2-§4.4).

pub mod cipher_state;
pub mod defragmenter;
pub mod io;
pub mod layer;

pub use cipher_state::{AeadRecipe, CipherState, MacMode};
pub use defragmenter::Defragmenter;
pub use layer::RecordLayer;
