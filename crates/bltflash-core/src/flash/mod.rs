//! Flash programming engine
//!
//! [`FlashEngine`] is the facade the bootloader's update protocol talks to.
//! It buffers incoming data into [`WriteBlock`]s, keeps the boot block back
//! until [`FlashEngine::finalize`], and stamps the application checksum.

mod block;
pub mod checksum;
mod engine;

pub use block::{BlockRole, WriteBlock};
pub use engine::{verify_application, EngineState, FlashEngine, DEFAULT_BLOCK_SIZE};
