//! The context budget & continuation engine.
//!
//! One user turn may need several model calls: the model asks for tools,
//! or its output is cut off by `max_tokens`. The [`ContinuationController`]
//! drives those calls as a single logical assistant turn:
//!
//! 1. **Fetch** history from the message store
//! 2. **Fit** history and tool schemas into the model's token budget
//! 3. **Mark** cache-stable prefixes
//! 4. **Call** the model and stream its output to the caller
//! 5. **Continue** on tool calls or truncation, within hard limits

pub mod context;
pub mod controller;
pub mod run_state;
pub mod stream_event;

pub use context::{
    CacheAllocator, CacheProfile, Compression, ContextCompressor, ModelFamily, TokenEstimator,
};
pub use controller::{ContinuationController, RunHandle, RunOptions};
pub use run_state::{RunPhase, RunState};
pub use stream_event::{OutputEvent, RunOutcome, StatusKind};
