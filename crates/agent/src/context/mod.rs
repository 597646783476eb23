//! Token budgeting for model requests.
//!
//! | Stage | Module | Effect |
//! |-------|--------|--------|
//! | Estimate | [`token`] | Model-aware token counts, never fails |
//! | Compress | [`compressor`] | Omits old messages to fit the budget |
//! | Cache | [`cache`] | Marks the stable prefix for prompt caching |

pub mod cache;
pub mod compressor;
pub mod token;

pub use cache::{CacheAllocator, CacheProfile};
pub use compressor::{Compression, ContextCompressor};
pub use token::{ModelFamily, TokenEstimator};
