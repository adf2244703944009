//! Intent-driven router over a pool of local quantized language models.
//!
//! A transcript comes in, gets classified into one of five intents, and is
//! dispatched to the matching model. Models load lazily on first use (or
//! eagerly at startup), run token-by-token generation with configurable
//! sampling, and are evicted by a background worker once they idle past
//! their TTL.

pub mod backend;
pub mod config;
pub mod error;
pub mod intent;
pub mod protocol;
pub mod router;
pub mod sampler;
pub mod session;
pub mod tokenizer;

pub use backend::{BackendLoader, GgufLoader, InferenceBackend};
pub use config::{Catalog, ModelConfig};
pub use error::RouterError;
pub use intent::{detect_intent, Intent};
pub use protocol::{ActionDescriptor, ActionExecutor, NoopExecutor, Response, Transcriber};
pub use router::memory::MemoryManager;
pub use router::{Router, RouterStats};
pub use sampler::SamplingParams;
pub use session::{CancelToken, ModelSession};
pub use tokenizer::Tokenizer;
