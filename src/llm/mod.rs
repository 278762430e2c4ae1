//! Model worker integration: contract, HTTP client and model selection.

pub mod http_worker;
pub mod model_spec;
pub mod worker;

pub use http_worker::HttpModelWorker;
pub use model_spec::{ModelSource, ModelSpec, ModelVersion, Quantization};
pub use worker::{
    ChunkDecoder, DecodeStream, DecodeUpdate, GenerateRequest, MAX_NEW_TOKENS_CAP, ModelWorker,
    WorkerError, WorkerFuture, WorkerResult, WorkerStatus,
};
