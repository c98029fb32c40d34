pub mod client;
pub mod cooldown;
pub mod pipeline;
pub mod provider;
pub mod sensitive;
pub mod upstream;

pub use pipeline::{relay_stream, StreamOutcome, StreamTarget, UsageSummary};
pub use provider::openai_compat::{ApiKeyCredential, OpenAICompatProvider, UpstreamTarget};
