/// Per-request context threaded through upstream calls.
#[derive(Debug, Clone)]
pub struct UpstreamContext {
    pub trace_id: String,
    pub proxy: Option<String>,
}

impl UpstreamContext {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            proxy: None,
        }
    }
}
