use serde::Serialize;
use serde_json::Value;

/// Read-only service metadata gathered before a run.
///
/// A field is `None` when the corresponding query failed; discovery never
/// aborts a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Capabilities {
    pub available_models: Option<Value>,
    pub supported_formats: Option<Value>,
    pub pack_methods: Option<Value>,
}

impl Capabilities {
    pub fn is_complete(&self) -> bool {
        self.available_models.is_some()
            && self.supported_formats.is_some()
            && self.pack_methods.is_some()
    }
}
