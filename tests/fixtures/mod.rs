//! Canned server payloads and local files for workflow tests

use serde_json::{json, Value};
use std::path::PathBuf;

/// Bundled cube mesh shipped with the crate.
pub fn sample_mesh() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets/example_uv/sample.obj")
}

/// Result payload shaped like the unwrapping service's completed jobs.
pub fn completed_result() -> Value {
    json!({
        "output_mesh_path": "/srv/outputs/uv_sample.obj",
        "packed_mesh_path": "/srv/outputs/uv_sample_packed.obj",
        "num_components": 6,
        "distortion": 1.0213,
        "uv_info": {
            "success": true,
            "distortion_threshold": 1.25,
            "pack_method": "blender"
        }
    })
}

/// Status sequence queued → processing → completed.
pub fn progressing_statuses() -> Vec<Value> {
    vec![
        json!({"status": "queued", "progress": 0}),
        json!({"status": "processing", "progress": 55}),
        json!({"status": "completed", "progress": 100, "result": completed_result()}),
    ]
}

/// Binary artifact covering every byte value.
pub fn artifact_bytes(len: usize) -> Vec<u8> {
    (0..=255u8).cycle().take(len).collect()
}
