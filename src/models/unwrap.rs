use garde::Validate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use strum::{Display, EnumString, VariantNames};

use crate::error::WorkflowError;

pub const DEFAULT_DISTORTION_THRESHOLD: f64 = 1.25;
pub const DEFAULT_MODEL_PREFERENCE: &str = "partuv";

/// Strategy the server uses to arrange UV islands in texture space.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, VariantNames,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PackMethod {
    Blender,
    None,
    Uvpackmaster,
}

impl PackMethod {
    /// Parse a user-supplied method name, rejecting anything outside the known set.
    pub fn parse(raw: &str) -> Result<Self, WorkflowError> {
        PackMethod::from_str(raw).map_err(|_| {
            WorkflowError::Input(format!(
                "invalid pack method '{raw}', expected one of: {}",
                PackMethod::VARIANTS.join(", ")
            ))
        })
    }
}

/// Mesh container formats accepted as input and produced as output.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, VariantNames,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MeshFormat {
    Obj,
    Glb,
}

impl MeshFormat {
    pub fn parse(raw: &str) -> Result<Self, WorkflowError> {
        MeshFormat::from_str(raw).map_err(|_| {
            WorkflowError::Input(format!(
                "unsupported mesh format '{raw}', expected one of: {}",
                MeshFormat::VARIANTS.join(", ")
            ))
        })
    }

    /// Infer the format of a local mesh from its extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self, WorkflowError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        Self::parse(&ext)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            MeshFormat::Obj => "obj",
            MeshFormat::Glb => "glb",
        }
    }
}

/// Parameters of one unwrap job.
#[derive(Debug, Clone, PartialEq, Validate)]
pub struct UnwrapOptions {
    #[garde(custom(positive_finite))]
    pub distortion_threshold: f64,

    #[garde(skip)]
    pub pack_method: PackMethod,

    #[garde(skip)]
    pub output_format: MeshFormat,

    #[garde(skip)]
    pub save_individual_parts: bool,

    #[garde(skip)]
    pub save_visuals: bool,

    #[garde(length(min = 1, max = 200))]
    pub model_preference: String,
}

fn positive_finite(value: &f64, _ctx: &()) -> garde::Result {
    if value.is_finite() && *value > 0.0 {
        Ok(())
    } else {
        Err(garde::Error::new("must be a finite number greater than zero"))
    }
}

impl UnwrapOptions {
    pub fn new(pack_method: PackMethod) -> Self {
        Self {
            distortion_threshold: DEFAULT_DISTORTION_THRESHOLD,
            pack_method,
            output_format: MeshFormat::Obj,
            save_individual_parts: false,
            save_visuals: false,
            model_preference: DEFAULT_MODEL_PREFERENCE.to_string(),
        }
    }

    /// Run field validation and map failures to an input error.
    pub fn check(&self) -> Result<(), WorkflowError> {
        self.validate()
            .map_err(|report| WorkflowError::Input(format!("invalid job options: {report}")))
    }

    /// Wire body for `POST /mesh-uv-unwrapping/unwrap-mesh`.
    pub fn to_request<'a>(&'a self, mesh_file_id: &'a str) -> SubmitRequest<'a> {
        SubmitRequest {
            mesh_file_id,
            distortion_threshold: self.distortion_threshold,
            pack_method: self.pack_method,
            save_individual_parts: self.save_individual_parts,
            save_visuals: self.save_visuals,
            output_format: self.output_format,
            model_preference: &self.model_preference,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitRequest<'a> {
    pub mesh_file_id: &'a str,
    pub distortion_threshold: f64,
    pub pack_method: PackMethod,
    pub save_individual_parts: bool,
    pub save_visuals: bool,
    pub output_format: MeshFormat,
    pub model_preference: &'a str,
}

/// A mesh accepted by `POST /file-upload/mesh`.
///
/// Not `Clone`: submitting a job consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct UploadedFile {
    pub file_id: String,
    pub file_name: String,
    pub size: u64,
}
