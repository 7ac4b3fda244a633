use super::AlignmentStrategy;
use crate::data::PointCloud;
use crate::error::AlignError;
use crate::pipeline::AlignmentParams;

/// Centers the scan on its centroid, then applies the configured preset.
#[derive(Debug, Clone)]
pub struct CenterOfMass {
    preset: AlignmentParams,
}

impl CenterOfMass {
    pub const ID: &'static str = "center";

    pub fn new(preset: AlignmentParams) -> Self {
        Self {
            preset: preset.with_center_of_mass(true),
        }
    }
}

impl Default for CenterOfMass {
    fn default() -> Self {
        Self::new(AlignmentParams::identity())
    }
}

impl AlignmentStrategy for CenterOfMass {
    fn id(&self) -> &str {
        Self::ID
    }

    fn compute_params(&self, _cloud: &PointCloud) -> Result<AlignmentParams, AlignError> {
        Ok(self.preset.clone())
    }

    fn default_params(&self) -> AlignmentParams {
        self.preset.clone()
    }
}

/// Same as [`CenterOfMass`] but keeps the scan at its native scale.
#[derive(Debug, Clone)]
pub struct ScaleFree {
    preset: AlignmentParams,
}

impl ScaleFree {
    pub const ID: &'static str = "scale-free";

    pub fn new(preset: AlignmentParams) -> Self {
        Self {
            preset: preset.with_center_of_mass(true).with_unit_scale(),
        }
    }
}

impl Default for ScaleFree {
    fn default() -> Self {
        Self::new(AlignmentParams::identity())
    }
}

impl AlignmentStrategy for ScaleFree {
    fn id(&self) -> &str {
        Self::ID
    }

    fn compute_params(&self, _cloud: &PointCloud) -> Result<AlignmentParams, AlignError> {
        Ok(self.preset.clone())
    }

    fn default_params(&self) -> AlignmentParams {
        self.preset.clone()
    }
}
