use std::sync::Arc;
use tracing::info;

use super::{Anatomical, AlignmentStrategy, CenterOfMass, ReferenceMesh, ReferenceMeshBased, ScaleFree};
use crate::config::Config;
use crate::error::AlignError;
use crate::pipeline::AlignmentParams;

/// Candidate alias expanding to anatomical alignment with reference
/// registration as the fallback.
pub const HYBRID: &str = "hybrid";
pub const HYBRID_ORDER: [&str; 2] = [Anatomical::ID, ReferenceMeshBased::ID];

/// Every strategy id the crate knows how to build.
pub const KNOWN_STRATEGIES: [&str; 4] = [
    CenterOfMass::ID,
    Anatomical::ID,
    ScaleFree::ID,
    ReferenceMeshBased::ID,
];

/// Named strategies in registration order.
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn AlignmentStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every strategy the configuration allows. `reference` is
    /// only available when a reference mesh is configured.
    pub fn from_config(config: &Config) -> Result<Self, AlignError> {
        let preset = AlignmentParams::try_from(config.pre_align.clone())?;
        let mut registry = Self::new();

        registry.register(Arc::new(CenterOfMass::new(preset.clone())))?;
        registry.register(Arc::new(Anatomical::new(
            preset.clone(),
            config.anatomical.target_face_height,
        )))?;
        registry.register(Arc::new(ScaleFree::new(preset.clone())))?;

        if let Some(mesh_path) = &config.reference.mesh_path {
            let mesh = ReferenceMesh::load(mesh_path)?;
            info!(
                path = %mesh_path.display(),
                vertices = mesh.vertex_count(),
                "Loaded reference mesh"
            );
            registry.register(Arc::new(ReferenceMeshBased::new(
                mesh,
                preset,
                config.reference.preserve_scale,
            )))?;
        }

        Ok(registry)
    }

    pub fn register(&mut self, strategy: Arc<dyn AlignmentStrategy>) -> Result<(), AlignError> {
        if self.get(strategy.id()).is_some() {
            return Err(AlignError::config(format!(
                "strategy '{}' is already registered",
                strategy.id()
            )));
        }
        self.strategies.push(strategy);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn AlignmentStrategy>> {
        self.strategies.iter().find(|s| s.id() == id).cloned()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.id()).collect()
    }

    /// Turns candidate names into strategies, expanding `hybrid` and
    /// dropping repeats. Every unknown or unavailable name is reported.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Arc<dyn AlignmentStrategy>>, AlignError> {
        let mut resolved: Vec<Arc<dyn AlignmentStrategy>> = Vec::new();
        let mut problems = Vec::new();

        let expanded = names.iter().flat_map(|name| {
            let name = name.as_ref().trim();
            if name == HYBRID {
                HYBRID_ORDER.iter().map(|s| s.to_string()).collect::<Vec<_>>()
            } else {
                vec![name.to_string()]
            }
        });

        for name in expanded {
            if resolved.iter().any(|s| s.id() == name) {
                continue;
            }
            match self.get(&name) {
                Some(strategy) => resolved.push(strategy),
                None if name == ReferenceMeshBased::ID => problems.push(
                    "strategy 'reference' needs a reference mesh (reference.mesh_path)".to_string(),
                ),
                None if KNOWN_STRATEGIES.contains(&name.as_str()) => {
                    problems.push(format!("strategy '{}' is not registered", name))
                }
                None => problems.push(format!(
                    "unknown strategy '{}' (expected one of: {}, {})",
                    name,
                    KNOWN_STRATEGIES.join(", "),
                    HYBRID
                )),
            }
        }

        if resolved.is_empty() && problems.is_empty() {
            problems.push("no candidate strategies given".to_string());
        }
        if !problems.is_empty() {
            return Err(AlignError::Config(problems));
        }
        Ok(resolved)
    }
}
