use std::{collections::HashMap, path::PathBuf};

use anyhow::Context as _;
use ash::vk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RayTracingStage {
    Generate,
    Hit,
    Miss,
    ShadowMiss,
}

impl RayTracingStage {
    /// Load order. Shader groups and shader binding table entries follow it.
    pub const ALL: [RayTracingStage; 4] = [
        RayTracingStage::Generate,
        RayTracingStage::Hit,
        RayTracingStage::Miss,
        RayTracingStage::ShadowMiss,
    ];

    pub fn shader_stage_flags(self) -> vk::ShaderStageFlags {
        match self {
            RayTracingStage::Generate => vk::ShaderStageFlags::RAYGEN_KHR,
            RayTracingStage::Hit => vk::ShaderStageFlags::CLOSEST_HIT_KHR,
            RayTracingStage::Miss | RayTracingStage::ShadowMiss => vk::ShaderStageFlags::MISS_KHR,
        }
    }

    pub fn is_optional(self) -> bool {
        self == RayTracingStage::ShadowMiss
    }

    pub fn file_name(self) -> &'static str {
        match self {
            RayTracingStage::Generate => "raygen.rgen.spv",
            RayTracingStage::Hit => "closesthit.rchit.spv",
            RayTracingStage::Miss => "miss.rmiss.spv",
            RayTracingStage::ShadowMiss => "shadow.rmiss.spv",
        }
    }
}

/// Hands out compiled SPIR-V per stage. `None` means the stage does not exist.
pub trait ShaderSource {
    fn load(&self, stage: RayTracingStage) -> anyhow::Result<Option<Vec<u8>>>;
}

/// Reads `*.spv` files from a directory
pub struct SpirvDirectory {
    path: PathBuf,
}

impl SpirvDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ShaderSource for SpirvDirectory {
    fn load(&self, stage: RayTracingStage) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.path.join(stage.file_name());
        if !path.exists() {
            return Ok(None);
        }
        let bytes =
            std::fs::read(&path).with_context(|| format!("Could not read shader {:?}", path))?;
        Ok(Some(bytes))
    }
}

impl ShaderSource for HashMap<RayTracingStage, Vec<u8>> {
    fn load(&self, stage: RayTracingStage) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.get(&stage).cloned())
    }
}

/// Every stage the source provides, in load order. Fails when a required stage is missing.
pub fn load_stages(
    source: &dyn ShaderSource,
) -> anyhow::Result<Vec<(RayTracingStage, Vec<u8>)>> {
    let mut stages = Vec::new();
    for stage in RayTracingStage::ALL {
        match source.load(stage)? {
            Some(bytes) => stages.push((stage, bytes)),
            None if stage.is_optional() => log::info!("No {:?} shader, skipping it", stage),
            None => anyhow::bail!("Missing required {:?} shader", stage),
        }
    }
    Ok(stages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage_names(stages: &[(RayTracingStage, Vec<u8>)]) -> Vec<RayTracingStage> {
        stages.iter().map(|(stage, _)| *stage).collect()
    }

    #[test]
    fn shadow_miss_is_optional() {
        let source: HashMap<_, _> = [
            (RayTracingStage::Miss, vec![3]),
            (RayTracingStage::Generate, vec![1]),
            (RayTracingStage::Hit, vec![2]),
        ]
        .into_iter()
        .collect();

        let stages = load_stages(&source).unwrap();
        assert_eq!(
            stage_names(&stages),
            vec![
                RayTracingStage::Generate,
                RayTracingStage::Hit,
                RayTracingStage::Miss
            ]
        );
        assert_eq!(stages[2].1, vec![3]);
    }

    #[test]
    fn missing_hit_shader_is_an_error() {
        let source: HashMap<_, _> = [(RayTracingStage::Generate, vec![1])].into_iter().collect();
        assert!(load_stages(&source).is_err());
    }

    #[test]
    fn directory_source_reads_spv_files() {
        let dir = tempfile::tempdir().unwrap();
        for stage in RayTracingStage::ALL {
            std::fs::write(dir.path().join(stage.file_name()), [0x03, 0x02, 0x23, 0x07]).unwrap();
        }
        std::fs::remove_file(dir.path().join("shadow.rmiss.spv")).unwrap();

        let source = SpirvDirectory::new(dir.path());
        let stages = load_stages(&source).unwrap();
        assert_eq!(stages.len(), 3);
        assert_eq!(
            source.load(RayTracingStage::Miss).unwrap(),
            Some(vec![0x03, 0x02, 0x23, 0x07])
        );
        assert_eq!(source.load(RayTracingStage::ShadowMiss).unwrap(), None);
    }
}
