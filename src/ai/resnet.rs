//! Candle-backed predictor wrapping the two fine-tuned checkpoints. The
//! network is a stock ResNet backbone with a task head: one output for
//! stage regression, one output per anatomical location class. Weights and
//! the class list ship as opaque artifacts in the models directory.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::{Func, Module, VarBuilder};
use candle_transformers::models::resnet;
use serde::Deserialize;

use crate::ai::predictor::{EmbryoPredictor, QueryFeatures};
use crate::error::{Result, SearchError};

/// Canonical input frame the models were trained on: 400 (h) x 300 (w),
/// plain resize, no crop or flip. Both predictors depend on this exact
/// normalization.
pub const CANONICAL_HEIGHT: usize = 400;
pub const CANONICAL_WIDTH: usize = 300;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// `config.json` next to the checkpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Backbone key, e.g. "resnet34".
    pub backbone: String,
    /// Anatomical location class names, in model output order.
    pub location_classes: Vec<String>,
}

pub struct ResnetPredictor {
    stage_model: Func<'static>,
    locations_model: Func<'static>,
    device: Device,
    location_classes: Vec<String>,
}

impl std::fmt::Debug for ResnetPredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResnetPredictor")
            .field("device", &self.device)
            .field("location_classes", &self.location_classes)
            .finish_non_exhaustive()
    }
}

impl ResnetPredictor {
    /// Load `stage.safetensors`, `locations.safetensors` and `config.json`
    /// from the models directory. Missing or malformed artifacts are fatal.
    pub fn load(models_dir: &Path) -> Result<Self> {
        let config_path = models_dir.join("config.json");
        let stage_path = models_dir.join("stage.safetensors");
        let locations_path = models_dir.join("locations.safetensors");
        for path in [&config_path, &stage_path, &locations_path] {
            if !path.exists() {
                return Err(SearchError::ModelArtifacts(format!(
                    "missing {}",
                    path.display()
                )));
            }
        }
        let config: ModelConfig = serde_json::from_slice(&std::fs::read(&config_path)?)
            .map_err(|e| SearchError::ModelArtifacts(format!("bad config.json: {e}")))?;
        if config.location_classes.is_empty() {
            return Err(SearchError::ModelArtifacts(
                "config.json lists no location classes".into(),
            ));
        }

        let device = Device::new_cuda(0).unwrap_or(Device::Cpu);
        let stage_model = build_backbone(&config.backbone, 1, &stage_path, &device)?;
        let locations_model = build_backbone(
            &config.backbone,
            config.location_classes.len(),
            &locations_path,
            &device,
        )?;
        log::info!(
            "[model] loaded {} predictors from {} ({} location classes, device: {:?})",
            config.backbone,
            models_dir.display(),
            config.location_classes.len(),
            device
        );
        Ok(Self {
            stage_model,
            locations_model,
            device,
            location_classes: config.location_classes,
        })
    }

    pub fn location_classes(&self) -> &[String] {
        &self.location_classes
    }

    fn image_tensor(&self, image_bytes: &[u8]) -> Result<Tensor> {
        let tensor = canonical_image_tensor(image_bytes)?;
        Ok(tensor.to_device(&self.device)?.unsqueeze(0)?)
    }
}

fn build_backbone(
    backbone: &str,
    nclasses: usize,
    weights: &PathBuf,
    device: &Device,
) -> Result<Func<'static>> {
    // Weights mmap, as for any other candle checkpoint.
    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(std::slice::from_ref(weights), DType::F32, device)?
    };
    let model = match backbone {
        "resnet18" => resnet::resnet18(nclasses, vb)?,
        "resnet34" => resnet::resnet34(nclasses, vb)?,
        "resnet50" => resnet::resnet50(nclasses, vb)?,
        other => {
            return Err(SearchError::ModelArtifacts(format!(
                "unsupported backbone '{other}'"
            )))
        }
    };
    Ok(model)
}

/// Decode image bytes and produce the canonical (3, 400, 300) float tensor:
/// RGB, scaled to [0, 1], ImageNet mean/std normalized.
pub fn canonical_image_tensor(image_bytes: &[u8]) -> Result<Tensor> {
    let img = image::load_from_memory(image_bytes)
        .map_err(|e| SearchError::InvalidImage(e.to_string()))?;
    let img = img.resize_exact(
        CANONICAL_WIDTH as u32,
        CANONICAL_HEIGHT as u32,
        image::imageops::FilterType::Triangle,
    );
    let raw = img.to_rgb8().into_raw();
    let tensor = Tensor::from_vec(
        raw,
        (CANONICAL_HEIGHT, CANONICAL_WIDTH, 3),
        &Device::Cpu,
    )?
    .permute((2, 0, 1))?
    .to_dtype(DType::F32)?
    .affine(1.0 / 255.0, 0.0)?;
    let mean = Tensor::new(&IMAGENET_MEAN, &Device::Cpu)?.reshape((3, 1, 1))?;
    let std = Tensor::new(&IMAGENET_STD, &Device::Cpu)?.reshape((3, 1, 1))?;
    Ok(tensor.broadcast_sub(&mean)?.broadcast_div(&std)?)
}

impl EmbryoPredictor for ResnetPredictor {
    fn num_locations(&self) -> usize {
        self.location_classes.len()
    }

    fn predict(&self, image_bytes: &[u8]) -> Result<QueryFeatures> {
        let input = self.image_tensor(image_bytes)?;
        let stage = self
            .stage_model
            .forward(&input)?
            .flatten_all()?
            .to_vec1::<f32>()?[0];
        // Multi-label head: independent per-class probabilities, so
        // sigmoid rather than softmax.
        let locations = candle_nn::ops::sigmoid(&self.locations_model.forward(&input)?)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        Ok(QueryFeatures { stage, locations })
    }
}
