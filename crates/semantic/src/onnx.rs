use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::ImageReader;
use once_cell::sync::OnceCell;
use onnxruntime::environment::Environment;
use onnxruntime::ndarray::Array;
use onnxruntime::session::Session;
use onnxruntime::GraphOptimizationLevel;
use tracing::info;

use crate::normalize::l2_normalize_in_place;
use crate::{EmbeddingModel, SemanticError};

static ORT_ENV: OnceCell<Environment> = OnceCell::new();

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Local ONNX image encoder (ResNet-style: one NCHW float input, first output is the feature).
///
/// The session is not shareable across threads; build it on the thread that will call
/// [`EmbeddingModel::embed`].
pub struct OnnxImageModel {
    name: String,
    session: Session<'static>,
    input_size: u32,
    normalize: bool,
    dimension: usize,
}

impl OnnxImageModel {
    pub fn load(
        name: &str,
        model_path: &Path,
        input_size: u32,
        normalize: bool,
    ) -> Result<Self, SemanticError> {
        let env = ort_environment()?;
        let session = env
            .new_session_builder()
            .map_err(|e| SemanticError::Inference(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Basic)
            .map_err(|e| SemanticError::Inference(e.to_string()))?
            .with_model_from_file(PathBuf::from(model_path))
            .map_err(|e| SemanticError::Inference(e.to_string()))?;

        if session.inputs.len() != 1 {
            return Err(SemanticError::InvalidConfig(format!(
                "image encoder must declare exactly one input, found {}",
                session.inputs.len()
            )));
        }

        // batch axis excluded; any dynamic axis makes the width unknown
        let dimension = session
            .outputs
            .first()
            .and_then(|out| {
                out.dimensions
                    .iter()
                    .skip(1)
                    .try_fold(1usize, |acc, dim| dim.map(|d| acc * d as usize))
            })
            .unwrap_or(0);

        info!(model = name, path = %model_path.display(), dimension, "onnx session ready");
        Ok(Self {
            name: name.to_string(),
            session,
            input_size,
            normalize,
            dimension,
        })
    }
}

impl EmbeddingModel for OnnxImageModel {
    fn name(&self) -> &str {
        &self.name
    }

    /// Output width declared by the model graph, `0` when it is dynamic.
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&mut self, path: &Path) -> Result<Vec<f32>, SemanticError> {
        let side = self.input_size;
        let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        let rgb = img.resize_exact(side, side, FilterType::Triangle).to_rgb8();

        let plane = (side * side) as usize;
        let mut data = vec![0f32; 3 * plane];
        for (i, pixel) in rgb.pixels().enumerate() {
            for c in 0..3 {
                let value = pixel.0[c] as f32 / 255.0;
                data[c * plane + i] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            }
        }

        let input = Array::from_shape_vec((1, 3, side as usize, side as usize), data)
            .map_err(|e| SemanticError::Inference(e.to_string()))?;
        let outputs = self
            .session
            .run::<f32, f32, _>(vec![input])
            .map_err(|e| SemanticError::Inference(e.to_string()))?;
        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| SemanticError::Inference("model returned no outputs".into()))?;

        let mut vector: Vec<f32> = output.iter().copied().collect();
        if vector.is_empty() {
            return Err(SemanticError::Inference("model returned an empty tensor".into()));
        }
        if self.normalize {
            l2_normalize_in_place(&mut vector);
        }
        Ok(vector)
    }
}

fn ort_environment() -> Result<&'static Environment, SemanticError> {
    ORT_ENV.get_or_try_init(|| {
        Environment::builder()
            .with_name("imgembed")
            .build()
            .map_err(|e| SemanticError::Inference(e.to_string()))
    })
}
