use tract_onnx::prelude::*;

use crate::{Error, Frame, ModelConfig};

/// Output width of the embedding model (MobileNetV2 feature vector).
pub const EMBEDDING_DIM: usize = 1280;

#[derive(Clone, Debug, PartialEq)]
pub struct Embedding([f32; EMBEDDING_DIM]);

// derive(Default) doesnt work on arrays this large, grrrr
impl Default for Embedding {
    fn default() -> Self {
        Self([0f32; EMBEDDING_DIM])
    }
}

impl Embedding {
    pub fn iter(&self) -> core::slice::Iter<'_, f32> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Returns None unless exactly `EMBEDDING_DIM` values are given.
    pub fn from_slice(values: &[f32]) -> Option<Self> {
        if values.len() != EMBEDDING_DIM {
            return None;
        }
        let mut out = Self::default();
        out.0.copy_from_slice(values);
        Some(out)
    }
}

/// Turns a frame into a fixed-length feature vector.
pub trait Embedder: Send + Sync {
    fn infer(&self, frame: &Frame) -> Result<Embedding, Error>;
}

/// OnnxEmbedder runs an image embedding network over single frames.
pub struct OnnxEmbedder {
    model: TypedRunnableModel<TypedModel>,
    width: usize,
    height: usize,
}

impl OnnxEmbedder {
    pub fn load(config: &ModelConfig, width: usize, height: usize) -> Result<Self, Error> {
        let model = tract_onnx::onnx()
            // load the model
            .model_for_path(&config.path)
            .map_err(Error::Model)?
            .with_input_fact(0, f32::fact([1, 3, height, width]).into())
            .map_err(Error::Model)?
            .into_optimized()
            .map_err(Error::Model)?
            .into_runnable()
            .map_err(Error::Model)?;

        let out = Self {
            model,
            width,
            height,
        };

        // Warm up on a zero frame; this also checks the output width before
        // any examples are stored against it.
        let probe = Frame {
            seq: 0,
            width,
            height,
            pixels: vec![0u8; width * height * 3],
        };
        out.infer(&probe)?;

        Ok(out)
    }
}

impl Embedder for OnnxEmbedder {
    fn infer(&self, frame: &Frame) -> Result<Embedding, Error> {
        if frame.width != self.width || frame.height != self.height {
            return Err(Error::Model(anyhow::anyhow!(
                "frame is {}x{}, model expects {}x{}",
                frame.width,
                frame.height,
                self.width,
                self.height
            )));
        }

        // Pack the HWC bytes into a [1, 3, H, W] tensor, scaled to [-1, 1]
        // the way the network was trained.
        let (w, h) = (self.width, self.height);
        let input: Tensor =
            tract_ndarray::Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| {
                frame.pixels[(y * w + x) * 3 + c] as f32 / 127.5 - 1.0
            })
            .into();

        let out = self
            .model
            .run(tvec!(input.into()))
            .map_err(Error::Model)?
            .remove(0);
        let values = out.as_slice::<f32>().map_err(Error::Model)?;

        Embedding::from_slice(values).ok_or_else(|| {
            Error::Setup(format!(
                "model produced {} values per frame, expected {}",
                values.len(),
                EMBEDDING_DIM
            ))
        })
    }
}
