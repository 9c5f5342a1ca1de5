//! Fixtures shared by the unit and HTTP tests.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::inference::model::{Backend, InferenceError, NUM_CLASSES};
use crate::inference::preprocess::NormalizedTensor;

pub fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
    bytes
}

pub fn leaf_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 200) as u8, 120 + (y % 100) as u8, 30])
    });
    encode(DynamicImage::ImageRgb8(image), ImageFormat::Png)
}

/// A decodable PNG followed by zero padding up to `len` bytes.
pub fn padded_png(len: usize) -> Vec<u8> {
    let mut bytes = leaf_png(32, 32);
    assert!(bytes.len() <= len);
    bytes.resize(len, 0);
    bytes
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(0x1eaf);
    let mut bytes = vec![0u8; len];
    rng.fill(bytes.as_mut_slice());
    bytes
}

/// Deterministic backend that always answers with the same scores.
pub struct FixedBackend {
    pub output: Vec<f32>,
    pub calls: Arc<AtomicUsize>,
}

impl FixedBackend {
    pub fn new(output: Vec<f32>) -> Self {
        Self {
            output,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Backend for FixedBackend {
    fn forward(&self, _input: &NormalizedTensor) -> Result<Vec<f32>, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

/// Passes warm-up, then fails every call.
pub struct FailingBackend {
    calls: AtomicUsize,
}

impl FailingBackend {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

impl Backend for FailingBackend {
    fn forward(&self, _input: &NormalizedTensor) -> Result<Vec<f32>, InferenceError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(vec![0.1; NUM_CLASSES])
        } else {
            Err(InferenceError::Backend("device lost".into()))
        }
    }
}
