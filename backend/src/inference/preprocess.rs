//! Image normalization for the leaf classifier.
//!
//! Uploaded bytes are decoded, forced to RGB, stretched to the model's
//! 128×128 input and scaled to `[0, 1]`. The output keeps the NHWC layout
//! the network was trained on, with a leading batch dimension of one.

use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::Array4;

/// Edge length of the square model input.
pub const INPUT_SIZE: u32 = 128;
pub const INPUT_CHANNELS: usize = 3;
pub const INPUT_SHAPE: [usize; 4] = [1, INPUT_SIZE as usize, INPUT_SIZE as usize, INPUT_CHANNELS];

const RESIZE_FILTER: FilterType = FilterType::Triangle;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("image payload is empty")]
    Empty,
    #[error("image decoding failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("pixel buffer does not fit the input layout: {0}")]
    Layout(#[from] ndarray::ShapeError),
}

/// Model input in NHWC order.
///
/// Tensors built by [`normalize`] always have shape [`INPUT_SHAPE`]; the
/// model handle still checks the shape before every forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTensor(Array4<f32>);

impl NormalizedTensor {
    #[cfg(test)]
    pub fn from_array(array: Array4<f32>) -> Self {
        Self(array)
    }

    pub fn zeros() -> Self {
        Self(Array4::zeros(INPUT_SHAPE))
    }

    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    pub fn has_input_shape(&self) -> bool {
        self.shape() == INPUT_SHAPE
    }

    #[cfg(test)]
    pub fn view(&self) -> ndarray::ArrayView4<'_, f32> {
        self.0.view()
    }

    /// Flat row-major data, cloned only when the array is not contiguous.
    pub fn to_contiguous_vec(&self) -> Vec<f32> {
        match self.0.as_slice() {
            Some(data) => data.to_vec(),
            None => self.0.iter().copied().collect(),
        }
    }
}

/// Decodes `bytes` and turns them into a model-ready tensor.
pub fn normalize(bytes: &[u8]) -> Result<NormalizedTensor, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let rgb = image::load_from_memory(bytes)?.to_rgb8();
    let resized = imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, RESIZE_FILTER);
    to_tensor(resized)
}

fn to_tensor(image: RgbImage) -> Result<NormalizedTensor, DecodeError> {
    let (width, height) = image.dimensions();
    let data: Vec<f32> = image
        .into_raw()
        .into_iter()
        .map(|value| f32::from(value) / 255.0)
        .collect();
    let array = Array4::from_shape_vec((1, height as usize, width as usize, INPUT_CHANNELS), data)?;
    Ok(NormalizedTensor(array))
}
