//! Core-side dark subtraction and gain normalisation.

use contracts::{AcquisitionError, ImageBuffer, ImageProcessor, PixelData};

/// Default [`ImageProcessor`]: per-pixel float arithmetic
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicProcessor;

fn check_size(image: &ImageBuffer, reference: &ImageBuffer) -> Result<(), AcquisitionError> {
    if image.size() != reference.size() {
        return Err(AcquisitionError::SizeMismatch {
            expected: image.size(),
            actual: reference.size(),
        });
    }
    Ok(())
}

impl ImageProcessor for BasicProcessor {
    fn dark_subtract(
        &self,
        image: &ImageBuffer,
        dark: &ImageBuffer,
    ) -> Result<ImageBuffer, AcquisitionError> {
        check_size(image, dark)?;
        let data = (0..image.data.len())
            .map(|i| image.data.value(i) - dark.data.value(i))
            .collect();
        ImageBuffer::new(image.width, image.height, PixelData::F32(data))
    }

    fn gain_normalize(
        &self,
        image: &ImageBuffer,
        dark: &ImageBuffer,
        gain: &ImageBuffer,
    ) -> Result<ImageBuffer, AcquisitionError> {
        check_size(image, dark)?;
        check_size(image, gain)?;
        let data = (0..image.data.len())
            .map(|i| (image.data.value(i) - dark.data.value(i)) * gain.data.value(i))
            .collect();
        ImageBuffer::new(image.width, image.height, PixelData::F32(data))
    }
}
