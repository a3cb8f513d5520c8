use std::path::Path;

use image::imageops::FilterType;
use image::ImageReader;

use crate::normalize::{l2_normalize_in_place, mean_center_in_place};
use crate::{EmbeddingModel, SemanticError};

/// Grayscale thumbnail encoder. Needs no external assets, so it is the default model.
///
/// The image is decoded (format sniffed from the bytes, not the extension), squashed to
/// `size × size`, converted to luma, scaled to `[0, 1]` and mean-centred before the optional
/// L2 normalisation. Visually similar images land close together under cosine similarity.
#[derive(Debug, Clone)]
pub struct ThumbnailModel {
    size: u32,
    normalize: bool,
}

impl ThumbnailModel {
    pub fn new(size: u32, normalize: bool) -> Self {
        Self { size, normalize }
    }
}

impl EmbeddingModel for ThumbnailModel {
    fn name(&self) -> &str {
        "thumbnail"
    }

    fn dimension(&self) -> usize {
        (self.size * self.size) as usize
    }

    fn embed(&mut self, path: &Path) -> Result<Vec<f32>, SemanticError> {
        let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        let thumb = img
            .resize_exact(self.size, self.size, FilterType::Triangle)
            .to_luma8();

        let mut v: Vec<f32> = thumb.into_raw().into_iter().map(|p| p as f32 / 255.0).collect();
        mean_center_in_place(&mut v);
        if self.normalize {
            l2_normalize_in_place(&mut v);
        }
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient(path: &Path, w: u32, h: u32, invert: bool) {
        RgbImage::from_fn(w, h, |x, _| {
            let v = (x * 255 / w.max(1)) as u8;
            let v = if invert { 255 - v } else { v };
            Rgb([v, v, v])
        })
        .save(path)
        .unwrap();
    }

    #[test]
    fn thumbnail_has_expected_dimension_and_unit_norm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grad.png");
        gradient(&path, 64, 48, false);

        let mut model = ThumbnailModel::new(8, true);
        let v = model.embed(&path).unwrap();
        assert_eq!(v.len(), 64);
        assert_eq!(model.dimension(), 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4, "got norm={norm}");
    }

    #[test]
    fn thumbnail_separates_opposite_images() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        let c = dir.path().join("c.png");
        gradient(&a, 64, 64, false);
        gradient(&b, 128, 128, false);
        gradient(&c, 64, 64, true);

        let mut model = ThumbnailModel::new(8, true);
        let va = model.embed(&a).unwrap();
        let vb = model.embed(&b).unwrap();
        let vc = model.embed(&c).unwrap();

        let dot = |x: &[f32], y: &[f32]| x.iter().zip(y).map(|(p, q)| p * q).sum::<f32>();
        assert!(dot(&va, &vb) > 0.9);
        assert!(dot(&va, &vc) < -0.9);
    }

    #[test]
    fn thumbnail_sniffs_format_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("grad.png");
        gradient(&png, 16, 16, false);
        let staged = dir.path().join("0b6f2a");
        std::fs::rename(&png, &staged).unwrap();

        let mut model = ThumbnailModel::new(4, true);
        assert_eq!(model.embed(&staged).unwrap().len(), 16);
    }

    #[test]
    fn thumbnail_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dog.jpg");
        std::fs::write(&path, b"this is not a jpeg").unwrap();

        let mut model = ThumbnailModel::new(8, true);
        assert!(model.embed(&path).is_err());
        assert!(matches!(
            model.embed(&dir.path().join("missing.jpg")),
            Err(SemanticError::Io(_))
        ));
    }
}
