//! Frame enhancement ahead of detection

use crate::config::PreprocessConfig;
use crate::types::Frame;
use image::imageops::{self, FilterType};

/// Preprocess stage of the pipeline
pub trait Preprocessor: Send {
    fn process(&self, frame: &Frame) -> Frame;

    fn name(&self) -> &str;
}

/// Hands frames through untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Preprocessor for Passthrough {
    fn process(&self, frame: &Frame) -> Frame {
        frame.clone()
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

/// Resize, contrast stretch, blur, sharpen and gamma, each optional
#[derive(Debug, Clone)]
pub struct ImageEnhancer {
    config: PreprocessConfig,
    gamma_lut: [u8; 256],
}

impl ImageEnhancer {
    /// Fraction of darkest and brightest pixels ignored by the contrast stretch
    const CLIP_FRACTION: f64 = 0.01;
    const UNSHARPEN_SIGMA: f32 = 1.0;
    const UNSHARPEN_THRESHOLD: i32 = 2;

    pub fn new(config: PreprocessConfig) -> Self {
        let gamma_lut = gamma_table(config.gamma);
        Self { config, gamma_lut }
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    fn stretch_contrast(frame: &mut Frame) {
        let mut histogram = [0u64; 256];
        for p in frame.pixels() {
            histogram[luma(p.0) as usize] += 1;
        }

        let total: u64 = histogram.iter().sum();
        let clip = (total as f64 * Self::CLIP_FRACTION) as u64;
        let (lo, hi) = percentile_bounds(&histogram, clip);
        if hi <= lo {
            return;
        }

        let scale = 255.0 / (hi - lo) as f32;
        let mut lut = [0u8; 256];
        for (v, out) in lut.iter_mut().enumerate() {
            let stretched = (v as f32 - lo as f32) * scale;
            *out = stretched.clamp(0.0, 255.0).round() as u8;
        }
        apply_lut(frame, &lut);
    }
}

impl Preprocessor for ImageEnhancer {
    fn process(&self, frame: &Frame) -> Frame {
        let mut out = match self.config.target_size {
            Some((w, h)) if frame.dimensions() != (w, h) => {
                imageops::resize(frame, w, h, FilterType::Triangle)
            }
            _ => frame.clone(),
        };

        if self.config.enable_contrast {
            Self::stretch_contrast(&mut out);
        }
        if self.config.enable_blur && self.config.blur_sigma > 0.0 {
            out = imageops::blur(&out, self.config.blur_sigma);
        }
        if self.config.enable_sharpen {
            out = imageops::unsharpen(&out, Self::UNSHARPEN_SIGMA, Self::UNSHARPEN_THRESHOLD);
        }
        if self.config.enable_gamma {
            apply_lut(&mut out, &self.gamma_lut);
        }
        out
    }

    fn name(&self) -> &str {
        "enhancer"
    }
}

fn luma([r, g, b]: [u8; 3]) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
}

fn percentile_bounds(histogram: &[u64; 256], clip: u64) -> (u8, u8) {
    let mut acc = 0;
    let mut lo = 0u8;
    for (v, &count) in histogram.iter().enumerate() {
        acc += count;
        if acc > clip {
            lo = v as u8;
            break;
        }
    }

    acc = 0;
    let mut hi = 255u8;
    for (v, &count) in histogram.iter().enumerate().rev() {
        acc += count;
        if acc > clip {
            hi = v as u8;
            break;
        }
    }
    (lo, hi)
}

fn gamma_table(gamma: f32) -> [u8; 256] {
    let inv = if gamma > 0.0 { 1.0 / gamma } else { 1.0 };
    let mut lut = [0u8; 256];
    for (v, out) in lut.iter_mut().enumerate() {
        *out = ((v as f32 / 255.0).powf(inv) * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

fn apply_lut(frame: &mut Frame, lut: &[u8; 256]) {
    for p in frame.pixels_mut() {
        for c in p.0.iter_mut() {
            *c = lut[*c as usize];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn only(config: PreprocessConfig) -> PreprocessConfig {
        PreprocessConfig {
            enable_contrast: false,
            enable_blur: false,
            enable_sharpen: false,
            enable_gamma: false,
            ..config
        }
    }

    fn gradient() -> Frame {
        Frame::from_fn(64, 8, |x, _| {
            let v = 100 + (x as u8) % 50;
            Rgb([v, v, v])
        })
    }

    #[test]
    fn test_resize_only() {
        let enhancer = ImageEnhancer::new(PreprocessConfig {
            target_size: Some((32, 4)),
            ..only(PreprocessConfig::default())
        });
        let out = enhancer.process(&gradient());
        assert_eq!(out.dimensions(), (32, 4));
    }

    #[test]
    fn test_contrast_stretch_widens_range() {
        let enhancer = ImageEnhancer::new(PreprocessConfig {
            enable_contrast: true,
            ..only(PreprocessConfig::default())
        });
        let out = enhancer.process(&gradient());
        let min = out.pixels().map(|p| p.0[0]).min().unwrap();
        let max = out.pixels().map(|p| p.0[0]).max().unwrap();
        assert!(min < 20, "min {}", min);
        assert!(max > 235, "max {}", max);
    }

    #[test]
    fn test_flat_frame_survives_contrast() {
        let enhancer = ImageEnhancer::new(PreprocessConfig {
            enable_contrast: true,
            ..only(PreprocessConfig::default())
        });
        let flat = Frame::from_pixel(8, 8, Rgb([77, 77, 77]));
        assert_eq!(enhancer.process(&flat), flat);
    }

    #[test]
    fn test_gamma_brightens_midtones() {
        let enhancer = ImageEnhancer::new(PreprocessConfig {
            enable_gamma: true,
            gamma: 2.0,
            ..only(PreprocessConfig::default())
        });
        let frame = Frame::from_pixel(2, 2, Rgb([64, 128, 255]));
        let out = enhancer.process(&frame);
        let p = out.get_pixel(0, 0).0;
        assert!(p[0] > 64 && p[1] > 128);
        assert_eq!(p[2], 255);
    }

    #[test]
    fn test_full_chain_keeps_dimensions() {
        let enhancer = ImageEnhancer::new(PreprocessConfig::default());
        let out = enhancer.process(&gradient());
        assert_eq!(out.dimensions(), (64, 8));
        assert_eq!(Passthrough.process(&gradient()), gradient());
    }
}
