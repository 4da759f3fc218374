//! Thermal [`FrameSource`]: sensor read with retry, colour-ramp render, JPEG.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use labrig_hal::ThermalSensor;
use labrig_types::ThermalConfig;

use crate::camera::{CaptureError, Captured, FrameSource, encode_jpeg};
use crate::font;
use crate::frame::TempRange;

/// Colour anchors from coldest to hottest.
const RAMP: [(f64, [u8; 3]); 6] = [
    (0.0, [0, 0, 20]),
    (0.2, [20, 20, 180]),
    (0.4, [0, 180, 255]),
    (0.6, [255, 255, 0]),
    (0.8, [255, 80, 0]),
    (1.0, [255, 255, 255]),
];

const MIN_SPAN_C: f64 = 0.01;
const TEXT_MARGIN_PX: u32 = 6;

pub struct ThermalPipeline {
    config: ThermalConfig,
    sensor: Box<dyn ThermalSensor>,
    grid: Vec<f32>,
}

impl ThermalPipeline {
    pub fn new(config: ThermalConfig, sensor: Box<dyn ThermalSensor>) -> Self {
        let (w, h) = sensor.dimensions();
        Self {
            grid: vec![0.0; w as usize * h as usize],
            config,
            sensor,
        }
    }

    /// Read one grid, retrying corrupt subpages. `Ok(false)` once retries
    /// run out.
    fn read_grid(&mut self) -> Result<bool, CaptureError> {
        for _ in 0..self.config.read_retries.max(1) {
            match self.sensor.read_frame(&mut self.grid) {
                Ok(()) => return Ok(true),
                Err(e) if e.is_retryable() => {
                    std::thread::sleep(self.config.read_retry_delay());
                }
                Err(e) => return Err(CaptureError::Failed(e.to_string())),
            }
        }
        Ok(false)
    }
}

impl FrameSource for ThermalPipeline {
    fn capture(&mut self) -> Result<Option<Captured>, CaptureError> {
        if !self.read_grid()? {
            return Ok(None);
        }
        let (w, h) = self.sensor.dimensions();
        let (jpeg, temps) = render(&self.grid, w, h, &self.config)
            .map_err(|e| CaptureError::Failed(format!("thermal_encode_failed:{e}")))?;
        Ok(Some(Captured {
            jpeg,
            temps: Some(temps),
        }))
    }
}

/// Map a normalised temperature onto the ramp.
pub fn ramp_color(normalized: f64) -> Rgb<u8> {
    let t = normalized.clamp(0.0, 1.0);
    for pair in RAMP.windows(2) {
        let (left_t, left) = pair[0];
        let (right_t, right) = pair[1];
        if t <= right_t {
            let ratio = if right_t > left_t {
                (t - left_t) / (right_t - left_t)
            } else {
                0.0
            };
            let lerp =
                |a: u8, b: u8| (f64::from(a) + (f64::from(b) - f64::from(a)) * ratio).round() as u8;
            return Rgb([
                lerp(left[0], right[0]),
                lerp(left[1], right[1]),
                lerp(left[2], right[2]),
            ]);
        }
    }
    Rgb(RAMP[RAMP.len() - 1].1)
}

/// Colourise a `width`×`height` grid at native resolution, mirrored
/// left-right. Min and max consider finite cells only.
pub fn heatmap(grid: &[f32], width: u32, height: u32) -> (RgbImage, TempRange) {
    let finite = grid.iter().copied().filter(|t| t.is_finite()).map(f64::from);
    let (min_c, max_c) = finite.fold(None, |acc: Option<(f64, f64)>, t| match acc {
        Some((lo, hi)) => Some((lo.min(t), hi.max(t))),
        None => Some((t, t)),
    })
    .unwrap_or((0.0, 0.0));
    let span = (max_c - min_c).max(MIN_SPAN_C);

    let image = RgbImage::from_fn(width, height, |x, y| {
        match grid.get((y * width + x) as usize) {
            Some(t) if t.is_finite() => ramp_color((f64::from(*t) - min_c) / span),
            _ => Rgb([0, 0, 0]),
        }
    });
    (imageops::flip_horizontal(&image), TempRange { min_c, max_c })
}

/// Full render: heatmap, nearest-neighbour upscale, annotated top band,
/// JPEG encode.
pub fn render(
    grid: &[f32],
    width: u32,
    height: u32,
    config: &ThermalConfig,
) -> Result<(Vec<u8>, TempRange), image::ImageError> {
    let (native, temps) = heatmap(grid, width, height);
    let scale = config.scale.max(1);
    let mut image = imageops::resize(&native, width * scale, height * scale, FilterType::Nearest);

    let band = config.text_band_px.min(image.height());
    for y in 0..band {
        for x in 0..image.width() {
            image.put_pixel(x, y, Rgb([0, 0, 0]));
        }
    }
    let text = format!("max {:.1}C min {:.1}C", temps.max_c, temps.min_c);
    let text_scale = (band.saturating_sub(2 * TEXT_MARGIN_PX) / font::GLYPH_HEIGHT).max(1);
    font::draw_text(
        &mut image,
        TEXT_MARGIN_PX,
        TEXT_MARGIN_PX,
        text_scale,
        &text,
        Rgb([255, 255, 255]),
    );

    let jpeg = encode_jpeg(&image, config.jpeg_quality)?;
    Ok((jpeg, temps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use labrig_hal::HalError;
    use labrig_hal::sim::SimThermalSensor;

    fn fast_config() -> ThermalConfig {
        ThermalConfig {
            read_retry_delay_s: 0.0,
            ..ThermalConfig::default()
        }
    }

    #[test]
    fn ramp_hits_anchors() {
        assert_eq!(ramp_color(0.0), Rgb([0, 0, 20]));
        assert_eq!(ramp_color(0.2), Rgb([20, 20, 180]));
        assert_eq!(ramp_color(0.6), Rgb([255, 255, 0]));
        assert_eq!(ramp_color(1.0), Rgb([255, 255, 255]));
        assert_eq!(ramp_color(-3.0), ramp_color(0.0));
        assert_eq!(ramp_color(7.0), ramp_color(1.0));
        assert_eq!(ramp_color(0.1), Rgb([10, 10, 100]));
    }

    #[test]
    fn heatmap_mirrors_and_blacks_out_non_finite() {
        let grid = [10.0, 20.0, f32::NAN];
        let (img, temps) = heatmap(&grid, 3, 1);
        assert_eq!(temps, TempRange { min_c: 10.0, max_c: 20.0 });
        assert_eq!(img.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(img.get_pixel(1, 0), &Rgb([255, 255, 255]));
        assert_eq!(img.get_pixel(2, 0), &Rgb([0, 0, 20]));
    }

    #[test]
    fn flat_or_empty_grid_uses_minimum_span() {
        let (img, temps) = heatmap(&[25.0; 4], 2, 2);
        assert_eq!(temps.min_c, temps.max_c);
        assert_eq!(img.get_pixel(0, 0), &Rgb([0, 0, 20]));

        let (_, temps) = heatmap(&[f32::INFINITY; 4], 2, 2);
        assert_eq!(temps, TempRange { min_c: 0.0, max_c: 0.0 });
    }

    #[test]
    fn capture_renders_a_jpeg_with_temperatures() {
        let sensor = SimThermalSensor::new(32, 24);
        let mut pipeline = ThermalPipeline::new(fast_config(), Box::new(sensor));
        let captured = pipeline.capture().unwrap().unwrap();
        assert_eq!(&captured.jpeg[..2], &[0xFF, 0xD8]);
        let temps = captured.temps.unwrap();
        assert!(temps.max_c > temps.min_c);
        assert!(temps.min_c > 20.0);
    }

    #[test]
    fn transient_errors_are_retried() {
        let sensor = SimThermalSensor::new(4, 4);
        sensor.push_errors([HalError::Transient("subpage".into()), HalError::TooManyRetries]);
        let mut pipeline = ThermalPipeline::new(fast_config(), Box::new(sensor.clone()));
        assert!(pipeline.capture().unwrap().is_some());
        assert_eq!(sensor.frames_read(), 1);
    }

    #[test]
    fn exhausted_retries_yield_no_frame() {
        let sensor = SimThermalSensor::new(4, 4);
        sensor.push_errors(vec![HalError::Transient("subpage".into()); 3]);
        let mut pipeline = ThermalPipeline::new(fast_config(), Box::new(sensor));
        assert!(pipeline.capture().unwrap().is_none());
    }

    #[test]
    fn hard_errors_propagate() {
        let sensor = SimThermalSensor::new(4, 4);
        sensor.push_errors([HalError::Io("i2c bus stuck".into())]);
        let mut pipeline = ThermalPipeline::new(fast_config(), Box::new(sensor));
        let err = pipeline.capture().unwrap_err();
        assert!(matches!(err, CaptureError::Failed(msg) if msg.contains("i2c bus stuck")));
    }
}
