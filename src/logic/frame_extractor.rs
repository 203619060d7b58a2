//! SPDX-License-Identifier: GPL-3.0-or-later

//! Stage 1: decodes a video at a chosen sampling rate into an ordered,
//! bounded sequence of resized still [`Frame`]s. Decoding uses
//! `video-rs`; resizing uses `fast_image_resize`'s `rayon`-backed path.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, StageName};
use crate::types::{Frame, ImageEncoding, ProgressEvent};
use fast_image_resize::images::Image;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::{codecs::jpeg::JpegEncoder, ImageEncoder, RgbImage};
use std::path::Path;

/// Consecutive unreadable frames tolerated before the run aborts with
/// `DecodeFailed`.
const MAX_CONSECUTIVE_DECODE_FAILURES: u32 = 3;

/// Resizes `img` to fit within `max_dimension` on its longest side,
/// preserving aspect ratio.
fn resize_to_bound(img: &RgbImage, max_dimension: u32) -> anyhow::Result<RgbImage> {
    let (w, h) = img.dimensions();
    let longest = w.max(h);
    if longest <= max_dimension {
        return Ok(img.clone());
    }

    let scale = max_dimension as f64 / longest as f64;
    let new_w = ((w as f64) * scale).round().max(1.0) as u32;
    let new_h = ((h as f64) * scale).round().max(1.0) as u32;

    let src_image = Image::from_vec_u8(w, h, img.as_raw().clone(), PixelType::U8x3)?;
    let mut dst_image = Image::new(new_w, new_h, PixelType::U8x3);

    let mut resizer = Resizer::new();
    let options = ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Lanczos3));
    resizer.resize(&src_image, &mut dst_image, &options)?;

    RgbImage::from_raw(new_w, new_h, dst_image.buffer().to_vec())
        .ok_or_else(|| anyhow::anyhow!("resized buffer had unexpected size"))
}

/// Encodes an RGB image as a JPEG byte buffer.
fn encode_jpeg(img: &RgbImage) -> anyhow::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, 85);
    encoder.write_image(img.as_raw(), img.width(), img.height(), image::ExtendedColorType::Rgb8)?;
    Ok(bytes)
}

/// Decodes `source_path` at `cfg.sampling_rate`, producing an ordered
/// Frame sequence capped at `cfg.max_frames`.
pub fn extract_frames(
    source_path: &Path,
    cfg: &PipelineConfig,
    source_id: &str,
    mut on_progress: impl FnMut(ProgressEvent),
) -> Result<Vec<Frame>, PipelineError> {
    video_rs::init().map_err(|e| {
        PipelineError::source_unavailable(StageName::FrameExtractor, source_id, e)
    })?;

    let mut decoder = video_rs::Decoder::new(source_path).map_err(|e| {
        PipelineError::source_unavailable(StageName::FrameExtractor, source_id, e)
    })?;

    let (native_w, native_h) = decoder.size();
    let native_fps = decoder.frame_rate() as f64;
    if native_fps <= 0.0 {
        return Err(PipelineError::decode_failed(
            StageName::FrameExtractor,
            source_id,
            "source reported a non-positive frame rate",
        ));
    }

    let stride = (native_fps / cfg.sampling_rate as f64).round().max(1.0) as u64;

    let mut frames = Vec::new();
    let mut native_index: u64 = 0;
    let mut consecutive_failures: u32 = 0;

    for decoded in decoder.decode_iter() {
        let keep = native_index % stride == 0;
        let should_stop = cfg
            .max_frames
            .is_some_and(|max| frames.len() as u64 >= max);
        if should_stop {
            break;
        }

        if keep {
            match decoded {
                Ok((_time, raw_frame)) => {
                    consecutive_failures = 0;
                    let rgb = RgbImage::from_raw(
                        native_w,
                        native_h,
                        raw_frame.as_slice().expect("contiguous frame buffer").to_vec(),
                    )
                    .ok_or_else(|| {
                        PipelineError::decode_failed(
                            StageName::FrameExtractor,
                            source_id,
                            "decoded buffer did not match reported frame dimensions",
                        )
                    })?;

                    let resized = resize_to_bound(&rgb, cfg.max_frame_dimension).map_err(|e| {
                        PipelineError::decode_failed(StageName::FrameExtractor, source_id, e)
                    })?;
                    let bytes = encode_jpeg(&resized).map_err(|e| {
                        PipelineError::decode_failed(StageName::FrameExtractor, source_id, e)
                    })?;

                    let timestamp = native_index as f64 / native_fps;
                    frames.push(Frame {
                        index: frames.len() as u64,
                        timestamp,
                        bytes,
                        encoding: ImageEncoding::Jpeg,
                    });

                    if frames.len() % 20 == 0 {
                        on_progress(ProgressEvent {
                            stage: StageName::FrameExtractor,
                            overall_percent: 0.0,
                            detail: format!("extracted {} frames", frames.len()),
                        });
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    if consecutive_failures > MAX_CONSECUTIVE_DECODE_FAILURES {
                        return Err(PipelineError::decode_failed(
                            StageName::FrameExtractor,
                            source_id,
                            format!("{consecutive_failures} consecutive unreadable frames: {e}"),
                        ));
                    }
                }
            }
        }

        native_index += 1;
    }

    if frames.is_empty() {
        return Err(PipelineError::NoFramesExtracted {
            source_id: source_id.to_string(),
        });
    }

    on_progress(ProgressEvent {
        stage: StageName::FrameExtractor,
        overall_percent: 0.0,
        detail: format!("extraction complete: {} frames", frames.len()),
    });

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_is_noop_under_bound() {
        let img = RgbImage::from_pixel(100, 50, image::Rgb([10, 20, 30]));
        let resized = resize_to_bound(&img, 1024).unwrap();
        assert_eq!(resized.dimensions(), (100, 50));
    }

    #[test]
    fn resize_shrinks_longest_side_preserving_aspect() {
        let img = RgbImage::from_pixel(2048, 1024, image::Rgb([10, 20, 30]));
        let resized = resize_to_bound(&img, 1024).unwrap();
        assert_eq!(resized.width(), 1024);
        assert_eq!(resized.height(), 512);
    }

    #[test]
    fn jpeg_encode_round_trips_dimensions() {
        let img = RgbImage::from_pixel(64, 48, image::Rgb([200, 100, 50]));
        let bytes = encode_jpeg(&img).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.width(), 64);
        assert_eq!(decoded.height(), 48);
    }
}
