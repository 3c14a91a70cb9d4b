// In-process engine: decode, bound dimensions, re-encode, fall back to PNG.

use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use tracing::{debug, warn};

use super::{no_worse_than_original, CompressionEngine, EncodeInput, EncodeOptions, EncodeResult, Strategy};
use crate::config::LocalEngineConfig;
use crate::detect::format::ImageFormat;
use crate::error::{EncodeError, EncodeErrorKind};

/// Formats re-encoded natively. Anything else targets the configured default.
const NATIVE_FORMATS: [ImageFormat; 3] = [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::WebP];

const FALLBACK_FORMAT: ImageFormat = ImageFormat::Png;

#[derive(Clone)]
pub struct LocalEngine {
    config: LocalEngineConfig,
}

impl LocalEngine {
    pub fn new(config: LocalEngineConfig) -> Self {
        Self { config }
    }

    fn encode_blocking(&self, bytes: &Bytes, options: EncodeOptions) -> Result<EncodeResult, EncodeError> {
        let reader = ImageReader::new(Cursor::new(bytes.as_ref()))
            .with_guessed_format()
            .map_err(|e| EncodeError::new(EncodeErrorKind::Decode, e.to_string()))?;
        let native = reader
            .format()
            .and_then(map_format)
            .ok_or_else(|| EncodeError::new(EncodeErrorKind::Decode, "unrecognised image format"))?;
        let mut img = reader
            .decode()
            .map_err(|e| EncodeError::new(EncodeErrorKind::Decode, e.to_string()))?;

        let max_w = options.max_width.unwrap_or(self.config.max_width).max(1);
        let max_h = options.max_height.unwrap_or(self.config.max_height).max(1);
        let (w, h) = (img.width(), img.height());
        if w > max_w || h > max_h {
            // `resize` keeps the aspect ratio and fits inside the box; only ever shrinks here.
            img = img.resize(max_w, max_h, FilterType::Lanczos3);
            debug!("local engine resized {}x{} -> {}x{}", w, h, img.width(), img.height());
        }

        let target = if NATIVE_FORMATS.contains(&native) {
            native
        } else {
            self.config.default_format
        };
        let quality = options
            .quality
            .map(|q| q.clamp(1, 100))
            .unwrap_or_else(|| self.config.quality.quality_for(bytes.len() as u64));

        let (encoded, format) = match encode_as(&img, target, quality) {
            Ok(buf) => (buf, target),
            Err(e) => {
                warn!("local encode as {:?} failed, falling back to {:?}: {}", target, FALLBACK_FORMAT, e);
                (encode_as(&img, FALLBACK_FORMAT, quality)?, FALLBACK_FORMAT)
            }
        };

        Ok(no_worse_than_original(bytes, native, encoded, format))
    }
}

#[async_trait]
impl CompressionEngine for LocalEngine {
    fn strategy(&self) -> Strategy {
        Strategy::Local
    }

    async fn encode(&self, input: EncodeInput<'_>, options: EncodeOptions) -> Result<EncodeResult, EncodeError> {
        let bytes = input.bytes.clone();
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.encode_blocking(&bytes, options))
            .await
            .map_err(|e| EncodeError::new(EncodeErrorKind::Transcode, format!("encode task: {e}")))?
    }
}

fn map_format(format: image::ImageFormat) -> Option<ImageFormat> {
    match format {
        image::ImageFormat::Jpeg => Some(ImageFormat::Jpeg),
        image::ImageFormat::Png => Some(ImageFormat::Png),
        image::ImageFormat::WebP => Some(ImageFormat::WebP),
        image::ImageFormat::Gif => Some(ImageFormat::Gif),
        image::ImageFormat::Bmp => Some(ImageFormat::Bmp),
        image::ImageFormat::Tiff => Some(ImageFormat::Tiff),
        image::ImageFormat::Avif => Some(ImageFormat::Avif),
        _ => None,
    }
}

fn encode_as(img: &DynamicImage, format: ImageFormat, quality: u8) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::new();
    let result = match format {
        ImageFormat::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))
        }
        ImageFormat::Png => img.write_with_encoder(PngEncoder::new_with_quality(
            &mut out,
            CompressionType::Best,
            PngFilter::Adaptive,
        )),
        ImageFormat::WebP => {
            let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
            rgba.write_with_encoder(WebPEncoder::new_lossless(&mut out))
        }
        other => {
            return Err(EncodeError::new(
                EncodeErrorKind::Transcode,
                format!("no encoder for {other:?}"),
            ))
        }
    };
    result.map_err(|e| EncodeError::new(EncodeErrorKind::Transcode, e.to_string()))?;
    Ok(out)
}
