//! Tile payload parsing and image decoding
//!
//! A chunk response is either one encoded image, or a JSON list with one
//! base64 image per Z slot of the bundle. Entries may be bare strings or
//! objects with a `data` field, holding either a `data:` URL or plain base64.

use crate::error::{CubeError, Result};
use crate::types::PixelBuffer;
use base64::Engine as _;
use bytes::Bytes;
use serde::Deserialize;

/// Encoded images returned for one chunk request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TilePayload {
    /// A single image for the first slot
    Single(Bytes),
    /// Ordered images, one per Z slot
    Bundle(Vec<Bytes>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonEntry {
    Inline(String),
    Object { data: String },
}

impl JsonEntry {
    fn into_bytes(self) -> Result<Bytes> {
        let encoded = match self {
            JsonEntry::Inline(s) | JsonEntry::Object { data: s } => s,
        };
        decode_base64_image(&encoded).map(Bytes::from)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonBody {
    List(Vec<JsonEntry>),
    One(JsonEntry),
}

impl TilePayload {
    /// Interpret a raw response body
    pub fn from_response(body: Bytes) -> Result<Self> {
        let start = body.iter().position(|b| !b.is_ascii_whitespace());
        match start.map(|i| body[i]) {
            None => Err(CubeError::Decode("empty tile response".to_string())),
            Some(b'[') | Some(b'{') | Some(b'"') => {
                match serde_json::from_slice::<JsonBody>(&body)? {
                    JsonBody::List(entries) => entries
                        .into_iter()
                        .map(JsonEntry::into_bytes)
                        .collect::<Result<Vec<_>>>()
                        .map(TilePayload::Bundle),
                    JsonBody::One(entry) => entry.into_bytes().map(TilePayload::Single),
                }
            }
            Some(_) => Ok(TilePayload::Single(body)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TilePayload::Single(_) => 1,
            TilePayload::Bundle(images) => images.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encoded images in slot order
    pub fn into_images(self) -> Vec<Bytes> {
        match self {
            TilePayload::Single(image) => vec![image],
            TilePayload::Bundle(images) => images,
        }
    }
}

/// Decode a `data:<mime>;base64,<data>` URL or bare base64 string
pub fn decode_base64_image(encoded: &str) -> Result<Vec<u8>> {
    let data = match encoded.strip_prefix("data:") {
        Some(rest) => {
            let (header, data) = rest
                .split_once(',')
                .ok_or_else(|| CubeError::Decode("data URL without payload".to_string()))?;
            if !header.ends_with(";base64") {
                return Err(CubeError::Decode(format!(
                    "unsupported data URL encoding: {}",
                    header
                )));
            }
            data
        }
        None => encoded,
    };

    Ok(base64::engine::general_purpose::STANDARD.decode(data.trim())?)
}

/// Decodes one encoded image into RGBA8 pixels
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, encoded: &[u8]) -> Result<PixelBuffer>;
}

/// Decoder backed by the `image` crate; the format is sniffed from the data
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCrateDecoder;

impl ImageDecoder for ImageCrateDecoder {
    fn decode(&self, encoded: &[u8]) -> Result<PixelBuffer> {
        let rgba = image::load_from_memory(encoded)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        PixelBuffer::from_rgba(width as usize, height as usize, rgba.into_raw())
    }
}

/// Encode RGBA8 pixels as PNG
pub fn encode_png(pixels: &PixelBuffer) -> Result<Vec<u8>> {
    let img = pixels
        .to_image()
        .ok_or_else(|| CubeError::InvalidDimensions("pixel buffer size mismatch".to_string()))?;
    let mut out = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)?;
    Ok(out)
}

/// Encode RGBA8 pixels as a PNG `data:` URL
pub fn encode_png_data_url(pixels: &PixelBuffer) -> Result<String> {
    let png = encode_png(pixels)?;
    Ok(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pixels(seed: u8) -> PixelBuffer {
        let data = (0..16u8).map(|i| i.wrapping_mul(17).wrapping_add(seed)).collect();
        PixelBuffer::from_rgba(2, 2, data).unwrap()
    }

    #[test]
    fn test_png_round_trip() {
        let pixels = sample_pixels(3);
        let png = encode_png(&pixels).unwrap();
        let decoded = ImageCrateDecoder.decode(&png).unwrap();
        assert_eq!(decoded, pixels);
    }

    #[test]
    fn test_raw_response_is_single() {
        let png = Bytes::from(encode_png(&sample_pixels(0)).unwrap());
        let payload = TilePayload::from_response(png.clone()).unwrap();
        assert_eq!(payload, TilePayload::Single(png));
    }

    #[test]
    fn test_json_bundle_response() {
        let a = sample_pixels(1);
        let b = sample_pixels(2);
        let body = serde_json::json!([
            { "data": encode_png_data_url(&a).unwrap() },
            encode_png_data_url(&b).unwrap(),
        ]);
        let payload = TilePayload::from_response(Bytes::from(body.to_string())).unwrap();
        assert_eq!(payload.len(), 2);

        let images = payload.into_images();
        assert_eq!(ImageCrateDecoder.decode(&images[0]).unwrap(), a);
        assert_eq!(ImageCrateDecoder.decode(&images[1]).unwrap(), b);
    }

    #[test]
    fn test_json_single_object() {
        let url = encode_png_data_url(&sample_pixels(9)).unwrap();
        let body = format!(r#"  {{"data": "{}"}}"#, url);
        let payload = TilePayload::from_response(Bytes::from(body)).unwrap();
        assert!(matches!(payload, TilePayload::Single(_)));
    }

    #[test]
    fn test_bare_base64() {
        assert_eq!(decode_base64_image("AQID").unwrap(), vec![1, 2, 3]);
        assert_eq!(
            decode_base64_image("data:application/octet-stream;base64,AQID").unwrap(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_bad_payloads() {
        assert!(matches!(
            TilePayload::from_response(Bytes::from_static(b"   ")),
            Err(CubeError::Decode(_))
        ));
        assert!(matches!(
            TilePayload::from_response(Bytes::from_static(b"[{\"nope\": 1}]")),
            Err(CubeError::Serialization(_))
        ));
        assert!(decode_base64_image("data:image/png,abc").is_err());
        assert!(decode_base64_image("data:image/png;base64").is_err());
        assert!(decode_base64_image("not base64!").is_err());
        assert!(ImageCrateDecoder.decode(b"not an image").is_err());
    }
}
