//! Image encoding for the VLM request body.
//!
//! Rendered PDF pages are PNG-encoded (lossless; text crispness matters more
//! than size for extraction). Every page image is then base64-wrapped, either
//! as a `data:` URI for the chat-completions wire format or as
//! [`ImageData`] for `edgequake_llm` providers. Both request `detail: "high"`
//! so fine print and small tables survive the model's tiling.

use crate::pipeline::normalize::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Detail level requested for every image.
pub const IMAGE_DETAIL: &str = "high";

/// PNG-encode a rendered page.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// `data:<mime>;base64,<payload>`
pub fn data_uri(image: &PageImage) -> String {
    let b64 = STANDARD.encode(&image.data);
    debug!("Encoded image → {} bytes base64", b64.len());
    format!("data:{};base64,{}", image.media_type.mime(), b64)
}

/// Wrap a page image for an `edgequake_llm` vision message.
pub fn image_data(image: &PageImage) -> ImageData {
    ImageData::new(STANDARD.encode(&image.data), image.media_type.mime()).with_detail(IMAGE_DETAIL)
}
