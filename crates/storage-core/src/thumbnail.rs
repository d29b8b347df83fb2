use std::io::Cursor;

use image::ImageFormat;
use tracing::debug;

use crate::models::Size;

/// Decode `data` and scale it to fit `size`, keeping the aspect ratio, as PNG.
/// Returns `None` if the bytes are not a decodable image.
pub(crate) fn render(data: &[u8], size: Size) -> Option<Vec<u8>> {
    let image = match image::load_from_memory(data) {
        Ok(image) => image,
        Err(e) => {
            debug!("thumbnail decode failed: {}", e);
            return None;
        }
    };

    let thumb = image.thumbnail(size.width.max(1), size.height.max(1));
    let mut out = Cursor::new(Vec::new());
    if let Err(e) = thumb.write_to(&mut out, ImageFormat::Png) {
        debug!("thumbnail encode failed: {}", e);
        return None;
    }
    Some(out.into_inner())
}

#[cfg(test)]
pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let image = image::DynamicImage::new_rgb8(width, height);
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}
