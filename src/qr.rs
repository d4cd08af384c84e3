//! Pairing codes rendered as PNG data URLs, ready for an `<img src>`.

use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{GrayImage, ImageFormat, Luma};
use qrcode::{Color, EcLevel, QrCode};
use std::io::Cursor;

const TARGET_SIDE: u32 = 256;
const QUIET_ZONE: u32 = 4;

pub const DATA_URL_PREFIX: &str = "data:image/png;base64,";

pub fn png_data_url(code: &str) -> Result<String> {
    let qr = QrCode::with_error_correction_level(code.as_bytes(), EcLevel::M)
        .map_err(|err| Error::PairingFailed(format!("cannot encode pairing code: {err}")))?;
    let width = qr.width() as u32;
    let colors = qr.to_colors();

    let modules = width + 2 * QUIET_ZONE;
    let scale = (TARGET_SIDE / modules).max(1);
    let side = modules * scale;
    let img = GrayImage::from_fn(side, side, |x, y| {
        let (mx, my) = (x / scale, y / scale);
        let inside = (QUIET_ZONE..QUIET_ZONE + width).contains(&mx)
            && (QUIET_ZONE..QUIET_ZONE + width).contains(&my);
        let dark = inside
            && colors[((my - QUIET_ZONE) * width + (mx - QUIET_ZONE)) as usize] == Color::Dark;
        if dark {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    });

    let mut png = Cursor::new(Vec::new());
    img.write_to(&mut png, ImageFormat::Png)
        .map_err(|err| Error::PairingFailed(format!("cannot render pairing code: {err}")))?;
    Ok(format!("{DATA_URL_PREFIX}{}", STANDARD.encode(png.into_inner())))
}
