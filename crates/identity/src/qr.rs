//! QR code rendering and scanning of identity tokens

use crate::error::{IdentityError, IdentityResult};
use crate::token::{decode_token, encode_token, TOKEN_SCHEME};
use crate::validation::UserIdentity;
use image::{DynamicImage, Luma};
use qrcode::QrCode;

/// QR code utilities for identity exchange
///
/// The camera/display side lives in the presentation layer; this handler
/// only converts between the identity token and PNG pixel data.
pub struct QrTokenHandler;

impl QrTokenHandler {
    /// Render an identity's token as a QR code
    ///
    /// Returns PNG image data as bytes.
    pub fn encode(identity: &UserIdentity) -> IdentityResult<Vec<u8>> {
        let token = encode_token(identity);

        let qr = QrCode::new(token.as_bytes())
            .map_err(|e| IdentityError::QrCode(format!("Failed to generate QR code: {}", e)))?;

        let img = qr.render::<Luma<u8>>().build();

        let mut png_data = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(
                &mut std::io::Cursor::new(&mut png_data),
                image::ImageFormat::Png,
            )
            .map_err(|e| IdentityError::QrCode(format!("Failed to encode PNG: {}", e)))?;

        Ok(png_data)
    }

    /// Decode an identity from a scanned QR code image
    ///
    /// Accepts PNG image data as bytes.
    pub fn decode(png_data: &[u8]) -> IdentityResult<UserIdentity> {
        let img = image::load_from_memory(png_data)
            .map_err(|e| IdentityError::QrCode(format!("Failed to load image: {}", e)))?;

        let gray = img.to_luma8();

        let mut prepared = rqrr::PreparedImage::prepare(gray);
        let grids = prepared.detect_grids();

        if grids.is_empty() {
            return Err(IdentityError::QrCode(
                "No QR code found in image".to_string(),
            ));
        }

        let (_, content) = grids[0]
            .decode()
            .map_err(|e| IdentityError::QrCode(format!("Failed to decode QR code: {:?}", e)))?;

        if !content.starts_with(TOKEN_SCHEME) {
            return Err(IdentityError::ParseToken(
                "Scanned QR code is not a murmur identity token".to_string(),
            ));
        }

        decode_token(&content)
    }
}
