use crate::types::BBox;
use crate::AutomationError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Local};
use image::{ImageFormat, RgbaImage};
use std::io::Cursor;
use std::path::Path;

/// Holds one captured frame plus when and why it was taken
#[derive(Debug, Clone)]
pub struct Screenshot {
    /// RGBA pixels
    pub image: RgbaImage,
    pub captured_at: DateTime<Local>,
    /// Free-form note such as "Before click 'Submit'"
    pub description: Option<String>,
}

impl Screenshot {
    pub fn from_image(image: RgbaImage) -> Self {
        Self {
            image,
            captured_at: Local::now(),
            description: None,
        }
    }

    /// Wrap raw RGBA bytes. Fails if the buffer does not match the dimensions.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self, AutomationError> {
        let image = RgbaImage::from_raw(width, height, data).ok_or_else(|| {
            AutomationError::Capture(format!(
                "RGBA buffer does not match {width}x{height} frame"
            ))
        })?;
        Ok(Self::from_image(image))
    }

    /// A frame filled with a single colour.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self::from_image(RgbaImage::from_pixel(width, height, image::Rgba(rgba)))
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    /// Full-frame bounding box.
    pub fn bounds(&self) -> BBox {
        BBox::new(0, 0, self.width() as i32, self.height() as i32)
    }

    /// Copy out `region`, clamped to the frame. Returns the crop and its top-left offset.
    pub fn crop(&self, region: &BBox) -> Result<(Screenshot, (i32, i32)), AutomationError> {
        let r = region.clamp_to(self.width(), self.height());
        if r.width() <= 0 || r.height() <= 0 {
            return Err(AutomationError::Capture(format!(
                "region {region} lies outside the {}x{} frame",
                self.width(),
                self.height()
            )));
        }
        let view = image::imageops::crop_imm(
            &self.image,
            r.x1 as u32,
            r.y1 as u32,
            r.width() as u32,
            r.height() as u32,
        );
        let cropped = Screenshot {
            image: view.to_image(),
            captured_at: self.captured_at,
            description: self.description.clone(),
        };
        Ok((cropped, (r.x1, r.y1)))
    }

    /// Encode the frame as PNG.
    pub fn to_png(&self) -> Result<Vec<u8>, AutomationError> {
        let mut cursor = Cursor::new(Vec::new());
        self.image.write_to(&mut cursor, ImageFormat::Png)?;
        Ok(cursor.into_inner())
    }

    pub fn to_base64_png(&self) -> Result<String, AutomationError> {
        Ok(STANDARD.encode(self.to_png()?))
    }

    /// Decode any format supported by the `image` crate features in use.
    pub fn from_encoded(bytes: &[u8]) -> Result<Self, AutomationError> {
        let decoded = image::load_from_memory(bytes)?;
        Ok(Self::from_image(decoded.to_rgba8()))
    }

    pub fn from_base64(data: &str) -> Result<Self, AutomationError> {
        // Accept data URLs as well as bare base64
        let payload = data
            .split_once("base64,")
            .map(|(_, rest)| rest)
            .unwrap_or(data);
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| AutomationError::Capture(format!("invalid base64 image: {e}")))?;
        Self::from_encoded(&bytes)
    }

    pub fn save_png(&self, path: &Path) -> Result<(), AutomationError> {
        let bytes = self.to_png()?;
        std::fs::write(path, bytes).map_err(|e| {
            AutomationError::Internal(format!("failed to write {}: {e}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_clamps_and_reports_offset() {
        let shot = Screenshot::filled(100, 80, [10, 20, 30, 255]);
        let (crop, offset) = shot.crop(&BBox::new(90, 60, 150, 120)).unwrap();
        assert_eq!(offset, (90, 60));
        assert_eq!(crop.resolution(), (10, 20));
    }

    #[test]
    fn test_crop_outside_frame_fails() {
        let shot = Screenshot::filled(10, 10, [0, 0, 0, 255]);
        assert!(shot.crop(&BBox::new(20, 20, 30, 30)).is_err());
    }

    #[test]
    fn test_base64_png_decodes_back() {
        let shot = Screenshot::filled(4, 3, [255, 0, 0, 255]);
        let encoded = shot.to_base64_png().unwrap();
        let decoded = Screenshot::from_base64(&format!("data:image/png;base64,{encoded}")).unwrap();
        assert_eq!(decoded.resolution(), (4, 3));
        assert_eq!(decoded.image.get_pixel(2, 1).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_rgba_length_mismatch() {
        assert!(Screenshot::from_rgba(2, 2, vec![0; 15]).is_err());
    }
}
