//! services/api/src/adapters/image.rs
//!
//! Image conversion adapter. Signature captures sometimes arrive as SVG,
//! which the downstream scan service cannot render; they must be
//! rasterized to PNG before upload or the completion is rejected.

use pickup_route_core::ports::{ConversionError, ImageConversionService};

/// Deployments without a rasterizer installed use this adapter; callers
/// see `Unavailable` and reject SVG content instead of uploading it raw.
pub struct NoSvgConverter;

impl ImageConversionService for NoSvgConverter {
    fn svg_to_png(&self, _svg: &[u8]) -> Result<Vec<u8>, ConversionError> {
        Err(ConversionError::Unavailable)
    }
}
