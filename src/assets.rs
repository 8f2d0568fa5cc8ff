use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{ImageReader, RgbaImage};
use serde_json::json;

use crate::error_codes::CodedError;
use crate::sampler::DepthTextures;

/// Decode an image file into RGBA8.
pub fn load_rgba(path: &Path) -> Result<RgbaImage> {
    let image = ImageReader::open(path)
        .with_context(|| format!("failed opening {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("failed sniffing format of {}", path.display()))?
        .decode()
        .with_context(|| format!("failed decoding {}", path.display()))?
        .to_rgba8();
    Ok(image)
}

/// Load the color/depth pair. Mismatched dimensions are tolerated with a
/// warning unless `require_matching_dimensions` is set.
pub fn load_depth_textures(
    color_path: &Path,
    depth_path: &Path,
    require_matching_dimensions: bool,
) -> Result<DepthTextures> {
    let color = load_rgba(color_path)?;
    let depth = load_rgba(depth_path)?;
    check_matching_dimensions(&color, &depth, require_matching_dimensions)?;
    log::debug!(
        "loaded color map {} ({}x{}) and depth map {} ({}x{})",
        color_path.display(),
        color.width(),
        color.height(),
        depth_path.display(),
        depth.width(),
        depth.height()
    );
    Ok(DepthTextures::new(color, depth)?)
}

fn check_matching_dimensions(
    color: &RgbaImage,
    depth: &RgbaImage,
    require_matching_dimensions: bool,
) -> Result<()> {
    if color.dimensions() == depth.dimensions() {
        return Ok(());
    }

    let message = format!(
        "color map is {}x{} but depth map is {}x{}",
        color.width(),
        color.height(),
        depth.width(),
        depth.height()
    );
    if require_matching_dimensions {
        return Err(anyhow!(CodedError::usage("ASSET_DIMENSION_MISMATCH", message)
            .with_details(json!({
                "color": [color.width(), color.height()],
                "depth": [depth.width(), depth.height()],
            }))));
    }
    log::warn!("{message}; sampling by UV anyway");
    Ok(())
}
