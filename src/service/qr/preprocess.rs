//! Image cleanup for the second round of decode attempts: local contrast
//! equalization followed by an edge-preserving denoise.

use image::{GrayImage, imageops::FilterType};

/// Long side, in pixels, above which images are shrunk before cleanup.
pub const MAX_DIMENSION: u32 = 1600;

const CLAHE_TILES: u32 = 8;
const CLAHE_CLIP_LIMIT: f32 = 2.0;
const BILATERAL_DIAMETER: u32 = 9;
const BILATERAL_SIGMA_COLOR: f32 = 75.0;
const BILATERAL_SIGMA_SPACE: f32 = 75.0;

/// Downscale, equalize, denoise.
pub fn enhance(image: &GrayImage) -> GrayImage {
    let scaled = downscale(image);
    let equalized = clahe(scaled.as_ref().unwrap_or(image), CLAHE_TILES, CLAHE_CLIP_LIMIT);
    bilateral(
        &equalized,
        BILATERAL_DIAMETER,
        BILATERAL_SIGMA_COLOR,
        BILATERAL_SIGMA_SPACE,
    )
}

/// Returns a copy whose long side is at most [`MAX_DIMENSION`], or `None`
/// when the image is already small enough.
pub fn downscale(image: &GrayImage) -> Option<GrayImage> {
    let (width, height) = image.dimensions();
    let long_side = width.max(height);
    if long_side <= MAX_DIMENSION {
        return None;
    }

    let scale = MAX_DIMENSION as f64 / long_side as f64;
    let target_w = ((width as f64 * scale).round() as u32).max(1);
    let target_h = ((height as f64 * scale).round() as u32).max(1);
    Some(image::imageops::resize(
        image,
        target_w,
        target_h,
        FilterType::Triangle,
    ))
}

/// Contrast limited adaptive histogram equalization over a `tiles x tiles` grid.
///
/// Each tile gets its own clipped-histogram lookup table; pixels blend the
/// tables of the four nearest tile centers.
pub fn clahe(image: &GrayImage, tiles: u32, clip_limit: f32) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let tiles_x = tiles.clamp(1, width) as usize;
    let tiles_y = tiles.clamp(1, height) as usize;
    let bounds = |index: usize, count: usize, extent: u32| {
        let extent = extent as usize;
        (index * extent / count, (index + 1) * extent / count)
    };

    let mut luts = vec![[0u8; 256]; tiles_x * tiles_y];
    for ty in 0..tiles_y {
        let (y0, y1) = bounds(ty, tiles_y, height);
        for tx in 0..tiles_x {
            let (x0, x1) = bounds(tx, tiles_x, width);
            let mut histogram = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    histogram[image.get_pixel(x as u32, y as u32).0[0] as usize] += 1;
                }
            }
            let area = ((x1 - x0) * (y1 - y0)) as u32;
            luts[ty * tiles_x + tx] = tile_lut(&mut histogram, area, clip_limit);
        }
    }

    // Tile centers sit at (i + 0.5) * tile_size; pixel positions are mapped
    // into that grid and blended between neighbouring centers.
    let grid_pos = |pos: u32, extent: u32, count: usize| {
        let g = (pos as f32 + 0.5) * count as f32 / extent as f32 - 0.5;
        let i0 = (g.max(0.0) as usize).min(count - 1);
        let i1 = (i0 + 1).min(count - 1);
        let w = (g - i0 as f32).clamp(0.0, 1.0);
        (i0, i1, w)
    };

    GrayImage::from_fn(width, height, |x, y| {
        let value = image.get_pixel(x, y).0[0] as usize;
        let (x0, x1, wx) = grid_pos(x, width, tiles_x);
        let (y0, y1, wy) = grid_pos(y, height, tiles_y);
        let at = |tx: usize, ty: usize| luts[ty * tiles_x + tx][value] as f32;

        let top = at(x0, y0) * (1.0 - wx) + at(x1, y0) * wx;
        let bottom = at(x0, y1) * (1.0 - wx) + at(x1, y1) * wx;
        let blended = top * (1.0 - wy) + bottom * wy;
        image::Luma([blended.round().clamp(0.0, 255.0) as u8])
    })
}

fn tile_lut(histogram: &mut [u32; 256], area: u32, clip_limit: f32) -> [u8; 256] {
    let clip = ((clip_limit * area as f32 / 256.0) as u32).max(1);

    let mut excess = 0;
    for bin in histogram.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }

    let per_bin = excess / 256;
    let residual = (excess % 256) as usize;
    for bin in histogram.iter_mut() {
        *bin += per_bin;
    }
    if residual > 0 {
        let step = (256 / residual).max(1);
        for bin in histogram.iter_mut().step_by(step).take(residual) {
            *bin += 1;
        }
    }

    let mut lut = [0u8; 256];
    let mut cumulative = 0u32;
    for (value, bin) in histogram.iter().enumerate() {
        cumulative += bin;
        lut[value] = ((cumulative as f32 * 255.0 / area as f32).round()).min(255.0) as u8;
    }
    lut
}

/// Bilateral filter over a circular window of the given diameter.
pub fn bilateral(image: &GrayImage, diameter: u32, sigma_color: f32, sigma_space: f32) -> GrayImage {
    let (width, height) = image.dimensions();
    let radius = (diameter / 2) as i64;

    let color_weight: Vec<f32> = (0..256)
        .map(|diff: i32| (-((diff * diff) as f32) / (2.0 * sigma_color * sigma_color)).exp())
        .collect();

    let mut kernel = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let dist2 = (dx * dx + dy * dy) as f32;
            if dist2 <= (radius * radius) as f32 {
                kernel.push((dx, dy, (-dist2 / (2.0 * sigma_space * sigma_space)).exp()));
            }
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        let center = image.get_pixel(x, y).0[0];
        let mut weighted = 0.0f32;
        let mut total = 0.0f32;

        for &(dx, dy, space) in &kernel {
            let nx = x as i64 + dx;
            let ny = y as i64 + dy;
            if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                continue;
            }
            let neighbour = image.get_pixel(nx as u32, ny as u32).0[0];
            let weight = space * color_weight[center.abs_diff(neighbour) as usize];
            weighted += weight * neighbour as f32;
            total += weight;
        }

        image::Luma([(weighted / total).round().clamp(0.0, 255.0) as u8])
    })
}
