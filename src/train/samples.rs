use std::path::Path;

use image::{Rgb, RgbImage};

use crate::error::{GanError, Result};
use crate::math::tensor::Tensor;
use crate::train::data::postprocess;

/// Tiles `images` (NCHW in `[-1, 1]`, 1 or 3 channels) into a grid of
/// `rows` rows. Row `r` holds images `r * cols .. (r + 1) * cols`.
pub fn grid_image(images: &Tensor, rows: usize) -> Result<RgbImage> {
    let (n, channels, height, width) = images.dims4();
    if rows == 0 || n % rows != 0 {
        return Err(GanError::ShapeMismatch(format!("{} images do not fill {} grid rows", n, rows)));
    }
    if channels != 1 && channels != 3 {
        return Err(GanError::ShapeMismatch(format!("cannot render {}-channel images", channels)));
    }
    let cols = n / rows;
    let pixels = postprocess(images);
    let mut grid = RgbImage::new((cols * width) as u32, (rows * height) as u32);
    for i in 0..n {
        let (gy, gx) = (i / cols * height, i % cols * width);
        for y in 0..height {
            for x in 0..width {
                let base = ((i * height + y) * width + x) * channels;
                let rgb = if channels == 3 {
                    [pixels[base], pixels[base + 1], pixels[base + 2]]
                } else {
                    [pixels[base]; 3]
                };
                grid.put_pixel((gx + x) as u32, (gy + y) as u32, Rgb(rgb));
            }
        }
    }
    Ok(grid)
}

/// Writes the grid as a PNG file.
pub fn write_grid<P: AsRef<Path>>(images: &Tensor, rows: usize, path: P) -> Result<()> {
    grid_image(images, rows)?.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    #[test]
    fn test_grid_layout() {
        // two rows of three 2x4 images; image i is filled with a distinct grey
        let mut images = Tensor::zeros(&[6, 1, 2, 4]);
        for i in 0..6 {
            for v in &mut images.data[i * 8..(i + 1) * 8] {
                *v = -1.0 + 0.2 * i as f64;
            }
        }
        let grid = grid_image(&images, 2).unwrap();
        assert_eq!(grid.dimensions(), (12, 4));
        assert_eq!(grid.get_pixel(0, 0), grid.get_pixel(3, 1));
        assert_ne!(grid.get_pixel(0, 0), grid.get_pixel(4, 0));
        assert_eq!(grid.get_pixel(11, 3)[0], postprocess(&images)[47]);
    }

    #[test]
    fn test_uneven_rows_rejected() {
        let images = Tensor::zeros(&[5, 3, 2, 2]);
        assert!(grid_image(&images, 2).is_err());
    }

    #[test]
    fn test_write_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.png");
        write_grid(&Tensor::zeros(&[4, 3, 2, 2]), 2, &path).unwrap();
        let back = image::open(&path).unwrap();
        assert_eq!(back.dimensions(), (4, 4));
    }
}
