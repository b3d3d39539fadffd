//! Projecting a bitmap onto cell mask flags.
//!
//! The image is resampled to `size x size`. Pixel `(px, py)` (origin top-left)
//! lands on grid cell `(px + 1, size - py)` (origin bottom-left, 1-based).
//! Pixels darker than the threshold are masked.

use std::path::Path;

use anyhow::Context;
use claimgrid_store::{GridStore, StoreError};
use claimgrid_types::GridCoord;
use image::DynamicImage;
use image::imageops::FilterType;

pub fn load_bitmap(path: &Path) -> anyhow::Result<DynamicImage> {
    image::ImageReader::open(path)
        .with_context(|| format!("failed to open mask image at {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("failed to sniff mask image format at {}", path.display()))?
        .decode()
        .with_context(|| format!("failed to decode mask image at {}", path.display()))
}

/// Threshold every resampled pixel, yielding each cell's mask flag.
#[must_use]
pub fn project_mask(image: &DynamicImage, size: u32, threshold: u8) -> Vec<(GridCoord, bool)> {
    let luma = image
        .resize_exact(size, size, FilterType::Nearest)
        .to_luma8();
    let mut projected = Vec::with_capacity(luma.len());
    for (px, py, pixel) in luma.enumerate_pixels() {
        let Ok(coord) = GridCoord::new(px + 1, size - py, size) else {
            continue;
        };
        projected.push((coord, pixel.0[0] < threshold));
    }
    projected
}

/// Write masked pixels through the store. Unmasked pixels are left alone.
/// Returns the number of cells marked.
pub fn apply_mask(
    store: &GridStore,
    image: &DynamicImage,
    threshold: u8,
) -> Result<usize, StoreError> {
    let mut marked = 0;
    for (coord, masked) in project_mask(image, store.size(), threshold) {
        if masked {
            store.set_mask(coord, true)?;
            marked += 1;
        }
    }
    tracing::info!(marked, size = store.size(), "mask applied");
    Ok(marked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimgrid_store::{MemoryLedger, SqliteLedger};
    use image::{GrayImage, Luma};

    fn solid(width: u32, height: u32, value: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([value])))
    }

    fn memory_store(size: u32) -> GridStore {
        GridStore::open(size, 100, Box::new(MemoryLedger::new())).unwrap()
    }

    #[test]
    fn black_image_masks_every_cell() {
        let store = memory_store(4);
        assert_eq!(apply_mask(&store, &solid(40, 40, 0), 128).unwrap(), 16);
        assert!(store.cells().iter().all(|cell| cell.is_mask));
    }

    #[test]
    fn white_image_masks_nothing() {
        let store = memory_store(4);
        assert_eq!(apply_mask(&store, &solid(7, 3, 255), 128).unwrap(), 0);
        assert!(store.cells().iter().all(|cell| !cell.is_mask));
    }

    #[test]
    fn top_left_pixel_maps_to_top_row_of_grid() {
        let mut image = GrayImage::from_pixel(3, 3, Luma([255]));
        image.put_pixel(0, 0, Luma([0]));
        let projected = project_mask(&DynamicImage::ImageLuma8(image), 3, 128);

        let masked: Vec<_> = projected
            .iter()
            .filter(|(_, masked)| *masked)
            .map(|(coord, _)| (coord.x(), coord.y()))
            .collect();
        assert_eq!(masked, [(1, 3)]);
        assert_eq!(projected.len(), 9);
    }

    #[test]
    fn mask_does_not_touch_filled_state() {
        let store = GridStore::open(2, 4, Box::new(SqliteLedger::open_in_memory(2).unwrap()))
            .unwrap();
        let reservation = store.claim_free_cell().unwrap();
        let cell = reservation.cell_id();
        store
            .commit(reservation, &claimgrid_types::Username::new("ada").unwrap())
            .unwrap();

        apply_mask(&store, &solid(2, 2, 0), 128).unwrap();
        let after = store.cell(cell).unwrap();
        assert!(after.filled);
        assert!(after.is_mask);
        assert!(store.audit().unwrap().is_consistent());
    }

    #[test]
    fn load_bitmap_reads_png_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.png");
        GrayImage::from_pixel(2, 2, Luma([0])).save(&path).unwrap();

        let image = load_bitmap(&path).unwrap();
        assert_eq!((image.width(), image.height()), (2, 2));
    }

    #[test]
    fn load_bitmap_reports_missing_file() {
        let err = load_bitmap(Path::new("/nonexistent/mask.png")).unwrap_err();
        assert!(err.to_string().contains("failed to open mask image"));
    }
}
