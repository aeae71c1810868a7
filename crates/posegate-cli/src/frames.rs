use std::path::Path;

use anyhow::{Context, Result};
use posegate_core::Frame;

/// Decode an image file and convert it to an 8-bit luminance frame.
pub fn load_luma_frame(path: &Path) -> Result<Frame> {
    let img = image::open(path)
        .with_context(|| format!("failed to decode image {}", path.display()))?
        .to_luma8();
    let (width, height) = img.dimensions();
    Ok(Frame::new(img.into_raw(), width, height))
}

/// A mid-gray frame with vertical stripes: passes every default quality
/// threshold (mean 130, standard deviation 40).
pub fn synthetic_frame(width: u32, height: u32) -> Frame {
    let data = (0..height)
        .flat_map(|_| (0..width).map(|x| if (x / 4) % 2 == 0 { 90 } else { 170 }))
        .collect();
    Frame::new(data, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use posegate_core::QualityScorer;

    #[test]
    fn test_synthetic_frame_passes_quality() {
        let frame = synthetic_frame(64, 48);
        frame.check().unwrap();
        let mut scorer = QualityScorer::default();
        let r = scorer.score_frame(&frame);
        assert_eq!(r.issue, None);
        assert!((r.brightness_score - 130.0).abs() < 1e-3);
    }

    #[test]
    fn test_load_luma_frame_round_trips_png() {
        let dir = std::env::temp_dir().join(format!(
            "posegate-frames-test-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gray.png");
        image::GrayImage::from_fn(8, 4, |x, _| image::Luma([(x * 30) as u8]))
            .save(&path)
            .unwrap();

        let frame = load_luma_frame(&path).unwrap();
        assert_eq!((frame.width, frame.height), (8, 4));
        assert_eq!(frame.data[..8], [0, 30, 60, 90, 120, 150, 180, 210]);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_luma_frame_reports_missing_file() {
        assert!(load_luma_frame(Path::new("/nonexistent/frame.png")).is_err());
    }
}
