//! Visual regression for image responses
//!
//! An image body is decoded, re-encoded as PNG and compared against
//! `{baseline_dir}/{test_id}.png`. The first time a test id is seen the
//! decoded image becomes the baseline. The actual image is always written to
//! `{actual_dir}/{test_id}.png`; a diff visualization goes to
//! `{diff_dir}/{test_id}.png` when the comparison fails.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{ImageOutputFormat, RgbaImage};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::ImageConfig;

/// Numbers behind one baseline comparison
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageComparison {
    /// Fraction of pixels within tolerance
    pub correctness: f64,

    pub diff_pixels: u64,
    pub total_pixels: u64,

    pub baseline_path: PathBuf,
    pub actual_path: PathBuf,

    /// Only written when the comparison failed
    pub diff_path: Option<PathBuf>,

    pub baseline_hash: String,
    pub actual_hash: String,
}

/// Successful outcomes of a comparison
#[derive(Debug, Clone)]
pub enum ImageVerdict {
    /// No baseline existed; the actual image was stored as the new one
    BaselineCreated { path: PathBuf },

    Matched(ImageComparison),
}

#[derive(Error, Debug)]
pub enum VisualError {
    #[error("Image mismatch: correctness {:.4} is not above {pass_ratio}", .comparison.correctness)]
    Mismatch {
        comparison: ImageComparison,
        pass_ratio: f64,
    },

    #[error("Image dimensions differ: baseline {baseline:?}, actual {actual:?}")]
    DimensionMismatch {
        baseline: (u32, u32),
        actual: (u32, u32),
        baseline_path: PathBuf,
        actual_path: PathBuf,
    },

    #[error("Could not decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Compares image responses against stored baselines
#[derive(Debug)]
pub struct VisualComparator {
    config: ImageConfig,

    /// Folder bootstrap, done once per run on the first image
    prepared: OnceCell<()>,
}

impl VisualComparator {
    pub fn new(config: ImageConfig) -> Self {
        Self {
            config,
            prepared: OnceCell::new(),
        }
    }

    pub fn baseline_path(&self, test_id: &str) -> PathBuf {
        self.config.baseline_dir.join(format!("{}.png", test_id))
    }

    pub fn actual_path(&self, test_id: &str) -> PathBuf {
        self.config.actual_dir.join(format!("{}.png", test_id))
    }

    pub fn diff_path(&self, test_id: &str) -> PathBuf {
        self.config.diff_dir.join(format!("{}.png", test_id))
    }

    /// Create the image folders and empty the actual and diff folders.
    /// Runs at most once; later calls return immediately.
    pub async fn prepare(&self) -> Result<(), VisualError> {
        self.prepared
            .get_or_try_init(|| async {
                let config = self.config.clone();
                tokio::task::spawn_blocking(move || prepare_folders(&config)).await?
            })
            .await?;
        Ok(())
    }

    /// Compare an image body against the baseline stored for `test_id`
    pub async fn compare(&self, test_id: &str, body: Vec<u8>) -> Result<ImageVerdict, VisualError> {
        self.prepare().await?;

        let job = CompareJob {
            baseline_path: self.baseline_path(test_id),
            actual_path: self.actual_path(test_id),
            diff_path: self.diff_path(test_id),
            threshold: self.config.pixel_threshold,
            pass_ratio: self.config.pass_ratio,
            body,
        };
        tokio::task::spawn_blocking(move || job.run()).await?
    }
}

fn prepare_folders(config: &ImageConfig) -> Result<(), VisualError> {
    for dir in [&config.baseline_dir, &config.actual_dir, &config.diff_dir] {
        std::fs::create_dir_all(dir)?;
    }
    clear_files(&config.actual_dir)?;
    clear_files(&config.diff_dir)?;
    Ok(())
}

/// Remove plain files directly inside `dir`, leaving subdirectories alone
fn clear_files(dir: &Path) -> Result<(), VisualError> {
    let mut removed = 0usize;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    info!("Cleared {} files in {}", removed, dir.display());
    Ok(())
}

/// Everything the blocking half of a comparison needs
struct CompareJob {
    baseline_path: PathBuf,
    actual_path: PathBuf,
    diff_path: PathBuf,
    threshold: f64,
    pass_ratio: f64,
    body: Vec<u8>,
}

impl CompareJob {
    fn run(self) -> Result<ImageVerdict, VisualError> {
        let actual = image::load_from_memory(&self.body)?.to_rgba8();
        let actual_png = encode_png(&actual)?;

        let verdict = self.judge(&actual, &actual_png);

        std::fs::write(&self.actual_path, &actual_png)?;
        debug!("Actual image saved at {}", self.actual_path.display());

        verdict
    }

    fn judge(&self, actual: &RgbaImage, actual_png: &[u8]) -> Result<ImageVerdict, VisualError> {
        if !self.baseline_path.exists() {
            std::fs::write(&self.baseline_path, actual_png)?;
            info!("Base image saved at {}", self.baseline_path.display());
            return Ok(ImageVerdict::BaselineCreated {
                path: self.baseline_path.clone(),
            });
        }

        let baseline_bytes = std::fs::read(&self.baseline_path)?;
        let baseline = image::load_from_memory(&baseline_bytes)?.to_rgba8();

        if baseline.dimensions() != actual.dimensions() {
            warn!(
                "Image dimensions differ: baseline {:?} vs actual {:?}",
                baseline.dimensions(),
                actual.dimensions()
            );
            return Err(VisualError::DimensionMismatch {
                baseline: baseline.dimensions(),
                actual: actual.dimensions(),
                baseline_path: self.baseline_path.clone(),
                actual_path: self.actual_path.clone(),
            });
        }

        let baseline_hash = sha256_hex(&baseline_bytes);
        let actual_hash = sha256_hex(actual_png);

        let (width, height) = baseline.dimensions();
        let total_pixels = u64::from(width) * u64::from(height);
        let mut diff = RgbaImage::new(width, height);

        let diff_pixels = if baseline_hash == actual_hash {
            debug!("Images match exactly (same hash)");
            0
        } else {
            pixelmatch(
                baseline.as_raw(),
                actual.as_raw(),
                &mut diff,
                width,
                height,
                self.threshold,
            )
        };

        let correctness = if total_pixels == 0 {
            1.0
        } else {
            (total_pixels - diff_pixels) as f64 / total_pixels as f64
        };

        let mut comparison = ImageComparison {
            correctness,
            diff_pixels,
            total_pixels,
            baseline_path: self.baseline_path.clone(),
            actual_path: self.actual_path.clone(),
            diff_path: None,
            baseline_hash,
            actual_hash,
        };

        if correctness > self.pass_ratio {
            return Ok(ImageVerdict::Matched(comparison));
        }

        diff.save(&self.diff_path)?;
        warn!(
            "Image mismatch: {} of {} pixels differ, diff saved at {}",
            diff_pixels,
            total_pixels,
            self.diff_path.display()
        );
        comparison.diff_path = Some(self.diff_path.clone());
        Err(VisualError::Mismatch {
            comparison,
            pass_ratio: self.pass_ratio,
        })
    }
}

fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, VisualError> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)?;
    Ok(bytes)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// Pixel diff in YIQ space with anti-aliasing detection. Anti-aliased pixels
// are drawn yellow in the output and not counted.

const DIFF_COLOR: [u8; 3] = [255, 0, 0];
const AA_COLOR: [u8; 3] = [255, 255, 0];
const GRAY_ALPHA: f64 = 0.1;

/// Largest YIQ delta between two colours
const MAX_YIQ_DELTA: f64 = 35215.0;

fn pixelmatch(
    img1: &[u8],
    img2: &[u8],
    output: &mut RgbaImage,
    width: u32,
    height: u32,
    threshold: f64,
) -> u64 {
    let max_delta = MAX_YIQ_DELTA * threshold * threshold;
    let mut diff = 0u64;

    for y in 0..height {
        for x in 0..width {
            let pos = ((y * width + x) * 4) as usize;
            let delta = color_delta(img1, img2, pos, pos, false);

            if delta.abs() > max_delta {
                if antialiased(img1, x, y, width, height, img2)
                    || antialiased(img2, x, y, width, height, img1)
                {
                    draw_pixel(output, x, y, AA_COLOR);
                } else {
                    draw_pixel(output, x, y, DIFF_COLOR);
                    diff += 1;
                }
            } else {
                draw_gray_pixel(img1, pos, output, x, y);
            }
        }
    }

    diff
}

fn rgb2y(r: f64, g: f64, b: f64) -> f64 {
    r * 0.29889531 + g * 0.58662247 + b * 0.11448223
}

fn rgb2i(r: f64, g: f64, b: f64) -> f64 {
    r * 0.59597799 - g * 0.27417610 - b * 0.32180189
}

fn rgb2q(r: f64, g: f64, b: f64) -> f64 {
    r * 0.21147017 - g * 0.52261711 + b * 0.31114694
}

/// Blend a channel with white by `alpha`
fn blend(c: f64, alpha: f64) -> f64 {
    255.0 + (c - 255.0) * alpha
}

fn channels(img: &[u8], pos: usize) -> (f64, f64, f64) {
    let a = f64::from(img[pos + 3]);
    let (r, g, b) = (
        f64::from(img[pos]),
        f64::from(img[pos + 1]),
        f64::from(img[pos + 2]),
    );
    if a < 255.0 {
        let a = a / 255.0;
        (blend(r, a), blend(g, a), blend(b, a))
    } else {
        (r, g, b)
    }
}

/// Perceptual distance between two pixels, signed by which one is brighter
fn color_delta(img1: &[u8], img2: &[u8], k: usize, m: usize, y_only: bool) -> f64 {
    if img1[k..k + 4] == img2[m..m + 4] {
        return 0.0;
    }

    let (r1, g1, b1) = channels(img1, k);
    let (r2, g2, b2) = channels(img2, m);

    let y1 = rgb2y(r1, g1, b1);
    let y2 = rgb2y(r2, g2, b2);
    let y = y1 - y2;

    if y_only {
        return y;
    }

    let i = rgb2i(r1, g1, b1) - rgb2i(r2, g2, b2);
    let q = rgb2q(r1, g1, b1) - rgb2q(r2, g2, b2);
    let delta = 0.5053 * y * y + 0.299 * i * i + 0.1957 * q * q;

    if y1 > y2 {
        -delta
    } else {
        delta
    }
}

/// 3x3 neighbourhood of a pixel, clamped to the image
fn neighbourhood(x: u32, y: u32, width: u32, height: u32) -> (u32, u32, u32, u32) {
    (
        x.saturating_sub(1),
        y.saturating_sub(1),
        (x + 1).min(width - 1),
        (y + 1).min(height - 1),
    )
}

fn antialiased(img: &[u8], x1: u32, y1: u32, width: u32, height: u32, img2: &[u8]) -> bool {
    let (x0, y0, x2, y2) = neighbourhood(x1, y1, width, height);
    let pos = ((y1 * width + x1) * 4) as usize;

    let mut zeroes = u32::from(x1 == x0 || x1 == x2 || y1 == y0 || y1 == y2);
    let mut min = 0.0;
    let mut max = 0.0;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (0, 0, 0, 0);

    for x in x0..=x2 {
        for y in y0..=y2 {
            if x == x1 && y == y1 {
                continue;
            }

            let delta = color_delta(img, img, pos, ((y * width + x) * 4) as usize, true);

            if delta == 0.0 {
                zeroes += 1;
                if zeroes > 2 {
                    return false;
                }
            } else if delta < min {
                min = delta;
                min_x = x;
                min_y = y;
            } else if delta > max {
                max = delta;
                max_x = x;
                max_y = y;
            }
        }
    }

    if min == 0.0 || max == 0.0 {
        return false;
    }

    (has_many_siblings(img, min_x, min_y, width, height)
        && has_many_siblings(img2, min_x, min_y, width, height))
        || (has_many_siblings(img, max_x, max_y, width, height)
            && has_many_siblings(img2, max_x, max_y, width, height))
}

/// Whether at least three neighbours share the exact colour of the pixel
fn has_many_siblings(img: &[u8], x1: u32, y1: u32, width: u32, height: u32) -> bool {
    let (x0, y0, x2, y2) = neighbourhood(x1, y1, width, height);
    let pos = ((y1 * width + x1) * 4) as usize;

    let mut zeroes = u32::from(x1 == x0 || x1 == x2 || y1 == y0 || y1 == y2);

    for x in x0..=x2 {
        for y in y0..=y2 {
            if x == x1 && y == y1 {
                continue;
            }
            let pos2 = ((y * width + x) * 4) as usize;
            if img[pos..pos + 4] == img[pos2..pos2 + 4] {
                zeroes += 1;
            }
            if zeroes > 2 {
                return true;
            }
        }
    }

    false
}

fn draw_pixel(output: &mut RgbaImage, x: u32, y: u32, [r, g, b]: [u8; 3]) {
    output.put_pixel(x, y, image::Rgba([r, g, b, 255]));
}

fn draw_gray_pixel(img: &[u8], pos: usize, output: &mut RgbaImage, x: u32, y: u32) {
    let luma = rgb2y(
        f64::from(img[pos]),
        f64::from(img[pos + 1]),
        f64::from(img[pos + 2]),
    );
    let value = blend(luma, GRAY_ALPHA * f64::from(img[pos + 3]) / 255.0)
        .round()
        .clamp(0.0, 255.0) as u8;
    draw_pixel(output, x, y, [value, value, value]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    fn png(width: u32, height: u32, marks: &[(u32, u32)]) -> Vec<u8> {
        let mut img = RgbaImage::from_pixel(width, height, WHITE);
        for &(x, y) in marks {
            img.put_pixel(x, y, RED);
        }
        encode_png(&img).unwrap()
    }

    fn comparator(root: &Path) -> VisualComparator {
        VisualComparator::new(ImageConfig {
            baseline_dir: root.join("base"),
            actual_dir: root.join("actual"),
            diff_dir: root.join("diff"),
            ..Default::default()
        })
    }

    #[test]
    fn test_pixelmatch_identical() {
        let img = RgbaImage::from_pixel(4, 4, WHITE);
        let mut out = RgbaImage::new(4, 4);
        assert_eq!(pixelmatch(img.as_raw(), img.as_raw(), &mut out, 4, 4, 0.1), 0);
    }

    #[test]
    fn test_pixelmatch_counts_isolated_pixel() {
        let a = RgbaImage::from_pixel(10, 10, WHITE);
        let mut b = a.clone();
        b.put_pixel(5, 5, RED);
        b.put_pixel(1, 8, RED);

        let mut out = RgbaImage::new(10, 10);
        assert_eq!(pixelmatch(a.as_raw(), b.as_raw(), &mut out, 10, 10, 0.1), 2);
        assert_eq!(out.get_pixel(5, 5), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_pixelmatch_tolerates_small_shift() {
        let a = RgbaImage::from_pixel(3, 3, Rgba([200, 200, 200, 255]));
        let mut b = a.clone();
        b.put_pixel(1, 1, Rgba([204, 202, 200, 255]));
        let mut out = RgbaImage::new(3, 3);
        assert_eq!(pixelmatch(a.as_raw(), b.as_raw(), &mut out, 3, 3, 0.1), 0);
    }

    #[tokio::test]
    async fn test_missing_baseline_is_bootstrapped() {
        let dir = tempfile::tempdir().unwrap();
        let comparator = comparator(dir.path());

        let verdict = comparator.compare("images-logo", png(8, 8, &[])).await.unwrap();
        let ImageVerdict::BaselineCreated { path } = verdict else {
            panic!("expected bootstrap, got {:?}", verdict);
        };
        assert_eq!(path, dir.path().join("base/images-logo.png"));
        assert!(path.exists());
        assert!(comparator.actual_path("images-logo").exists());

        // Second pass compares against the stored baseline
        let verdict = comparator.compare("images-logo", png(8, 8, &[])).await.unwrap();
        match verdict {
            ImageVerdict::Matched(comparison) => {
                assert_eq!(comparison.correctness, 1.0);
                assert_eq!(comparison.baseline_hash, comparison.actual_hash);
                assert!(comparison.diff_path.is_none());
            }
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exactly_ninety_nine_percent_fails() {
        let dir = tempfile::tempdir().unwrap();
        let comparator = comparator(dir.path());
        comparator.prepare().await.unwrap();
        std::fs::write(comparator.baseline_path("chart"), png(10, 10, &[])).unwrap();

        let err = comparator
            .compare("chart", png(10, 10, &[(5, 5)]))
            .await
            .unwrap_err();
        match err {
            VisualError::Mismatch { comparison, .. } => {
                assert_eq!(comparison.diff_pixels, 1);
                assert_eq!(comparison.total_pixels, 100);
                assert!((comparison.correctness - 0.99).abs() < 1e-12);
                let diff_path = comparison.diff_path.unwrap();
                assert_eq!(diff_path, dir.path().join("diff/chart.png"));
                assert!(diff_path.exists());
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
        assert!(comparator.actual_path("chart").exists());
    }

    #[tokio::test]
    async fn test_within_ratio_passes() {
        let dir = tempfile::tempdir().unwrap();
        let comparator = comparator(dir.path());
        comparator.prepare().await.unwrap();
        std::fs::write(comparator.baseline_path("chart"), png(20, 10, &[])).unwrap();

        let verdict = comparator.compare("chart", png(20, 10, &[(5, 5)])).await.unwrap();
        let ImageVerdict::Matched(comparison) = verdict else {
            panic!("expected match");
        };
        assert_eq!(comparison.diff_pixels, 1);
        assert!(comparison.correctness > 0.99);
        assert!(!comparator.diff_path("chart").exists());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_hard_failure() {
        let dir = tempfile::tempdir().unwrap();
        let comparator = comparator(dir.path());
        comparator.prepare().await.unwrap();
        std::fs::write(comparator.baseline_path("banner"), png(10, 10, &[])).unwrap();

        let err = comparator.compare("banner", png(12, 10, &[])).await.unwrap_err();
        assert!(matches!(
            err,
            VisualError::DimensionMismatch {
                baseline: (10, 10),
                actual: (12, 10),
                ..
            }
        ));
        assert!(comparator.actual_path("banner").exists());
    }

    #[tokio::test]
    async fn test_prepare_clears_stale_artifacts_once() {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["base", "actual", "diff"] {
            std::fs::create_dir_all(dir.path().join(sub)).unwrap();
            std::fs::write(dir.path().join(sub).join("old.png"), b"stale").unwrap();
        }
        let comparator = comparator(dir.path());
        comparator.prepare().await.unwrap();

        assert!(dir.path().join("base/old.png").exists());
        assert!(!dir.path().join("actual/old.png").exists());
        assert!(!dir.path().join("diff/old.png").exists());

        std::fs::write(dir.path().join("actual/new.png"), b"kept").unwrap();
        comparator.prepare().await.unwrap();
        assert!(dir.path().join("actual/new.png").exists());
    }

    #[tokio::test]
    async fn test_undecodable_body() {
        let dir = tempfile::tempdir().unwrap();
        let comparator = comparator(dir.path());
        let err = comparator.compare("broken", b"not an image".to_vec()).await.unwrap_err();
        assert!(matches!(err, VisualError::Decode(_)));
    }
}
