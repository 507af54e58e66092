//! Image frequency-domain watermarking (8x8 luminance DCT + QIM).
//!
//! The framed payload rides on mid-band coefficients of an 8x8 block DCT
//! over the luminance plane. Each selected coefficient is snapped to an
//! even or odd multiple of a fixed step, one bit per coefficient, six
//! coefficients per block. Block visit order is shuffled by a stream
//! cipher seeded from an integer password, so the payload is spatially
//! scattered; embed and extract must agree on the password (default 1).
//!
//! Luminance changes are written back by adding the per-pixel delta to all
//! three channels. The BT.601 weights sum to one, so the extractor's
//! recomputed luminance sees exactly the embedded delta, and chroma is
//! untouched (the equal-channel shift cancels in Cb/Cr), which keeps the
//! mark safe from chroma subsampling.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rustdct::DctPlanner;

use crate::dct::OrthoDct;
use crate::error::WatermarkError;
use crate::framing;

/// Block edge length for the 2-D DCT.
const BLOCK: usize = 8;

/// Mid-band coefficient positions (row, column) carrying one bit each.
/// Low enough to survive JPEG quantization, high enough to stay invisible.
const COEF_POSITIONS: [(usize, usize); 6] = [(0, 2), (1, 1), (2, 0), (1, 2), (2, 1), (2, 2)];

/// Fixed quantization step in luminance units.
const STEP: f64 = 16.0;

/// JPEG re-encode quality for watermarked output.
const JPEG_QUALITY: u8 = 95;

/// Extensions this carrier accepts.
const SUPPORTED_EXTENSIONS: [&str; 4] = [".jpg", ".jpeg", ".png", ".bmp"];

/// Configuration for the frequency-domain image carrier.
///
/// ```rust
/// use tidemark::embedder::frequency::FrequencyConfig;
///
/// let config = FrequencyConfig::default().with_password(42);
/// assert_eq!(config.password(), 42);
/// ```
#[derive(Debug, Clone)]
pub struct FrequencyConfig {
    password: u64,
}

impl FrequencyConfig {
    /// Set the integer password seeding the block sampling order.
    pub fn with_password(mut self, password: u64) -> Self {
        self.password = password;
        self
    }

    /// The configured password.
    pub fn password(&self) -> u64 {
        self.password
    }
}

impl Default for FrequencyConfig {
    fn default() -> Self {
        Self { password: 1 }
    }
}

/// Stateless frequency-domain image watermarker.
pub struct FrequencyEmbedder {
    config: FrequencyConfig,
}

impl FrequencyEmbedder {
    /// Create an embedder with the given configuration.
    pub fn new(config: FrequencyConfig) -> Self {
        Self { config }
    }

    /// Whether this carrier accepts the given file extension.
    pub fn supports(&self, extension: &str) -> bool {
        SUPPORTED_EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str())
    }

    /// Embed `payload` into the image, returning bytes in the original
    /// container format (PNG and BMP lossless, JPEG at quality 95).
    ///
    /// # Errors
    ///
    /// - [`WatermarkError::FormatUnsupported`] when the bytes are not PNG,
    ///   JPEG or BMP
    /// - [`WatermarkError::InsufficientCapacity`] when the block grid
    ///   cannot hold the framed payload
    pub fn embed(&self, bytes: &[u8], payload: &[u8]) -> Result<Vec<u8>, WatermarkError> {
        let format = sniff_format(bytes)?;
        let mut rgb = image::load_from_memory(bytes)?.to_rgb8();

        let bits = framing::build_frame(payload)?;
        let grid = BlockGrid::of(&rgb);
        if bits.len() > grid.capacity() {
            return Err(WatermarkError::InsufficientCapacity {
                needed: bits.len(),
                available: grid.capacity(),
            });
        }

        let mut luma = luminance_plane(&rgb);
        let order = block_order(grid.count(), self.config.password);

        let mut planner = DctPlanner::new();
        let dct = OrthoDct::new(&mut planner, BLOCK);

        let mut bit_idx = 0;
        for &block_idx in &order {
            if bit_idx >= bits.len() {
                break;
            }
            let (bx, by) = grid.position(block_idx);
            let mut block = grid.read_block(&luma, bx, by);
            let original = block;

            forward_2d(&dct, &mut block);
            for &(row, col) in &COEF_POSITIONS {
                if bit_idx >= bits.len() {
                    break;
                }
                let coef = &mut block[row * BLOCK + col];
                *coef = snap_to_lattice(*coef, bits[bit_idx]);
                bit_idx += 1;
            }
            inverse_2d(&dct, &mut block);

            grid.write_block_delta(&mut rgb, &mut luma, bx, by, &original, &block);
        }

        encode_image(&rgb, format)
    }

    /// Extract a framed payload from the image.
    ///
    /// # Errors
    ///
    /// - [`WatermarkError::FormatUnsupported`] when the bytes are not PNG,
    ///   JPEG or BMP
    /// - [`WatermarkError::NoWatermarkFound`] when the decoded bit stream
    ///   contains no checksum-verified frame
    pub fn extract(&self, bytes: &[u8]) -> Result<Vec<u8>, WatermarkError> {
        sniff_format(bytes)?;
        let rgb = image::load_from_memory(bytes)?.to_rgb8();

        let luma = luminance_plane(&rgb);
        let grid = BlockGrid::of(&rgb);
        let order = block_order(grid.count(), self.config.password);

        let mut planner = DctPlanner::new();
        let dct = OrthoDct::new(&mut planner, BLOCK);

        let mut bits = Vec::with_capacity(grid.capacity());
        for &block_idx in &order {
            let (bx, by) = grid.position(block_idx);
            let mut block = grid.read_block(&luma, bx, by);
            forward_2d(&dct, &mut block);
            for &(row, col) in &COEF_POSITIONS {
                bits.push(read_lattice_bit(block[row * BLOCK + col]));
            }
        }

        framing::recover_frame(&bits).ok_or_else(|| {
            WatermarkError::NoWatermarkFound(
                "no verified frame in frequency-domain coefficients".into(),
            )
        })
    }
}

/// The image's 8x8 block layout. Partial edge blocks are ignored.
struct BlockGrid {
    blocks_x: usize,
    blocks_y: usize,
    width: usize,
}

impl BlockGrid {
    fn of(rgb: &RgbImage) -> Self {
        Self {
            blocks_x: rgb.width() as usize / BLOCK,
            blocks_y: rgb.height() as usize / BLOCK,
            width: rgb.width() as usize,
        }
    }

    fn count(&self) -> usize {
        self.blocks_x * self.blocks_y
    }

    fn capacity(&self) -> usize {
        self.count() * COEF_POSITIONS.len()
    }

    fn position(&self, index: usize) -> (usize, usize) {
        (index % self.blocks_x, index / self.blocks_x)
    }

    fn read_block(&self, luma: &[f64], bx: usize, by: usize) -> [f64; BLOCK * BLOCK] {
        let mut block = [0.0; BLOCK * BLOCK];
        for row in 0..BLOCK {
            let src = (by * BLOCK + row) * self.width + bx * BLOCK;
            block[row * BLOCK..(row + 1) * BLOCK].copy_from_slice(&luma[src..src + BLOCK]);
        }
        block
    }

    /// Apply the luminance delta of a modified block to the image, shifting
    /// all three channels equally, and keep the luma plane in sync.
    fn write_block_delta(
        &self,
        rgb: &mut RgbImage,
        luma: &mut [f64],
        bx: usize,
        by: usize,
        original: &[f64; BLOCK * BLOCK],
        modified: &[f64; BLOCK * BLOCK],
    ) {
        for row in 0..BLOCK {
            for col in 0..BLOCK {
                let delta = modified[row * BLOCK + col] - original[row * BLOCK + col];
                let x = (bx * BLOCK + col) as u32;
                let y = (by * BLOCK + row) as u32;
                let pixel = rgb.get_pixel_mut(x, y);
                for channel in pixel.0.iter_mut() {
                    *channel = (f64::from(*channel) + delta).round().clamp(0.0, 255.0) as u8;
                }
                let p = pixel.0;
                luma[y as usize * self.width + x as usize] =
                    0.299 * f64::from(p[0]) + 0.587 * f64::from(p[1]) + 0.114 * f64::from(p[2]);
            }
        }
    }
}

/// BT.601 luminance of every pixel as a flat `f64` plane.
fn luminance_plane(rgb: &RgbImage) -> Vec<f64> {
    rgb.pixels()
        .map(|p| 0.299 * f64::from(p.0[0]) + 0.587 * f64::from(p.0[1]) + 0.114 * f64::from(p.0[2]))
        .collect()
}

/// Pseudorandom block visit order derived from the integer password.
fn block_order(count: usize, password: u64) -> Vec<usize> {
    let mut seed = [0u8; 32];
    seed[..8].copy_from_slice(&password.to_le_bytes());
    let mut rng = rand_chacha::ChaCha20Rng::from_seed(seed);

    let mut order: Vec<usize> = (0..count).collect();
    order.shuffle(&mut rng);
    order
}

/// Snap a coefficient to the even (bit 0) or odd (bit 1) lattice point
/// nearest to its current value.
fn snap_to_lattice(coef: f64, bit: u8) -> f64 {
    let bit = f64::from(bit);
    2.0 * STEP * ((coef - bit * STEP) / (2.0 * STEP)).round() + bit * STEP
}

/// Read the lattice parity of a coefficient back as a bit.
fn read_lattice_bit(coef: f64) -> u8 {
    ((coef / STEP).round() as i64).rem_euclid(2) as u8
}

/// Separable 2-D DCT: rows, then columns.
fn forward_2d(dct: &OrthoDct, block: &mut [f64; BLOCK * BLOCK]) {
    for row in block.chunks_mut(BLOCK) {
        dct.forward(row);
    }
    transpose(block);
    for row in block.chunks_mut(BLOCK) {
        dct.forward(row);
    }
    transpose(block);
}

/// Separable 2-D inverse DCT.
fn inverse_2d(dct: &OrthoDct, block: &mut [f64; BLOCK * BLOCK]) {
    transpose(block);
    for row in block.chunks_mut(BLOCK) {
        dct.inverse(row);
    }
    transpose(block);
    for row in block.chunks_mut(BLOCK) {
        dct.inverse(row);
    }
}

fn transpose(block: &mut [f64; BLOCK * BLOCK]) {
    for row in 0..BLOCK {
        for col in (row + 1)..BLOCK {
            block.swap(row * BLOCK + col, col * BLOCK + row);
        }
    }
}

/// Identify the container and reject anything this carrier cannot re-emit.
fn sniff_format(bytes: &[u8]) -> Result<ImageFormat, WatermarkError> {
    match image::guess_format(bytes) {
        Ok(f @ (ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Bmp)) => Ok(f),
        Ok(other) => Err(WatermarkError::FormatUnsupported(format!(
            "frequency carrier cannot re-encode {other:?}"
        ))),
        Err(_) => Err(WatermarkError::FormatUnsupported(
            "bytes are not a recognized raster image".into(),
        )),
    }
}

/// Re-encode the watermarked raster in its original container.
fn encode_image(rgb: &RgbImage, format: ImageFormat) -> Result<Vec<u8>, WatermarkError> {
    let mut out = Cursor::new(Vec::new());
    match format {
        ImageFormat::Jpeg => {
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))?;
        }
        other => {
            rgb.write_to(&mut out, other)?;
        }
    }
    Ok(out.into_inner())
}
