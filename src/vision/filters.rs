use anyhow::{Context, Result};
use image::{imageops, DynamicImage, GrayImage, RgbImage};
use ndarray::{s, Array2};

/// Trait for per-frame image operations
/// Allows swapping the processing applied by the vision bridge
pub trait FrameFilter {
    /// Produce the processed frame; output has the input's dimensions
    fn apply(&mut self, frame: &RgbImage) -> Result<RgbImage>;

    fn name(&self) -> &'static str;
}

/// Selectable filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FilterKind {
    Passthrough,
    Edges,
    Erode,
    Dilate,
    Open,
    Close,
    Threshold,
    Denoise,
}

/// Create the filter for `kind` with its default parameters
pub fn create_filter(kind: FilterKind) -> Box<dyn FrameFilter> {
    match kind {
        FilterKind::Passthrough => Box::new(Passthrough),
        FilterKind::Edges => Box::new(Edges),
        FilterKind::Erode => Box::new(Morphology::new(MorphOp::Erode)),
        FilterKind::Dilate => Box::new(Morphology::new(MorphOp::Dilate)),
        FilterKind::Open => Box::new(Morphology::new(MorphOp::Open)),
        FilterKind::Close => Box::new(Morphology::new(MorphOp::Close)),
        FilterKind::Threshold => Box::new(AdaptiveThreshold::default()),
        FilterKind::Denoise => Box::new(Denoise { sigma: 1.5 }),
    }
}

pub struct Passthrough;

impl FrameFilter for Passthrough {
    fn apply(&mut self, frame: &RgbImage) -> Result<RgbImage> {
        Ok(frame.clone())
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}

/// Laplacian edge magnitude on the luma channel
pub struct Edges;

impl FrameFilter for Edges {
    fn apply(&mut self, frame: &RgbImage) -> Result<RgbImage> {
        let gray = imageops::grayscale(frame);
        let kernel = [-1.0, -1.0, -1.0, -1.0, 8.0, -1.0, -1.0, -1.0, -1.0];
        let edges: GrayImage = imageops::filter3x3(&gray, &kernel);
        Ok(DynamicImage::ImageLuma8(edges).to_rgb8())
    }

    fn name(&self) -> &'static str {
        "edges"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MorphOp {
    Erode,
    Dilate,
    /// Erode then dilate
    Open,
    /// Dilate then erode
    Close,
}

/// Grayscale morphology with a square structuring element
pub struct Morphology {
    op: MorphOp,
    radius: usize,
}

impl Morphology {
    pub fn new(op: MorphOp) -> Self {
        Self { op, radius: 1 }
    }
}

impl FrameFilter for Morphology {
    fn apply(&mut self, frame: &RgbImage) -> Result<RgbImage> {
        let plane = luma_plane(frame)?;
        let r = self.radius;

        let result = match self.op {
            MorphOp::Erode => erode(&plane, r),
            MorphOp::Dilate => dilate(&plane, r),
            MorphOp::Open => dilate(&erode(&plane, r), r),
            MorphOp::Close => erode(&dilate(&plane, r), r),
        };

        plane_to_rgb(result)
    }

    fn name(&self) -> &'static str {
        match self.op {
            MorphOp::Erode => "erode",
            MorphOp::Dilate => "dilate",
            MorphOp::Open => "open",
            MorphOp::Close => "close",
        }
    }
}

/// Binarize against the mean of each pixel's neighbourhood
///
/// A pixel becomes white when it is brighter than `local mean - offset`.
pub struct AdaptiveThreshold {
    radius: usize,
    offset: f64,
}

impl Default for AdaptiveThreshold {
    fn default() -> Self {
        Self {
            radius: 5,
            offset: 5.0,
        }
    }
}

impl FrameFilter for AdaptiveThreshold {
    fn apply(&mut self, frame: &RgbImage) -> Result<RgbImage> {
        let plane = luma_plane(frame)?;
        let (height, width) = plane.dim();

        // Summed-area table with a zero row and column in front
        let mut integral = Array2::<u64>::zeros((height + 1, width + 1));
        for y in 0..height {
            let mut row_sum = 0u64;
            for x in 0..width {
                row_sum += plane[[y, x]] as u64;
                integral[[y + 1, x + 1]] = integral[[y, x + 1]] + row_sum;
            }
        }

        let r = self.radius;
        let result = Array2::from_shape_fn((height, width), |(y, x)| {
            let (y0, y1) = (y.saturating_sub(r), (y + r + 1).min(height));
            let (x0, x1) = (x.saturating_sub(r), (x + r + 1).min(width));
            let sum = integral[[y1, x1]] + integral[[y0, x0]] - integral[[y0, x1]] - integral[[y1, x0]];
            let area = ((y1 - y0) * (x1 - x0)) as f64;
            let mean = sum as f64 / area;

            if plane[[y, x]] as f64 > mean - self.offset {
                255
            } else {
                0
            }
        });

        plane_to_rgb(result)
    }

    fn name(&self) -> &'static str {
        "threshold"
    }
}

/// Gaussian blur
pub struct Denoise {
    sigma: f32,
}

impl FrameFilter for Denoise {
    fn apply(&mut self, frame: &RgbImage) -> Result<RgbImage> {
        Ok(imageops::blur(frame, self.sigma))
    }

    fn name(&self) -> &'static str {
        "denoise"
    }
}

/// Luma of `frame` as a (height, width) array
fn luma_plane(frame: &RgbImage) -> Result<Array2<u8>> {
    let gray = imageops::grayscale(frame);
    let (width, height) = gray.dimensions();
    Array2::from_shape_vec((height as usize, width as usize), gray.into_raw())
        .context("Luma buffer does not match frame dimensions")
}

fn plane_to_rgb(plane: Array2<u8>) -> Result<RgbImage> {
    let (height, width) = plane.dim();
    let plane = plane.as_standard_layout().into_owned();
    let gray = GrayImage::from_raw(width as u32, height as u32, plane.into_raw_vec())
        .context("Plane does not match its own dimensions")?;
    Ok(DynamicImage::ImageLuma8(gray).to_rgb8())
}

fn window_reduce(plane: &Array2<u8>, radius: usize, reduce: fn(u8, u8) -> u8, init: u8) -> Array2<u8> {
    let (height, width) = plane.dim();
    Array2::from_shape_fn((height, width), |(y, x)| {
        let rows = y.saturating_sub(radius)..(y + radius + 1).min(height);
        let cols = x.saturating_sub(radius)..(x + radius + 1).min(width);
        plane
            .slice(s![rows, cols])
            .iter()
            .fold(init, |acc, &v| reduce(acc, v))
    })
}

fn erode(plane: &Array2<u8>, radius: usize) -> Array2<u8> {
    window_reduce(plane, radius, u8::min, u8::MAX)
}

fn dilate(plane: &Array2<u8>, radius: usize) -> Array2<u8> {
    window_reduce(plane, radius, u8::max, u8::MIN)
}
