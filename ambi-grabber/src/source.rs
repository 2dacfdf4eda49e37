//! Frame sources standing in for a screen capture backend.
//!
//! ```text
//!   raw file / stdin ──► width * height * bpp bytes per frame
//!   test pattern     ──► RGBA frames with black bars top and bottom
//! ```

use ambi_core::{AmbiError, PixelFormat};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::CaptureSection;

// ── FrameSource ──────────────────────────────────────────────────

pub enum FrameSource {
    /// Back-to-back packed frames from a byte stream.
    Raw {
        reader: Box<dyn AsyncRead + Unpin + Send>,
        buf: Vec<u8>,
    },
    Pattern(TestPattern),
}

impl FrameSource {
    /// Open the source described by `capture`.
    pub async fn open(capture: &CaptureSection) -> Result<Self, AmbiError> {
        if capture.width == 0 || capture.height == 0 {
            return Err(AmbiError::InvalidConfig("capture size must be non-zero".into()));
        }
        if capture.pattern {
            return Ok(Self::Pattern(TestPattern::new(capture.width, capture.height)));
        }

        let reader: Box<dyn AsyncRead + Unpin + Send> = match capture.input.as_str() {
            "" | "-" => Box::new(tokio::io::stdin()),
            path => Box::new(tokio::fs::File::open(path).await?),
        };
        Ok(Self::reader(reader, capture.width, capture.height, capture.format))
    }

    pub fn reader(
        reader: Box<dyn AsyncRead + Unpin + Send>,
        width: usize,
        height: usize,
        format: PixelFormat,
    ) -> Self {
        Self::Raw {
            reader,
            buf: vec![0; width * height * format.bytes_per_pixel()],
        }
    }

    /// Format of the frames this source yields.
    pub fn format(&self, configured: PixelFormat) -> PixelFormat {
        match self {
            Self::Raw { .. } => configured,
            Self::Pattern(_) => PixelFormat::Rgba8888,
        }
    }

    /// Next packed frame, or `None` at end of input.
    pub async fn next_frame(&mut self) -> Result<Option<&[u8]>, AmbiError> {
        match self {
            Self::Raw { reader, buf } => match reader.read_exact(buf).await {
                Ok(_) => Ok(Some(buf.as_slice())),
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
                Err(e) => Err(e.into()),
            },
            Self::Pattern(p) => Ok(Some(p.render())),
        }
    }
}

// ── TestPattern ──────────────────────────────────────────────────

/// Letterboxed color bars drifting one column per frame.
pub struct TestPattern {
    width: usize,
    height: usize,
    bar: usize,
    phase: usize,
    buf: Vec<u8>,
}

const BARS: [[u8; 3]; 6] = [
    [255, 0, 0],
    [255, 255, 0],
    [0, 255, 0],
    [0, 255, 255],
    [0, 0, 255],
    [255, 0, 255],
];

impl TestPattern {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            bar: height / 8,
            phase: 0,
            buf: vec![0; width * height * 4],
        }
    }

    /// Height of the black bars at top and bottom.
    pub fn bar_height(&self) -> usize {
        self.bar
    }

    pub fn render(&mut self) -> &[u8] {
        let band = (self.width / BARS.len()).max(1);
        for y in 0..self.height {
            let letterbox = y < self.bar || y >= self.height - self.bar;
            let row = &mut self.buf[y * self.width * 4..(y + 1) * self.width * 4];
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let [r, g, b] = if letterbox {
                    [0, 0, 0]
                } else {
                    BARS[((x + self.phase) / band) % BARS.len()]
                };
                px.copy_from_slice(&[r, g, b, 255]);
            }
        }
        self.phase = (self.phase + 1) % (band * BARS.len());
        &self.buf
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_has_black_bars() {
        let mut p = TestPattern::new(12, 16);
        assert_eq!(p.bar_height(), 2);
        let frame = p.render().to_vec();
        assert_eq!(frame.len(), 12 * 16 * 4);

        let px = |x: usize, y: usize| &frame[(y * 12 + x) * 4..(y * 12 + x) * 4 + 4];
        assert_eq!(px(0, 0), &[0, 0, 0, 255]);
        assert_eq!(px(5, 15), &[0, 0, 0, 255]);
        assert_eq!(px(0, 2), &[255, 0, 0, 255]);
        assert_eq!(px(11, 8), &[255, 0, 255, 255]);
    }

    #[test]
    fn pattern_drifts() {
        let mut p = TestPattern::new(12, 16);
        let first = p.render().to_vec();
        let second = p.render().to_vec();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn raw_reader_splits_frames() {
        let data: Vec<u8> = (0..2 * 2 * 2 * 2).map(|i| i as u8).collect();
        let reader = Box::new(std::io::Cursor::new(data.clone()));
        let mut src = FrameSource::reader(reader, 2, 2, PixelFormat::Rgb565);

        assert_eq!(src.next_frame().await.unwrap().unwrap(), &data[..8]);
        assert_eq!(src.next_frame().await.unwrap().unwrap(), &data[8..]);
        assert!(src.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_frame_ends_input() {
        let reader = Box::new(std::io::Cursor::new(vec![1u8; 10]));
        let mut src = FrameSource::reader(reader, 2, 2, PixelFormat::Rgba8888);
        assert!(src.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn zero_size_is_rejected() {
        let capture = CaptureSection {
            width: 0,
            ..CaptureSection::default()
        };
        match FrameSource::open(&capture).await {
            Err(e) => assert!(e.is_config()),
            Ok(_) => panic!("zero-sized capture accepted"),
        }
    }
}
