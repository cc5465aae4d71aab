use anyhow::{Context, Result};
use std::io::Write;
use tracing::{info, warn};

use crate::parse::{resolve_pages, strip_extension, PngCompression};
use crate::session::{ConversionResult, SelectedFile};

/// 8-bit RGB pixels, rows packed without padding
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// something that can count and rasterize the pages of one PDF
pub trait PdfRenderer {
    fn page_count(&self) -> Result<u32>;

    /// render 1-based `page` at `scale` pixels per point
    fn render_page(&self, page: u32, scale: u32) -> Result<Bitmap>;
}

pub struct MupdfRenderer {
    doc: mupdf::Document,
}

impl MupdfRenderer {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let doc = mupdf::Document::from_bytes(data, "pdf").context("Failed to open PDF")?;
        Ok(MupdfRenderer { doc })
    }
}

impl PdfRenderer for MupdfRenderer {
    fn page_count(&self) -> Result<u32> {
        let count = self.doc.page_count().context("Failed to read page count")?;
        u32::try_from(count).context("Negative page count")
    }

    fn render_page(&self, page: u32, scale: u32) -> Result<Bitmap> {
        let index = page
            .checked_sub(1)
            .and_then(|i| i32::try_from(i).ok())
            .context("Page number out of range")?;
        let page = self.doc.load_page(index)?;
        let matrix = mupdf::Matrix::new_scale(scale as f32, scale as f32);
        let pixmap = page.to_pixmap(&matrix, &mupdf::Colorspace::device_rgb(), false, true)?;

        let width = pixmap.width();
        let height = pixmap.height();
        let samples = pixmap.samples();
        anyhow::ensure!(
            samples.len() == width as usize * height as usize * 3,
            "Unexpected pixmap layout ({} bytes for {}x{})",
            samples.len(),
            width,
            height
        );
        Ok(Bitmap {
            width,
            height,
            pixels: samples.to_vec(),
        })
    }
}

pub fn encode_png(bitmap: &Bitmap, compress: PngCompression, writer: impl Write) -> Result<()> {
    let writer = std::io::BufWriter::new(writer);
    let mut encoder = png::Encoder::new(writer, bitmap.width, bitmap.height);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);

    // - fast: fdeflate + Paeth
    // - small: zlib + NoFilter
    match compress {
        PngCompression::Fast => {
            encoder.set_compression(png::Compression::Fast);
            encoder.set_filter(png::Filter::Paeth);
        }
        PngCompression::Small => {
            encoder.set_compression(png::Compression::Balanced);
            encoder.set_filter(png::Filter::NoFilter);
        }
    }

    let mut writer = encoder
        .write_header()
        .context("Failed to write PNG header")?;
    writer
        .write_image_data(&bitmap.pixels)
        .context("Failed to encode PNG data")?;
    writer.finish().context("Failed to finish PNG")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct RasterOptions {
    /// integer multiplier on the page's point size
    pub scale: u32,
    /// page range like "1,3-5"; blank or `None` means every page
    pub pages: Option<String>,
    pub compression: PngCompression,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFailure {
    pub page: u32,
    pub reason: String,
}

/// per-page results of one PDF rasterization
pub struct PageOutcome {
    pub converted: Vec<ConversionResult>,
    pub failed: Vec<PageFailure>,
}

/// output name for a rasterized page: `<base>_page_<N>.png`
pub fn page_filename(pdf_name: &str, page: u32) -> String {
    format!("{}_page_{}.png", strip_extension(pdf_name, "pdf"), page)
}

/// rasterize the selected pages of `file` one after another
///
/// Only a document-level failure is an error. A page that fails to render
/// or encode is logged and recorded in [`PageOutcome::failed`].
pub fn pdf_to_png(
    file: &SelectedFile,
    renderer: &dyn PdfRenderer,
    opts: &RasterOptions,
) -> Result<PageOutcome> {
    let total_pages = renderer
        .page_count()
        .with_context(|| format!("Failed to open {}", file.name))?;
    anyhow::ensure!(total_pages > 0, "{} has no pages", file.name);
    let pages = resolve_pages(opts.pages.as_deref(), total_pages);
    let total = pages.len();

    info!(
        "Rasterizing {} ({} of {} page{}) at {}x",
        file.name,
        total,
        total_pages,
        if total_pages == 1 { "" } else { "s" },
        opts.scale
    );

    let mut outcome = PageOutcome {
        converted: Vec::with_capacity(total),
        failed: Vec::new(),
    };

    for (i, &page) in pages.iter().enumerate() {
        let rendered: Result<Vec<u8>> = (|| {
            let bitmap = renderer.render_page(page, opts.scale)?;
            let mut data = Vec::new();
            encode_png(&bitmap, opts.compression, &mut data)?;
            Ok(data)
        })();

        match rendered {
            Ok(data) => {
                let filename = page_filename(&file.name, page);
                info!("  [{}/{}] {}", i + 1, total, filename);
                outcome.converted.push(ConversionResult {
                    filename,
                    data,
                    page: Some(page),
                });
            }
            Err(err) => {
                let reason = format!("{:#}", err);
                warn!(page, %reason, "failed to convert page");
                outcome.failed.push(PageFailure { page, reason });
            }
        }
    }

    Ok(outcome)
}
