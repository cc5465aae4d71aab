use anyhow::{Context, Result};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use rayon::prelude::*;
use std::io::Write;
use tracing::info;

use crate::layout::{fit_image, FitMode, Placement};
use crate::parse::{parse_png_header, strip_extension, PageSize, PngInfo};
use crate::session::{ConversionResult, SelectedFile};

/// output name when more than one image is composed
pub const MULTI_IMAGE_FILENAME: &str = "converted_images.pdf";

/// PNG data ready for PDF insertion
pub enum PreparedPng {
    /// IDAT stream reused behind a PNG predictor
    Passthrough(PngInfo),
    /// decoded pixels compressed with deflate, alpha split into its own plane
    Decoded {
        width: u32,
        height: u32,
        color_channels: u8,
        color: Vec<u8>,
        alpha: Option<Vec<u8>>,
    },
}

impl PreparedPng {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            PreparedPng::Passthrough(info) => (info.width, info.height),
            PreparedPng::Decoded { width, height, .. } => (*width, *height),
        }
    }
}

/// passthrough for opaque non-interlaced PNGs without tRNS, full decode otherwise
pub fn prepare_png(data: &[u8]) -> Result<PreparedPng> {
    let info = parse_png_header(data)?;

    if info.interlaced || info.has_trns {
        return decode_png(data);
    }

    match info.color_type {
        0 | 2 => Ok(PreparedPng::Passthrough(info)),
        3 => {
            let plte_len = info.plte_data.len();
            anyhow::ensure!(plte_len != 0, "PNG palette image missing PLTE chunk");
            // 1 to 256 RGB entries
            anyhow::ensure!(
                plte_len % 3 == 0 && plte_len <= 768,
                "Invalid PNG palette length {}",
                plte_len
            );
            Ok(PreparedPng::Passthrough(info))
        }
        4 | 6 => decode_png(data),
        other => anyhow::bail!("Unsupported PNG color type {}", other),
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut enc = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::fast());
    enc.write_all(data)?;
    Ok(enc.finish()?)
}

fn decode_png(data: &[u8]) -> Result<PreparedPng> {
    let img = image::load_from_memory_with_format(data, image::ImageFormat::Png)
        .context("Failed to decode PNG")?;
    let (width, height) = (img.width(), img.height());
    let has_alpha = img.color().has_alpha();
    let gray = img.color().channel_count() <= 2;

    let (channels, pixels) = match (gray, has_alpha) {
        (true, true) => (2, img.into_luma_alpha8().into_raw()),
        (true, false) => (1, img.into_luma8().into_raw()),
        (false, true) => (4, img.into_rgba8().into_raw()),
        (false, false) => (3, img.into_rgb8().into_raw()),
    };

    if !has_alpha {
        return Ok(PreparedPng::Decoded {
            width,
            height,
            color_channels: channels as u8,
            color: deflate(&pixels)?,
            alpha: None,
        });
    }

    let color_channels = channels - 1;
    let pixel_count = width as usize * height as usize;
    let mut color = Vec::with_capacity(pixel_count * color_channels);
    let mut alpha = Vec::with_capacity(pixel_count);
    for px in pixels.chunks_exact(channels) {
        color.extend_from_slice(&px[..color_channels]);
        alpha.push(px[color_channels]);
    }

    Ok(PreparedPng::Decoded {
        width,
        height,
        color_channels: color_channels as u8,
        color: deflate(&color)?,
        alpha: Some(deflate(&alpha)?),
    })
}

fn device_space(channels: u8) -> Object {
    if channels == 1 {
        Object::Name(b"DeviceGray".to_vec())
    } else {
        Object::Name(b"DeviceRGB".to_vec())
    }
}

fn image_dict(width: u32, height: u32, color_space: Object, bits: i64, len: usize) -> Dictionary {
    dictionary! {
        "Type" => Object::Name(b"XObject".to_vec()),
        "Subtype" => Object::Name(b"Image".to_vec()),
        "Width" => width as i64,
        "Height" => height as i64,
        "ColorSpace" => color_space,
        "BitsPerComponent" => bits,
        "Filter" => Object::Name(b"FlateDecode".to_vec()),
        "Length" => len as i64,
    }
}

/// an image XObject stored in a [`PdfComposer`]
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedImage {
    id: ObjectId,
    pub width: u32,
    pub height: u32,
}

struct PendingPage {
    width: f32,
    height: f32,
    operations: Vec<Operation>,
    xobjects: Dictionary,
}

#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub title: Option<String>,
    pub author: Option<String>,
}

/// builds a PDF out of embedded images, one content stream per page
pub struct PdfComposer {
    doc: Document,
    pages_id: ObjectId,
    pages: Vec<PendingPage>,
}

impl Default for PdfComposer {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfComposer {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        PdfComposer {
            doc,
            pages_id,
            pages: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// store the image and report its pixel dimensions
    pub fn embed_png(&mut self, png: PreparedPng) -> EmbeddedImage {
        let (width, height) = png.dimensions();
        let id = match png {
            PreparedPng::Passthrough(info) => {
                let (channels, color_space) = if info.color_type == 3 {
                    let num_entries = info.plte_data.len() / 3;
                    let indexed = Object::Array(vec![
                        Object::Name(b"Indexed".to_vec()),
                        Object::Name(b"DeviceRGB".to_vec()),
                        Object::Integer(num_entries as i64 - 1),
                        Object::String(info.plte_data, StringFormat::Hexadecimal),
                    ]);
                    (1, indexed)
                } else {
                    let channels = if info.color_type == 0 { 1 } else { 3 };
                    (channels, device_space(channels))
                };
                let mut dict = image_dict(
                    width,
                    height,
                    color_space,
                    info.bit_depth as i64,
                    info.idat_data.len(),
                );
                dict.set(
                    "DecodeParms",
                    dictionary! {
                        "Predictor" => 15,
                        "Colors" => channels as i64,
                        "BitsPerComponent" => info.bit_depth as i64,
                        "Columns" => width as i64,
                    },
                );
                self.doc.add_object(Stream::new(dict, info.idat_data))
            }
            PreparedPng::Decoded {
                color_channels,
                color,
                alpha,
                ..
            } => {
                let mut dict = image_dict(
                    width,
                    height,
                    device_space(color_channels),
                    8,
                    color.len(),
                );
                if let Some(alpha) = alpha {
                    let smask = image_dict(width, height, device_space(1), 8, alpha.len());
                    let smask_id = self.doc.add_object(Stream::new(smask, alpha));
                    dict.set("SMask", smask_id);
                }
                self.doc.add_object(Stream::new(dict, color))
            }
        };
        EmbeddedImage { id, width, height }
    }

    /// append an empty page of `width`x`height` points, returning its index
    pub fn add_page(&mut self, width: f32, height: f32) -> usize {
        self.pages.push(PendingPage {
            width,
            height,
            operations: Vec::new(),
            xobjects: Dictionary::new(),
        });
        self.pages.len() - 1
    }

    pub fn draw_image(&mut self, page: usize, image: &EmbeddedImage, at: Placement) -> Result<()> {
        let page = self
            .pages
            .get_mut(page)
            .with_context(|| format!("No page {} to draw on", page))?;
        let name = format!("Im{}", page.xobjects.len());
        page.xobjects.set(name.as_bytes(), image.id);
        page.operations.extend([
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Real(at.width),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(at.height),
                    Object::Real(at.x),
                    Object::Real(at.y),
                ],
            ),
            Operation::new("Do", vec![Object::Name(name.into_bytes())]),
            Operation::new("Q", vec![]),
        ]);
        Ok(())
    }

    /// assemble the page tree and serialize the document
    pub fn finish(mut self, meta: &Metadata) -> Result<Vec<u8>> {
        let mut page_ids: Vec<Object> = Vec::with_capacity(self.pages.len());
        for page in std::mem::take(&mut self.pages) {
            let content = Content {
                operations: page.operations,
            };
            let content_id = self.doc.add_object(Stream::new(
                dictionary! {},
                content
                    .encode()
                    .context("Failed to encode content stream")?,
            ));
            let resources_id = self.doc.add_object(dictionary! {
                "XObject" => page.xobjects,
            });
            let page_id = self.doc.add_object(dictionary! {
                "Type" => Object::Name(b"Page".to_vec()),
                "Parent" => self.pages_id,
                "MediaBox" => vec![0.into(), 0.into(), Object::Real(page.width), Object::Real(page.height)],
                "Contents" => content_id,
                "Resources" => resources_id,
            });
            page_ids.push(page_id.into());
        }

        let count = page_ids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => Object::Name(b"Pages".to_vec()),
                "Kids" => page_ids,
                "Count" => count,
            }),
        );

        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => Object::Name(b"Catalog".to_vec()),
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let literal = |s: &str| Object::String(s.as_bytes().to_vec(), StringFormat::Literal);
        let mut info = Dictionary::new();
        info.set(
            "Producer",
            literal(&format!("pdfpng {}", env!("CARGO_PKG_VERSION"))),
        );
        // PDF date format, UTC
        info.set(
            "CreationDate",
            literal(&chrono::Utc::now().format("D:%Y%m%d%H%M%SZ").to_string()),
        );
        if let Some(title) = &meta.title {
            info.set("Title", literal(title));
        }
        if let Some(author) = &meta.author {
            info.set("Author", literal(author));
        }
        let info_id = self.doc.add_object(Object::Dictionary(info));
        self.doc.trailer.set("Info", info_id);

        let mut out = Vec::new();
        self.doc
            .save_to(&mut out)
            .context("Failed to serialize PDF")?;
        Ok(out)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ComposeOptions {
    pub page_size: PageSize,
    pub fit: FitMode,
    pub metadata: Metadata,
}

/// `photo.png` -> `photo.pdf` for a single image, a fixed name otherwise
pub fn pdf_filename(files: &[SelectedFile]) -> String {
    match files {
        [only] => format!("{}.pdf", strip_extension(&only.name, "png")),
        _ => MULTI_IMAGE_FILENAME.to_string(),
    }
}

/// compose one page per image into a single PDF
///
/// Images are prepared in parallel and then placed in selection order. Any
/// image that cannot be embedded fails the whole document.
pub fn png_to_pdf(files: &[SelectedFile], opts: &ComposeOptions) -> Result<ConversionResult> {
    anyhow::ensure!(!files.is_empty(), "No images to compose");
    info!(
        "Composing {} image(s) on {:?} pages ({:?})",
        files.len(),
        opts.page_size,
        opts.fit
    );

    let prepared: Vec<Result<PreparedPng>> = files
        .par_iter()
        .map(|file| prepare_png(&file.data).with_context(|| format!("Failed to embed {}", file.name)))
        .collect();

    let mut composer = PdfComposer::new();
    for (i, (file, prepared)) in files.iter().zip(prepared).enumerate() {
        let image = composer.embed_png(prepared?);
        let (img_w, img_h) = (image.width as f32, image.height as f32);
        let (page, placement) = match opts.page_size.dimensions_pt() {
            Some((page_w, page_h)) => (
                composer.add_page(page_w, page_h),
                fit_image(img_w, img_h, page_w, page_h, opts.fit),
            ),
            None => (
                composer.add_page(img_w, img_h),
                Placement::native(img_w, img_h),
            ),
        };
        composer.draw_image(page, &image, placement)?;
        info!("  [{}/{}] {}", i + 1, files.len(), file.name);
    }

    let pages = composer.page_count();
    let data = composer.finish(&opts.metadata)?;
    info!("Composed {} page(s), {} bytes", pages, data.len());
    Ok(ConversionResult {
        filename: pdf_filename(files),
        data,
        page: None,
    })
}
