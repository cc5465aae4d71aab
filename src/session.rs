use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::compose::{self, ComposeOptions};
use crate::error::ConvertError;
use crate::parse::{expand_input_paths, format_size};
use crate::rasterize::{self, MupdfRenderer, PageFailure, PdfRenderer, RasterOptions};

pub const PDF_MIME: &str = "application/pdf";
pub const PNG_MIME: &str = "image/png";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    PdfToPng,
    PngToPdf,
}

impl Mode {
    /// MIME type a selected file must declare to be accepted
    pub fn accepted_mime(self) -> &'static str {
        match self {
            Mode::PdfToPng => PDF_MIME,
            Mode::PngToPdf => PNG_MIME,
        }
    }

    pub fn input_extension(self) -> &'static str {
        match self {
            Mode::PdfToPng => "pdf",
            Mode::PngToPdf => "png",
        }
    }

    pub fn input_label(self) -> &'static str {
        match self {
            Mode::PdfToPng => "PDF",
            Mode::PngToPdf => "PNG",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::PdfToPng => "pdf-to-png",
            Mode::PngToPdf => "png-to-pdf",
        })
    }
}

/// MIME type declared for a file name, judged by extension only
pub fn mime_for_name(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("pdf") => PDF_MIME,
        Some("png") => PNG_MIME,
        _ => "application/octet-stream",
    }
}

/// a user-provided input file
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub data: Vec<u8>,
    /// where the file was read from, if it came from disk
    pub path: Option<PathBuf>,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        let name = name.into();
        SelectedFile {
            mime_type: mime_for_name(&name).to_string(),
            size: data.len() as u64,
            name,
            data,
            path: None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let data =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("Not a file: {}", path.display()))?;
        Ok(SelectedFile {
            path: Some(path.to_path_buf()),
            ..SelectedFile::new(name, data)
        })
    }

    /// dir the file was read from, "." when unknown
    pub fn source_dir(&self) -> PathBuf {
        self.path
            .as_deref()
            .and_then(Path::parent)
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf()
    }
}

/// an output file waiting to be saved
#[derive(Debug, Clone)]
pub struct ConversionResult {
    pub filename: String,
    pub data: Vec<u8>,
    /// source page, for rasterized pages
    pub page: Option<u32>,
}

impl ConversionResult {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(&self.filename);
        std::fs::write(&path, &self.data)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

/// read CLI inputs (files, dirs, glob patterns) into selectable files
pub fn load_selection(inputs: &[PathBuf], mode: Mode) -> Result<Vec<SelectedFile>> {
    expand_input_paths(inputs, mode.input_extension())?
        .iter()
        .map(|path| SelectedFile::from_path(path))
        .collect()
}

/// owns the active mode, the current selection and the last results
pub struct Session {
    mode: Mode,
    selected: Vec<SelectedFile>,
    results: Vec<ConversionResult>,
}

impl Session {
    pub fn new(mode: Mode) -> Self {
        Session {
            mode,
            selected: Vec::new(),
            results: Vec::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn selected(&self) -> &[SelectedFile] {
        &self.selected
    }

    pub fn results(&self) -> &[ConversionResult] {
        &self.results
    }

    /// change mode, dropping the selection and any results
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn switch_mode(&mut self, mode: Mode) {
        debug!(from = %self.mode, to = %mode, "switching mode");
        self.mode = mode;
        self.selected.clear();
        self.results.clear();
    }

    /// replace the selection with the files matching the active mode
    ///
    /// Files of another type are dropped silently. If nothing matches, the
    /// selection is emptied and a validation error is returned.
    pub fn select(&mut self, files: Vec<SelectedFile>) -> Result<&[SelectedFile], ConvertError> {
        let wanted = self.mode.accepted_mime();
        let (valid, rejected): (Vec<_>, Vec<_>) =
            files.into_iter().partition(|f| f.mime_type == wanted);
        for file in &rejected {
            debug!(file = %file.name, mime = %file.mime_type, "skipping file of unexpected type");
        }

        self.results.clear();
        if valid.is_empty() {
            self.selected.clear();
            return Err(ConvertError::Validation { mode: self.mode });
        }
        self.selected = valid;

        for file in &self.selected {
            info!("selected {} ({})", file.name, format_size(file.size));
        }
        Ok(&self.selected)
    }

    fn ensure_ready(&self, requested: Mode) -> Result<(), ConvertError> {
        if self.mode != requested {
            return Err(ConvertError::WrongMode {
                requested,
                active: self.mode,
            });
        }
        if self.selected.is_empty() {
            return Err(ConvertError::NoSelection { mode: self.mode });
        }
        Ok(())
    }

    /// rasterize the first selected PDF with MuPDF
    ///
    /// Returns the pages that failed; the converted pages become [`Session::results`].
    pub fn convert_pdf(&mut self, opts: &RasterOptions) -> Result<Vec<PageFailure>, ConvertError> {
        self.ensure_ready(Mode::PdfToPng)?;
        self.results.clear();
        let renderer = MupdfRenderer::from_bytes(&self.selected[0].data).map_err(|source| {
            ConvertError::Conversion {
                mode: Mode::PdfToPng,
                source,
            }
        })?;
        self.convert_pdf_with(&renderer, opts)
    }

    pub fn convert_pdf_with(
        &mut self,
        renderer: &dyn PdfRenderer,
        opts: &RasterOptions,
    ) -> Result<Vec<PageFailure>, ConvertError> {
        self.ensure_ready(Mode::PdfToPng)?;
        self.results.clear();
        if self.selected.len() > 1 {
            info!(
                "{} PDFs selected, converting only {}",
                self.selected.len(),
                self.selected[0].name
            );
        }
        let outcome = rasterize::pdf_to_png(&self.selected[0], renderer, opts).map_err(
            |source| ConvertError::Conversion {
                mode: Mode::PdfToPng,
                source,
            },
        )?;
        self.results = outcome.converted;
        Ok(outcome.failed)
    }

    /// compose every selected PNG into one PDF
    pub fn convert_png(&mut self, opts: &ComposeOptions) -> Result<&ConversionResult, ConvertError> {
        self.ensure_ready(Mode::PngToPdf)?;
        self.results.clear();
        let result =
            compose::png_to_pdf(&self.selected, opts).map_err(|source| ConvertError::Conversion {
                mode: Mode::PngToPdf,
                source,
            })?;
        self.results.push(result);
        Ok(&self.results[0])
    }

    /// write every result into `dir`, returning the written paths
    pub fn save_results(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create output dir: {}", dir.display()))?;
        self.results.iter().map(|r| r.save(dir)).collect()
    }
}
