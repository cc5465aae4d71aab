use anyhow::{Context, Result};
use clap::ValueEnum;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// PNG compression level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum PngCompression {
    /// fastest encoding, larger files
    #[default]
    Fast,
    /// smaller files, slower encoding
    Small,
}

/// target page size for composed PDFs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum PageSize {
    #[default]
    A4,
    Letter,
    Legal,
    /// page takes the image's pixel dimensions
    Fit,
}

impl PageSize {
    /// page dimensions in points, `None` for [`PageSize::Fit`]
    pub fn dimensions_pt(self) -> Option<(f32, f32)> {
        match self {
            PageSize::A4 => Some((595.0, 842.0)),
            PageSize::Letter => Some((612.0, 792.0)),
            PageSize::Legal => Some((612.0, 1008.0)),
            PageSize::Fit => None,
        }
    }
}

/// parse page range string like "1,3-5,10" into sorted, distinct 1-based page numbers
///
/// Tokens that are out of bounds or not numeric contribute nothing; ranges are
/// clamped to `total_pages` at the top and to 1 at the bottom.
pub fn parse_page_range(input: &str, total_pages: u32) -> Vec<u32> {
    let last_page = i64::from(total_pages);
    let mut pages = BTreeSet::new();
    for token in input.split(',') {
        let token = token.trim();
        if let Some((start, end)) = token.split_once('-') {
            let (Ok(start), Ok(end)) = (start.trim().parse::<i64>(), end.trim().parse::<i64>())
            else {
                continue;
            };
            for p in start.max(1)..=end.min(last_page) {
                pages.insert(p as u32);
            }
        } else if let Ok(p) = token.parse::<i64>() {
            if (1..=last_page).contains(&p) {
                pages.insert(p as u32);
            }
        }
    }
    pages.into_iter().collect()
}

/// pages to convert: the parsed range, or every page when the input is blank
pub fn resolve_pages(input: Option<&str>, total_pages: u32) -> Vec<u32> {
    match input.map(str::trim) {
        Some(s) if !s.is_empty() => parse_page_range(s, total_pages),
        _ => (1..=total_pages).collect(),
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

fn is_glob_pattern(path: &Path) -> bool {
    path.to_str()
        .is_some_and(|s| s.contains(['*', '?', '[']))
}

/// expand dirs and glob patterns in the input list into sorted file paths
///
/// Directories contribute their files carrying `extension`. Plain files are
/// passed through untouched so the session can reject them by type.
pub fn expand_input_paths(inputs: &[PathBuf], extension: &str) -> Result<Vec<PathBuf>> {
    let mut result = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(input)
                .with_context(|| format!("Cannot read directory: {}", input.display()))?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file() && has_extension(p, extension))
                .collect();
            entries.sort();
            anyhow::ensure!(
                !entries.is_empty(),
                "No .{} files found in {}",
                extension,
                input.display()
            );
            result.extend(entries);
        } else if !input.exists() && is_glob_pattern(input) {
            let pattern = input.to_str().context("Invalid glob pattern")?;
            let mut matches: Vec<PathBuf> = glob::glob(pattern)
                .with_context(|| format!("Invalid glob pattern: {}", pattern))?
                .filter_map(|e| e.ok())
                .filter(|p| p.is_file())
                .collect();
            matches.sort();
            anyhow::ensure!(!matches.is_empty(), "No files match {}", pattern);
            result.extend(matches);
        } else {
            result.push(input.clone());
        }
    }
    Ok(result)
}

/// human readable byte count, e.g. "1.5 KB"
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = format!("{:.2}", value);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}

/// `name` without a trailing `.{extension}` (ASCII case-insensitive), or `name` unchanged
pub fn strip_extension<'a>(name: &'a str, extension: &str) -> &'a str {
    let suffix_len = extension.len() + 1;
    if name.len() > suffix_len && name.is_char_boundary(name.len() - suffix_len) {
        let (stem, suffix) = name.split_at(name.len() - suffix_len);
        if suffix.starts_with('.') && suffix[1..].eq_ignore_ascii_case(extension) {
            return stem;
        }
    }
    name
}

pub struct PngInfo {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: u8,
    pub interlaced: bool,
    pub has_trns: bool,
    pub idat_data: Vec<u8>,
    pub plte_data: Vec<u8>,
}

pub const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// walk PNG chunks to extract IHDR info and concatenated IDAT chunk data
pub fn parse_png_header(data: &[u8]) -> Result<PngInfo> {
    anyhow::ensure!(
        data.len() >= 8 && data[..8] == PNG_SIGNATURE,
        "Not a valid PNG file"
    );

    let mut pos = 8;
    let mut ihdr: Option<&[u8]> = None;
    let mut has_trns = false;
    let mut idat_data = Vec::new();
    let mut plte_data = Vec::new();

    while pos + 8 <= data.len() {
        let chunk_len =
            u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
        let chunk_type = &data[pos + 4..pos + 8];
        let body_start = pos + 8;
        // +4 for CRC
        let chunk_end = body_start
            .checked_add(chunk_len)
            .and_then(|n| n.checked_add(4))
            .context("Truncated PNG chunk")?;
        anyhow::ensure!(chunk_end <= data.len(), "Truncated PNG chunk");
        let body = &data[body_start..body_start + chunk_len];

        match chunk_type {
            b"IHDR" => {
                anyhow::ensure!(chunk_len >= 13, "Truncated IHDR");
                ihdr = Some(body);
            }
            b"PLTE" => plte_data.extend_from_slice(body),
            b"tRNS" => has_trns = true,
            b"IDAT" => idat_data.extend_from_slice(body),
            b"IEND" => break,
            _ => {}
        }

        pos = chunk_end;
    }

    let ihdr = ihdr.context("No IHDR chunk found in PNG")?;
    anyhow::ensure!(!idat_data.is_empty(), "No IDAT chunks found in PNG");

    let width = u32::from_be_bytes([ihdr[0], ihdr[1], ihdr[2], ihdr[3]]);
    let height = u32::from_be_bytes([ihdr[4], ihdr[5], ihdr[6], ihdr[7]]);
    anyhow::ensure!(width > 0 && height > 0, "PNG has zero dimension");

    Ok(PngInfo {
        width,
        height,
        bit_depth: ihdr[8],
        color_type: ihdr[9],
        interlaced: ihdr[12] != 0,
        has_trns,
        idat_data,
        plte_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_range_single() {
        assert_eq!(parse_page_range("3", 10), vec![3]);
        assert_eq!(parse_page_range("10", 10), vec![10]);
    }

    #[test]
    fn parse_range_mixed() {
        assert_eq!(parse_page_range("1,3-5,10", 10), vec![1, 3, 4, 5, 10]);
    }

    #[test]
    fn parse_range_clamps_upper_end() {
        assert_eq!(parse_page_range("8-20", 10), vec![8, 9, 10]);
    }

    #[test]
    fn parse_range_drops_out_of_bounds_singles() {
        assert_eq!(parse_page_range("0,-1,5", 5), vec![5]);
        assert_eq!(parse_page_range("11", 10), Vec::<u32>::new());
    }

    #[test]
    fn parse_range_whitespace() {
        assert_eq!(parse_page_range(" 1 , 3 - 5 , 10 ", 10), vec![1, 3, 4, 5, 10]);
    }

    #[test]
    fn parse_range_dedups_and_sorts() {
        assert_eq!(parse_page_range("5,1,3,1,2-4", 10), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn parse_range_reversed_contributes_nothing() {
        assert_eq!(parse_page_range("5-3", 10), Vec::<u32>::new());
        assert_eq!(parse_page_range("12-15,2", 10), vec![2]);
    }

    #[test]
    fn parse_range_drops_below_one() {
        assert_eq!(parse_page_range("0-2", 10), vec![1, 2]);
    }

    #[test]
    fn parse_range_ignores_malformed_tokens() {
        assert_eq!(parse_page_range("abc,2,x-4,1-,,7", 10), vec![2, 7]);
        assert_eq!(parse_page_range("1-2-3,4", 10), vec![4]);
    }

    #[test]
    fn parse_range_huge_bounds() {
        assert_eq!(parse_page_range("3-4000000000", 4), vec![3, 4]);
        assert_eq!(parse_page_range("99999999999999999999999", 4), Vec::<u32>::new());
    }

    #[test]
    fn parse_range_output_is_strictly_ascending_and_in_bounds() {
        let inputs = [
            "1,3-5,10",
            "9-2,4,4,4,0-3",
            "100, 7 ,-3, 2-2, 6-8",
            "x,y,z",
            "1-100",
        ];
        for total in [1u32, 5, 8, 20] {
            for input in inputs {
                let pages = parse_page_range(input, total);
                assert!(pages.windows(2).all(|w| w[0] < w[1]), "{input:?}: {pages:?}");
                assert!(pages.iter().all(|&p| p >= 1 && p <= total), "{input:?}: {pages:?}");
            }
        }
    }

    #[test]
    fn resolve_blank_means_all_pages() {
        assert_eq!(resolve_pages(None, 3), vec![1, 2, 3]);
        assert_eq!(resolve_pages(Some("   "), 4), vec![1, 2, 3, 4]);
        assert_eq!(resolve_pages(Some("2"), 4), vec![2]);
    }

    #[test]
    fn page_size_dimensions() {
        assert_eq!(PageSize::A4.dimensions_pt(), Some((595.0, 842.0)));
        assert_eq!(PageSize::Letter.dimensions_pt(), Some((612.0, 792.0)));
        assert_eq!(PageSize::Legal.dimensions_pt(), Some((612.0, 1008.0)));
        assert_eq!(PageSize::Fit.dimensions_pt(), None);
    }

    #[test]
    fn format_sizes() {
        assert_eq!(format_size(0), "0 Bytes");
        assert_eq!(format_size(500), "500 Bytes");
        assert_eq!(format_size(1024), "1 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024 * 1024), "3072 GB");
    }

    #[test]
    fn strip_extensions() {
        assert_eq!(strip_extension("report.pdf", "pdf"), "report");
        assert_eq!(strip_extension("REPORT.PDF", "pdf"), "REPORT");
        assert_eq!(strip_extension("my.pdf.notes.pdf", "pdf"), "my.pdf.notes");
        assert_eq!(strip_extension("scan.png", "pdf"), "scan.png");
        assert_eq!(strip_extension(".pdf", "pdf"), ".pdf");
        assert_eq!(strip_extension("résumé.pdf", "pdf"), "résumé");
    }

    fn encode_png(
        width: u32,
        height: u32,
        color: png::ColorType,
        trns: Option<&[u8]>,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, width, height);
            encoder.set_color(color);
            encoder.set_depth(png::BitDepth::Eight);
            if color == png::ColorType::Indexed {
                encoder.set_palette(vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255]);
            }
            if let Some(t) = trns {
                encoder.set_trns(t.to_vec());
            }
            let channels = match color {
                png::ColorType::Rgb => 3,
                png::ColorType::Rgba => 4,
                png::ColorType::GrayscaleAlpha => 2,
                _ => 1,
            };
            let mut writer = encoder.write_header().unwrap();
            let data = vec![1u8; (width * height) as usize * channels];
            writer.write_image_data(&data).unwrap();
        }
        out
    }

    #[test]
    fn png_header_rgb() {
        let data = encode_png(16, 8, png::ColorType::Rgb, None);
        let info = parse_png_header(&data).unwrap();
        assert_eq!((info.width, info.height), (16, 8));
        assert_eq!(info.color_type, 2);
        assert_eq!(info.bit_depth, 8);
        assert!(!info.interlaced);
        assert!(!info.has_trns);
        assert!(!info.idat_data.is_empty());
        assert!(info.plte_data.is_empty());
    }

    #[test]
    fn png_header_palette_with_trns() {
        let data = encode_png(4, 4, png::ColorType::Indexed, Some(&[0, 255]));
        let info = parse_png_header(&data).unwrap();
        assert_eq!(info.color_type, 3);
        assert_eq!(info.plte_data.len(), 12);
        assert!(info.has_trns);
    }

    #[test]
    fn png_header_interlaced() {
        let mut data = encode_png(9, 9, png::ColorType::Rgba, None);
        // interlace method byte of IHDR; chunk CRCs are not checked
        data[28] = 1;
        let info = parse_png_header(&data).unwrap();
        assert_eq!(info.color_type, 6);
        assert!(info.interlaced);
    }

    #[test]
    fn png_header_err_not_png() {
        assert!(parse_png_header(b"%PDF-1.5\n").is_err());
        assert!(parse_png_header(&PNG_SIGNATURE[..4]).is_err());
    }

    #[test]
    fn png_header_err_truncated() {
        let data = encode_png(8, 8, png::ColorType::Rgb, None);
        assert!(parse_png_header(&data[..20]).is_err());
    }

    #[test]
    fn expand_paths_directory_filters_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("c.png"), b"fake").unwrap();
        std::fs::write(dir.path().join("a.PNG"), b"fake").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"fake").unwrap();
        let result = expand_input_paths(&[dir.path().to_path_buf()], "png").unwrap();
        let names: Vec<_> = result
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.PNG", "c.png"]);
    }

    #[test]
    fn expand_paths_keeps_explicit_files() {
        let dir = tempfile::tempdir().unwrap();
        let txt = dir.path().join("notes.txt");
        std::fs::write(&txt, b"fake").unwrap();
        let result = expand_input_paths(&[txt.clone()], "png").unwrap();
        assert_eq!(result, vec![txt]);
    }

    #[test]
    fn expand_paths_glob() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.png"), b"fake").unwrap();
        std::fs::write(dir.path().join("a.png"), b"fake").unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"fake").unwrap();
        let pattern = dir.path().join("*.png");
        let result = expand_input_paths(&[pattern], "png").unwrap();
        assert_eq!(result, vec![dir.path().join("a.png"), dir.path().join("b.png")]);
    }

    #[test]
    fn expand_paths_errors_on_empty_matches() {
        let dir = tempfile::tempdir().unwrap();
        assert!(expand_input_paths(&[dir.path().to_path_buf()], "pdf").is_err());
        assert!(expand_input_paths(&[dir.path().join("*.pdf")], "pdf").is_err());
    }
}
