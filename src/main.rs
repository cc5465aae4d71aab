#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod compose;
mod error;
mod layout;
mod parse;
mod rasterize;
mod session;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use compose::{ComposeOptions, Metadata};
use layout::FitMode;
use parse::{format_size, PageSize, PngCompression};
use rasterize::RasterOptions;
use session::{load_selection, Mode, SelectedFile, Session};

#[derive(Parser)]
#[command(name = "pdfpng", version, about = "Convert PDF pages to PNG and PNG images to PDF")]
struct Cli {
    /// num parallel threads for image preparation (default number of CPUs)
    #[arg(short = 'j', long, global = true, env = "PDFPNG_THREADS")]
    threads: Option<usize>,

    /// only print warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// print debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// rasterize PDF pages to PNG images
    PdfToPng {
        /// input PDF (only the first valid PDF is converted); dirs and globs are expanded
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// output dir (default next to input file), or "-" for stdout (single page only)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// render scale, output pixels per PDF point (1-8)
        #[arg(short, long, default_value_t = 2, env = "PDFPNG_SCALE", value_parser = clap::value_parser!(u32).range(1..=8))]
        scale: u32,

        /// page selection (e.g. "1", "1,3-5,10"); all pages when omitted
        #[arg(short, long)]
        pages: Option<String>,

        /// PNG compression: fast (speed) or small (filesize)
        #[arg(short, long, default_value = "fast")]
        compress: PngCompression,
    },
    /// combine PNG images into a single PDF, one page per image
    PngToPdf {
        /// input PNG files, dirs or glob patterns
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// output PDF path or dir, "-" for stdout (default next to the first input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// page size; "fit" makes each page the size of its image
        #[arg(long, default_value = "a4", env = "PDFPNG_PAGE_SIZE")]
        page_size: PageSize,

        /// how images are placed on standard page sizes
        #[arg(long, default_value = "contain", env = "PDFPNG_FIT")]
        fit: FitMode,

        /// PDF title metadata
        #[arg(long)]
        title: Option<String>,

        /// PDF author metadata
        #[arg(long)]
        author: Option<String>,
    },
    /// generate shell completions
    Completions {
        /// shell to generate completions for
        shell: clap_complete::Shell,
    },
}

fn init_tracing(quiet: bool, verbose: bool) {
    let default_level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn run_pdf_to_png(
    inputs: &[PathBuf],
    output: Option<PathBuf>,
    opts: RasterOptions,
) -> Result<()> {
    let mut session = Session::new(Mode::PdfToPng);
    let selected = session.select(load_selection(inputs, Mode::PdfToPng)?)?.len();
    debug!("{}: {} file(s) selected", session.mode(), selected);
    let default_dir = selection_dir(&session);

    let start = std::time::Instant::now();
    let failed = session.convert_pdf(&opts)?;
    let converted = session.results();

    for failure in &failed {
        warn!("page {} skipped: {}", failure.page, failure.reason);
    }
    if converted.is_empty() {
        anyhow::ensure!(
            failed.is_empty(),
            "All {} selected page(s) failed to convert",
            failed.len()
        );
        warn!("Page selection matched no pages, nothing written");
        return Ok(());
    }

    if output.as_deref() == Some(Path::new("-")) {
        anyhow::ensure!(
            converted.len() == 1,
            "Stdout output requires exactly one page (got {}). Use --pages to select one.",
            converted.len()
        );
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        out.write_all(&converted[0].data)
            .context("Failed to write PNG to stdout")?;
        return Ok(());
    }

    let output_dir = output.unwrap_or(default_dir);
    let written = session.save_results(&output_dir)?;
    for (result, path) in converted.iter().zip(&written) {
        debug!(page = ?result.page, size = result.size(), "wrote {}", path.display());
    }
    let bytes: u64 = converted.iter().map(|r| r.size()).sum();
    info!(
        "Done. {} image(s), {} -> {} in {:.2}s",
        written.len(),
        format_size(bytes),
        output_dir.display(),
        start.elapsed().as_secs_f64()
    );
    if !failed.is_empty() {
        warn!("{} page(s) failed", failed.len());
    }
    Ok(())
}

fn run_png_to_pdf(
    images: &[PathBuf],
    output: Option<PathBuf>,
    opts: ComposeOptions,
) -> Result<()> {
    let mut session = Session::new(Mode::PngToPdf);
    let selected = session.select(load_selection(images, Mode::PngToPdf)?)?.len();
    debug!("{}: {} file(s) selected", session.mode(), selected);
    let default_dir = selection_dir(&session);

    let start = std::time::Instant::now();
    let result = session.convert_png(&opts)?;

    let written = match output {
        Some(path) if path == Path::new("-") => {
            let stdout = std::io::stdout();
            let mut out = std::io::BufWriter::new(stdout.lock());
            out.write_all(&result.data)
                .and_then(|_| out.flush())
                .context("Failed to write PDF to stdout")?;
            return Ok(());
        }
        Some(dir) if dir.is_dir() => result.save(&dir)?,
        Some(path) => {
            std::fs::write(&path, &result.data)
                .with_context(|| format!("Failed to save {}", path.display()))?;
            path
        }
        None => result.save(&default_dir)?,
    };

    info!(
        "Done. {} ({}) saved in {:.2}s",
        written.display(),
        format_size(result.size()),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

/// dir of the first selected file, for default output placement
fn selection_dir(session: &Session) -> PathBuf {
    session
        .selected()
        .first()
        .map(SelectedFile::source_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    match cli.command {
        Commands::PdfToPng {
            inputs,
            output,
            scale,
            pages,
            compress,
        } => {
            run_pdf_to_png(
                &inputs,
                output,
                RasterOptions {
                    scale,
                    pages,
                    compression: compress,
                },
            )?;
        }
        Commands::PngToPdf {
            images,
            output,
            page_size,
            fit,
            title,
            author,
        } => {
            run_png_to_pdf(
                &images,
                output,
                ComposeOptions {
                    page_size,
                    fit,
                    metadata: Metadata { title, author },
                },
            )?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "pdfpng",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}
