use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use cover_composer::{
    Composer, Configurable, ExportFormat, ExportRequest, StyleState, TextEngine,
};

/// cover-composer: render a layered cover image to a file
#[derive(Debug, Parser)]
#[command(name = "cover-composer", version, about, long_about = None)]
struct Cli {
    /// Style JSON to start from (defaults are used when omitted)
    #[arg(short, long)]
    style: Option<PathBuf>,

    /// Background image; switches the background to image mode
    #[arg(short, long)]
    background: Option<PathBuf>,

    /// Icon image drawn in the center
    #[arg(short, long)]
    icon: Option<PathBuf>,

    /// Text content, overriding the style
    #[arg(short, long)]
    text: Option<String>,

    /// Font family for text and watermark, overriding the style
    #[arg(long)]
    font: Option<String>,

    /// Extra font files to register before rendering
    #[arg(long = "font-file")]
    font_files: Vec<PathBuf>,

    /// Output format: webp, png or jpeg
    #[arg(short, long)]
    format: Option<ExportFormat>,

    /// Encoder quality in [0, 1]
    #[arg(short, long)]
    quality: Option<f32>,

    /// Output width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Output height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// Output file name (defaults to Cover-<timestamp>.<ext>)
    #[arg(long)]
    file_name: Option<String>,

    /// Directory the file is written to
    #[arg(short, long, default_value = ".")]
    out: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut composer = Composer::new(TextEngine::new())?;
    composer.apply_style(load_style(cli.style.as_deref())?);

    for path in &cli.font_files {
        let data = read(path)?;
        let families = composer.load_font_data(data);
        if families.is_empty() {
            eprintln!("warning: no fonts found in {}", path.display());
        } else {
            eprintln!("loaded {} from {}", families.join(", "), path.display());
        }
    }

    if let Some(path) = &cli.background {
        let handle = composer.add_image(read(path)?);
        composer.set_background_image(handle);
    }
    if let Some(path) = &cli.icon {
        let handle = composer.add_image(read(path)?);
        composer.set_icon_image(Some(handle));
    }
    if let Some(text) = &cli.text {
        composer.set_text(&text.replace("\\n", "\n"));
    }
    if let Some(font) = &cli.font {
        composer.begin_font_change(font);
    }

    let gate = composer.font_gate();
    let report = composer.initialize(&gate).await?;
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    if let Some(hint) = composer.font_hint() {
        eprintln!("{hint}");
    }

    let mut request = ExportRequest::from(&composer.style().export);
    if let Some(format) = cli.format {
        request.format = format;
    }
    if let Some(quality) = cli.quality {
        request.quality = quality;
    }
    if let Some(width) = cli.width {
        request.width = width;
    }
    if let Some(height) = cli.height {
        request.height = height;
    }
    if cli.file_name.is_some() {
        request.file_name = cli.file_name;
    }

    let artifact = composer
        .export(request)
        .await
        .context("Export failed")?;
    let path = artifact
        .save_to(&cli.out)
        .with_context(|| format!("Failed to write into {}", cli.out.display()))?;

    println!(
        "Wrote {} ({}x{}, {} bytes)",
        path.display(),
        artifact.width,
        artifact.height,
        artifact.bytes.len()
    );
    Ok(())
}

fn load_style(path: Option<&Path>) -> Result<StyleState> {
    let Some(path) = path else {
        return Ok(StyleState::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read style {}", path.display()))?;
    StyleState::from_json(&json).with_context(|| format!("Invalid style {}", path.display()))
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}
