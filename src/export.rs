//! PowerPoint export of a planning outcome.
//!
//! The deck is assembled directly as an OOXML package: a title slide with the
//! theme and date, the diagram rasterized to PNG, then the analysis split over
//! text slides. Part templates live in `templates/pptx/` and are embedded at
//! compile time like the prompt templates.

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use minijinja::{context, AutoEscape, Environment};
use resvg::{tiny_skia, usvg};
use serde::Serialize;
use tracing::{info, instrument, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::constants::{
    PPTX_DIAGRAM_SCALE, PPTX_PARAGRAPHS_PER_SLIDE, PPTX_SLIDE_HEIGHT_EMU, PPTX_SLIDE_WIDTH_EMU,
};
use crate::error::ExportError;
use crate::pipeline::PlanningOutcome;

pub const PPTX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

const DIAGRAM_SLIDE_TITLE: &str = "LP企画 - ビジュアル提案";
const UNTITLED_ANALYSIS_SLIDE: &str = "分析とポイント";
const RASTERIZE_FAILED: &str = "SVG図を画像に変換できませんでした。SVGファイルを別途ご利用ください。";

const EMU_PER_INCH: i64 = 914_400;

const TEMPLATES: [(&str, &str); 12] = [
    ("content_types.xml", include_str!("../templates/pptx/content_types.xml")),
    ("root.rels", include_str!("../templates/pptx/root.rels")),
    ("core.xml", include_str!("../templates/pptx/core.xml")),
    ("presentation.xml", include_str!("../templates/pptx/presentation.xml")),
    ("presentation.xml.rels", include_str!("../templates/pptx/presentation.xml.rels")),
    ("slide_master.xml", include_str!("../templates/pptx/slide_master.xml")),
    ("slide_master.xml.rels", include_str!("../templates/pptx/slide_master.xml.rels")),
    ("slide_layout.xml", include_str!("../templates/pptx/slide_layout.xml")),
    ("slide_layout.xml.rels", include_str!("../templates/pptx/slide_layout.xml.rels")),
    ("theme.xml", include_str!("../templates/pptx/theme.xml")),
    ("slide.xml", include_str!("../templates/pptx/slide.xml")),
    ("slide.xml.rels", include_str!("../templates/pptx/slide.xml.rels")),
];

lazy_static::lazy_static! {
    static ref PARTS: Environment<'static> = {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        // Every part is XML; HTML escaping produces valid character references.
        env.set_auto_escape_callback(|_| AutoEscape::Html);
        env.set_loader(|name| {
            Ok(TEMPLATES
                .iter()
                .find(|(template, _)| *template == name)
                .map(|(_, source)| source.to_string()))
        });
        env
    };

    static ref FONTS: Arc<usvg::fontdb::Database> = {
        let mut fonts = usvg::fontdb::Database::new();
        fonts.load_system_fonts();
        Arc::new(fonts)
    };
}

/// One text slide built from the analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisSlide {
    pub title: String,
    pub paragraphs: Vec<String>,
}

/// Split analysis text into slides.
///
/// Paragraphs are separated by blank lines. A markdown heading (`#` to `###`)
/// starts a new slide titled with the heading; a slide that collects more
/// than [`PPTX_PARAGRAPHS_PER_SLIDE`] paragraphs is closed early.
pub fn analysis_slides(analysis: &str) -> Vec<AnalysisSlide> {
    let mut slides = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for paragraph in analysis.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if heading(paragraph).is_some() {
            flush(&mut slides, &mut current);
            current.push(paragraph);
            continue;
        }
        current.push(paragraph);
        let body_len = current.len() - usize::from(heading(current[0]).is_some());
        if body_len > PPTX_PARAGRAPHS_PER_SLIDE {
            flush(&mut slides, &mut current);
        }
    }
    flush(&mut slides, &mut current);
    slides
}

fn heading(paragraph: &str) -> Option<&str> {
    ["### ", "## ", "# "]
        .iter()
        .find_map(|marker| paragraph.strip_prefix(marker))
        .map(|rest| rest.lines().next().unwrap_or_default().trim())
}

fn flush(slides: &mut Vec<AnalysisSlide>, current: &mut Vec<&str>) {
    if current.is_empty() {
        return;
    }
    let (title, body) = match heading(current[0]) {
        Some(title) => {
            // Lines under the heading in the same paragraph stay as body text.
            let mut body = Vec::new();
            if let Some((_, rest)) = current[0].split_once('\n') {
                body.push(rest.trim().to_string());
            }
            body.extend(current[1..].iter().map(|p| p.to_string()));
            (title.to_string(), body)
        }
        None => (
            UNTITLED_ANALYSIS_SLIDE.to_string(),
            current.iter().map(|p| p.to_string()).collect(),
        ),
    };
    slides.push(AnalysisSlide { title, paragraphs: body });
    current.clear();
}

/// Download name: `lp_planning_<theme>_<timestamp>.pptx`.
///
/// The theme is reduced to word characters, lowercased, spaces turned into
/// underscores and cut at 30 characters.
pub fn pptx_filename(theme: &str, created: DateTime<Local>) -> String {
    let cleaned: String = theme
        .trim()
        .chars()
        .filter_map(|c| match c {
            c if c.is_whitespace() => Some('_'),
            c if c.is_alphanumeric() || c == '_' || c == '-' => Some(c),
            _ => None,
        })
        .flat_map(char::to_lowercase)
        .take(30)
        .collect();
    let stamp = created.format("%Y%m%d_%H%M%S");
    if cleaned.is_empty() {
        format!("lp_planning_{}.pptx", stamp)
    } else {
        format!("lp_planning_{}_{}.pptx", cleaned, stamp)
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
struct Frame {
    x: i64,
    y: i64,
    cx: i64,
    cy: i64,
}

#[derive(Debug, Clone, Serialize)]
struct TextBox {
    frame: Frame,
    /// Hundredths of a point.
    size: u32,
    bold: bool,
    centered: bool,
    lines: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Slide {
    boxes: Vec<TextBox>,
    picture: Option<Frame>,
}

fn inches(value: f64) -> i64 {
    (value * EMU_PER_INCH as f64).round() as i64
}

fn full_width(y: f64, height: f64) -> Frame {
    Frame {
        x: inches(0.5),
        y: inches(y),
        cx: PPTX_SLIDE_WIDTH_EMU - inches(1.0),
        cy: inches(height),
    }
}

fn slide_title(text: &str) -> TextBox {
    TextBox {
        frame: full_width(0.3, 0.8),
        size: 2800,
        bold: true,
        centered: false,
        lines: vec![text.to_string()],
    }
}

fn body(paragraphs: &[String]) -> TextBox {
    TextBox {
        frame: full_width(1.3, 5.7),
        size: 1600,
        bold: false,
        centered: false,
        lines: paragraphs
            .iter()
            .flat_map(|p| p.lines())
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
    }
}

fn title_slide(theme: &str, created: DateTime<Local>) -> Slide {
    Slide {
        boxes: vec![
            TextBox {
                frame: full_width(2.3, 1.2),
                size: 4000,
                bold: true,
                centered: true,
                lines: vec![format!("{} - LP企画設計", theme)],
            },
            TextBox {
                frame: full_width(3.7, 0.8),
                size: 2000,
                bold: false,
                centered: true,
                lines: vec![format!("作成日時: {}", created.format("%Y年%m月%d日"))],
            },
        ],
        picture: None,
    }
}

/// Picture frame 5 inches tall, 1 inch from the top, centred horizontally.
fn picture_frame(width_px: u32, height_px: u32) -> Frame {
    let max_cx = PPTX_SLIDE_WIDTH_EMU - inches(1.0);
    let mut cy = inches(5.0);
    let mut cx = (cy as f64 * width_px as f64 / height_px as f64).round() as i64;
    if cx > max_cx {
        cy = (cy as f64 * max_cx as f64 / cx as f64).round() as i64;
        cx = max_cx;
    }
    Frame {
        x: (PPTX_SLIDE_WIDTH_EMU - cx) / 2,
        y: inches(1.0),
        cx,
        cy,
    }
}

/// A rendered diagram: PNG bytes and pixel size.
struct Raster {
    png: Vec<u8>,
    width: u32,
    height: u32,
}

fn rasterize(svg: &str) -> Result<Raster, ExportError> {
    let options = usvg::Options {
        fontdb: FONTS.clone(),
        ..usvg::Options::default()
    };
    let tree = usvg::Tree::from_str(svg, &options).map_err(|e| ExportError::Rasterize(e.to_string()))?;

    let width = (tree.size().width() * PPTX_DIAGRAM_SCALE).ceil() as u32;
    let height = (tree.size().height() * PPTX_DIAGRAM_SCALE).ceil() as u32;
    let mut pixmap = tiny_skia::Pixmap::new(width, height)
        .ok_or_else(|| ExportError::Rasterize(format!("invalid canvas {}x{}", width, height)))?;
    pixmap.fill(tiny_skia::Color::WHITE);
    resvg::render(
        &tree,
        tiny_skia::Transform::from_scale(PPTX_DIAGRAM_SCALE, PPTX_DIAGRAM_SCALE),
        &mut pixmap.as_mut(),
    );

    let png = pixmap.encode_png().map_err(|e| ExportError::Rasterize(e.to_string()))?;
    Ok(Raster { png, width, height })
}

fn render(name: &str, ctx: minijinja::Value) -> Result<String, ExportError> {
    Ok(PARTS.get_template(name)?.render(ctx)?)
}

fn write_part(zip: &mut ZipWriter<Cursor<Vec<u8>>>, path: &str, xml: &str) -> Result<(), ExportError> {
    zip.start_file(path, SimpleFileOptions::default().compression_method(CompressionMethod::Deflated))?;
    zip.write_all(xml.as_bytes())?;
    Ok(())
}

/// Build the `.pptx` bytes for one outcome.
///
/// A diagram that cannot be rasterized is replaced by a note on its slide;
/// the rest of the deck is still produced.
#[instrument(skip_all, fields(theme = %outcome.theme))]
pub fn build_pptx(outcome: &PlanningOutcome, created: DateTime<Local>) -> Result<Vec<u8>, ExportError> {
    let raster = match rasterize(&outcome.diagram) {
        Ok(raster) => Some(raster),
        Err(e) => {
            warn!(error = %e, "Exporting without diagram image");
            None
        }
    };

    let mut diagram_slide = Slide {
        boxes: vec![slide_title(DIAGRAM_SLIDE_TITLE)],
        picture: raster.as_ref().map(|r| picture_frame(r.width, r.height)),
    };
    if raster.is_none() {
        diagram_slide.boxes.push(body(&[RASTERIZE_FAILED.to_string()]));
    }

    let mut slides = vec![title_slide(&outcome.theme, created), diagram_slide];
    slides.extend(analysis_slides(&outcome.analysis).into_iter().map(|slide| Slide {
        boxes: vec![slide_title(&slide.title), body(&slide.paragraphs)],
        picture: None,
    }));

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let ctx = context! {
        slides => &slides,
        width => PPTX_SLIDE_WIDTH_EMU,
        height => PPTX_SLIDE_HEIGHT_EMU,
    };
    write_part(&mut zip, "[Content_Types].xml", &render("content_types.xml", ctx.clone())?)?;
    write_part(&mut zip, "_rels/.rels", &render("root.rels", ctx.clone())?)?;
    let core = render(
        "core.xml",
        context! {
            title => format!("{} - LP企画設計", outcome.theme),
            created => created.with_timezone(&Utc).format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        },
    )?;
    write_part(&mut zip, "docProps/core.xml", &core)?;
    write_part(&mut zip, "ppt/presentation.xml", &render("presentation.xml", ctx.clone())?)?;
    write_part(&mut zip, "ppt/_rels/presentation.xml.rels", &render("presentation.xml.rels", ctx)?)?;

    for (path, template) in [
        ("ppt/slideMasters/slideMaster1.xml", "slide_master.xml"),
        ("ppt/slideMasters/_rels/slideMaster1.xml.rels", "slide_master.xml.rels"),
        ("ppt/slideLayouts/slideLayout1.xml", "slide_layout.xml"),
        ("ppt/slideLayouts/_rels/slideLayout1.xml.rels", "slide_layout.xml.rels"),
        ("ppt/theme/theme1.xml", "theme.xml"),
    ] {
        write_part(&mut zip, path, &render(template, context! {})?)?;
    }

    for (idx, slide) in slides.iter().enumerate() {
        let number = idx + 1;
        let xml = render("slide.xml", context! { slide => slide })?;
        write_part(&mut zip, &format!("ppt/slides/slide{}.xml", number), &xml)?;
        let rels = render("slide.xml.rels", context! { slide => slide })?;
        write_part(&mut zip, &format!("ppt/slides/_rels/slide{}.xml.rels", number), &rels)?;
    }

    if let Some(raster) = &raster {
        // PNG data is already compressed.
        zip.start_file(
            "ppt/media/image1.png",
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
        )?;
        zip.write_all(&raster.png)?;
    }

    let bytes = zip.finish()?.into_inner();
    info!(slides = slides.len(), bytes = bytes.len(), "Built PowerPoint export");
    Ok(bytes)
}

fn is_pptx_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("pptx"))
}

/// Save `outcome` to `path`: a deck when the extension is `.pptx`, the SVG
/// markup otherwise.
pub async fn save_outcome(outcome: &PlanningOutcome, path: &Path) -> Result<(), ExportError> {
    let bytes = if is_pptx_path(path) {
        build_pptx(outcome, Local::now())?
    } else {
        outcome.diagram.as_bytes().to_vec()
    };
    tokio::fs::write(path, bytes).await?;
    info!(path = %path.display(), "Saved planning outcome");
    Ok(())
}
