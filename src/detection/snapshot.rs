//! Annotated snapshots and the detection notification text.
use ab_glyph::{FontArc, PxScale};
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::model::{Category, Detection};
use super::source::Frame;
use crate::alerting::messages::TIMESTAMP_FORMAT;

const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: f32 = 16.0;
const STAMP_SCALE: f32 = 22.0;
const STAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

pub fn category_color(category: Category) -> Rgb<u8> {
    match category {
        Category::People => Rgb([0, 255, 0]),
        Category::Objects => Rgb([0, 0, 255]),
        Category::Animals => Rgb([255, 0, 0]),
    }
}

/// Reads the TrueType font used for labels and the timestamp. Without one,
/// snapshots carry boxes only.
pub fn load_font(path: &Path) -> Option<FontArc> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = ?path, error = %e, "Label font unavailable, snapshots will have no text.");
            return None;
        }
    };
    match FontArc::try_from_vec(bytes) {
        Ok(font) => Some(font),
        Err(e) => {
            warn!(path = ?path, error = %e, "Label font is not a usable font.");
            None
        }
    }
}

/// Resizes the frame to the analysis size and outlines every detection in its
/// category colour. With a font, each box also gets a `name NN.N%` label and
/// the capture time is stamped in the top-left corner.
pub fn annotate(
    frame: &Frame,
    detections: &[Detection],
    font: Option<&FontArc>,
    at: DateTime<Local>,
) -> RgbImage {
    let (mut canvas, sx, sy) = frame.for_analysis();
    let (max_x, max_y) = (canvas.width() as f32 - 1.0, canvas.height() as f32 - 1.0);
    for detection in detections {
        let bbox = detection.bbox.scaled(1.0 / sx, 1.0 / sy);
        let x1 = bbox.x1.clamp(0.0, max_x).round() as i32;
        let y1 = bbox.y1.clamp(0.0, max_y).round() as i32;
        let x2 = bbox.x2.clamp(0.0, max_x).round() as i32;
        let y2 = bbox.y2.clamp(0.0, max_y).round() as i32;
        let color = category_color(detection.category);

        for inset in 0..BOX_THICKNESS {
            let width = x2 - x1 - 2 * inset;
            let height = y2 - y1 - 2 * inset;
            if width <= 0 || height <= 0 {
                break;
            }
            draw_hollow_rect_mut(
                &mut canvas,
                Rect::at(x1 + inset, y1 + inset).of_size(width as u32, height as u32),
                color,
            );
        }

        if let Some(font) = font {
            if x2 > x1 && y2 > y1 {
                draw_label(&mut canvas, font, detection, x1, y1, color);
            }
        }
    }

    if let Some(font) = font {
        let stamp = at.format(STAMP_FORMAT).to_string();
        draw_text_mut(&mut canvas, WHITE, 10, 10, PxScale::from(STAMP_SCALE), font, &stamp);
    }
    canvas
}

/// Filled tag above the box, pushed inside the image when the box touches the top.
fn draw_label(
    canvas: &mut RgbImage,
    font: &FontArc,
    detection: &Detection,
    x: i32,
    y: i32,
    color: Rgb<u8>,
) {
    let scale = PxScale::from(LABEL_SCALE);
    let label = format!("{} {:.1}%", detection.class_name, detection.confidence * 100.0);
    let (text_width, text_height) = text_size(scale, font, &label);
    let text_height = text_height as i32;
    let baseline = (y - 10).max(text_height + 5);

    draw_filled_rect_mut(
        canvas,
        Rect::at(x, baseline - text_height - 5)
            .of_size(text_width + 5, text_height as u32 + 10),
        color,
    );
    draw_text_mut(canvas, WHITE, x + 2, baseline - text_height - 2, scale, font, &label);
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100)).encode_image(image)?;
    Ok(jpeg)
}

pub fn snapshot_path(save_dir: &Path, camera_name: &str, at: DateTime<Local>) -> PathBuf {
    let safe_name: String = camera_name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    save_dir.join(format!("{safe_name}_{}.jpg", at.format("%Y%m%d_%H%M%S")))
}

/// Writes a permanent copy of the snapshot.
pub async fn save_snapshot(
    save_dir: &Path,
    camera_name: &str,
    at: DateTime<Local>,
    jpeg: &[u8],
) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(save_dir).await?;
    let path = snapshot_path(save_dir, camera_name, at);
    tokio::fs::write(&path, jpeg).await?;
    info!(path = ?path, "Snapshot saved.");
    Ok(path)
}

pub fn detection_message(
    camera_name: &str,
    detections: &[Detection],
    at: DateTime<Local>,
    locale: &str,
) -> String {
    let title = t!("detection.title", locale = locale, camera = camera_name).into_owned();
    let mut sections = vec![title];

    for category in [Category::People, Category::Objects, Category::Animals] {
        let items: Vec<String> = detections
            .iter()
            .filter(|d| d.category == category)
            .map(|d| {
                let label = d.class_name;
                let confidence = format!("{:.1}", d.confidence * 100.0);
                t!("detection.item", locale = locale, label = label, confidence = confidence)
                    .into_owned()
            })
            .collect();
        if items.is_empty() {
            continue;
        }
        let header = match category {
            Category::People => t!("detection.people", locale = locale),
            Category::Objects => t!("detection.objects", locale = locale),
            Category::Animals => t!("detection.animals", locale = locale),
        };
        sections.push(format!("{header}\n{}", items.join("\n")));
    }

    let timestamp = at.format(TIMESTAMP_FORMAT).to_string();
    sections.push(t!("detection.time", locale = locale, timestamp = timestamp).into_owned());
    sections.join("\n\n")
}
