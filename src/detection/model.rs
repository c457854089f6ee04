use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::CameraConfig;

/// COCO class names, indexed by class id.
pub const CLASS_NAMES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat",
    "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack",
    "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball",
    "kite", "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket",
    "bottle", "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple",
    "sandwich", "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair",
    "couch", "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink",
    "refrigerator", "book", "clock", "vase", "scissors", "teddy bear", "hair drier",
    "toothbrush",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    People,
    Objects,
    Animals,
}

impl Category {
    /// Maps a class id to its category; ids outside the table map to nothing.
    ///
    /// The object range starts at 15, so the animal classes from cat to giraffe
    /// resolve to objects and only bird (14) is an animal.
    pub fn for_class(class_id: u32) -> Option<Self> {
        match class_id {
            0 => Some(Category::People),
            15..=79 => Some(Category::Objects),
            14 => Some(Category::Animals),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::People => "people",
            Category::Objects => "objects",
            Category::Animals => "animals",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn class_name(class_id: u32) -> &'static str {
    CLASS_NAMES
        .get(class_id as usize)
        .copied()
        .unwrap_or("unknown")
}

/// Axis-aligned box in `x1, y1, x2, y2` pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1) * (self.y2 - self.y1)
    }

    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            x1: self.x1 * sx,
            y1: self.y1 * sy,
            x2: self.x2 * sx,
            y2: self.y2 * sy,
        }
    }
}

/// Detector output before filtering and labelling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub class_id: u32,
    pub class_name: &'static str,
    pub category: Category,
    pub confidence: f32,
    /// In source-frame coordinates.
    pub bbox: BoundingBox,
}

/// Keeps detections that pass the camera's confidence threshold, map to a
/// category, and whose category is enabled for the camera.
pub fn classify(raw: Vec<RawDetection>, camera: &CameraConfig) -> Vec<Detection> {
    raw.into_iter()
        .filter(|d| d.confidence >= camera.confidence_threshold)
        .filter_map(|d| {
            let category = Category::for_class(d.class_id)?;
            camera.categories.is_enabled(category).then(|| Detection {
                class_id: d.class_id,
                class_name: class_name(d.class_id),
                category,
                confidence: d.confidence,
                bbox: d.bbox,
            })
        })
        .collect()
}
