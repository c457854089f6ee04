//! Decides whether a frame's detections differ enough from the previous frame
//! to be worth a notification.
use super::model::{BoundingBox, Detection};

/// A count change larger than this is a new scene regardless of geometry.
pub const MAX_COUNT_DELTA: usize = 2;
/// Scenes whose matched share is below this are new.
pub const SIMILARITY_THRESHOLD: f32 = 0.6;

/// Intersection over union of two axis-aligned boxes, in `[0, 1]`.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let intersection = (x2 - x1) * (y2 - y1);
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    (intersection / union).clamp(0.0, 1.0)
}

/// Share of `current` detections that have a same-category counterpart in
/// `previous` overlapping by more than `iou_threshold`. Each current detection
/// counts on its first match; `0.0` when `current` is empty.
pub fn similarity(current: &[Detection], previous: &[Detection], iou_threshold: f32) -> f32 {
    if current.is_empty() {
        return 0.0;
    }
    let matched = current
        .iter()
        .filter(|cur| {
            previous.iter().any(|prev| {
                prev.category == cur.category && iou(&cur.bbox, &prev.bbox) > iou_threshold
            })
        })
        .count();
    matched as f32 / current.len() as f32
}

pub fn is_new_scene(current: &[Detection], previous: &[Detection], iou_threshold: f32) -> bool {
    if previous.is_empty() {
        return true;
    }
    if current.len().abs_diff(previous.len()) > MAX_COUNT_DELTA {
        return true;
    }
    similarity(current, previous, iou_threshold) < SIMILARITY_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::model::{class_name, Category};

    fn boxed(x: f32, y: f32, size: f32) -> BoundingBox {
        BoundingBox::new(x, y, x + size, y + size)
    }

    fn detection(category: Category, bbox: BoundingBox) -> Detection {
        let class_id = match category {
            Category::People => 0,
            Category::Animals => 14,
            Category::Objects => 39,
        };
        Detection {
            class_id,
            class_name: class_name(class_id),
            category,
            confidence: 0.9,
            bbox,
        }
    }

    fn people_at(xs: &[f32]) -> Vec<Detection> {
        xs.iter()
            .map(|&x| detection(Category::People, boxed(x, 0.0, 10.0)))
            .collect()
    }

    #[test]
    fn iou_is_symmetric_bounded_and_reflexive() {
        let boxes = [
            boxed(0.0, 0.0, 10.0),
            boxed(5.0, 5.0, 10.0),
            boxed(20.0, 20.0, 3.0),
            BoundingBox::new(-4.0, 2.0, 8.0, 30.0),
            BoundingBox::new(1.5, 1.5, 2.5, 100.0),
        ];
        for a in &boxes {
            assert!((iou(a, a) - 1.0).abs() < 1e-6);
            for b in &boxes {
                let ab = iou(a, b);
                assert_eq!(ab, iou(b, a));
                assert!((0.0..=1.0).contains(&ab));
            }
        }
    }

    #[test]
    fn iou_of_disjoint_touching_and_degenerate_boxes_is_zero() {
        assert_eq!(iou(&boxed(0.0, 0.0, 10.0), &boxed(50.0, 50.0, 10.0)), 0.0);
        assert_eq!(iou(&boxed(0.0, 0.0, 10.0), &boxed(10.0, 0.0, 10.0)), 0.0);
        let point = BoundingBox::new(3.0, 3.0, 3.0, 3.0);
        assert_eq!(iou(&point, &point), 0.0);
    }

    #[test]
    fn iou_of_half_overlap() {
        // Two 10x10 boxes sharing a 5x10 strip: 50 / 150.
        let a = boxed(0.0, 0.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn first_detection_is_always_new() {
        assert!(is_new_scene(&people_at(&[0.0]), &[], 0.3));
    }

    #[test]
    fn large_count_change_short_circuits() {
        let previous = people_at(&[0.0, 100.0, 200.0]);
        // Every current box overlaps a previous one exactly, yet 6 vs 3 is new.
        let current = people_at(&[0.0, 100.0, 200.0, 0.0, 100.0, 200.0]);
        assert!(is_new_scene(&current, &previous, 0.3));
    }

    #[test]
    fn similarity_at_sixty_percent_is_not_new() {
        let previous = people_at(&[0.0, 100.0, 200.0, 300.0, 400.0]);
        let current = people_at(&[0.0, 100.0, 200.0, 1_000.0, 1_100.0]);
        assert!((similarity(&current, &previous, 0.3) - 0.6).abs() < 1e-6);
        assert!(!is_new_scene(&current, &previous, 0.3));
    }

    #[test]
    fn similarity_at_forty_percent_is_new() {
        let previous = people_at(&[0.0, 100.0, 200.0, 300.0, 400.0]);
        let current = people_at(&[0.0, 100.0, 900.0, 1_000.0, 1_100.0]);
        assert!((similarity(&current, &previous, 0.3) - 0.4).abs() < 1e-6);
        assert!(is_new_scene(&current, &previous, 0.3));
    }

    #[test]
    fn empty_current_against_non_empty_previous_is_new() {
        let previous = people_at(&[0.0, 100.0]);
        assert_eq!(similarity(&[], &previous, 0.3), 0.0);
        assert!(is_new_scene(&[], &previous, 0.3));
    }

    #[test]
    fn matches_require_the_same_category() {
        let previous = vec![detection(Category::Animals, boxed(0.0, 0.0, 10.0))];
        let current = vec![detection(Category::People, boxed(0.0, 0.0, 10.0))];
        assert!(is_new_scene(&current, &previous, 0.3));
    }

    #[test]
    fn iou_threshold_is_strict() {
        let a = boxed(0.0, 0.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        let overlap = iou(&a, &b);
        let previous = vec![detection(Category::People, a)];
        let current = vec![detection(Category::People, b)];
        assert_eq!(similarity(&current, &previous, overlap), 0.0);
        assert_eq!(similarity(&current, &previous, overlap - 0.01), 1.0);
    }
}
