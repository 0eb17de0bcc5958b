use garde::Validate;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in image pixel coordinates, `(x0, y0)` top-left and
/// `(x1, y1)` bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

/// One object found by the detection model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Detection {
    #[garde(length(min = 1, max = 200))]
    pub label: String,

    #[garde(range(min = 0.0, max = 1.0))]
    pub confidence: f32,

    #[garde(custom(ordered_corners))]
    pub bbox: BoundingBox,
}

fn ordered_corners(bbox: &BoundingBox, _ctx: &()) -> garde::Result {
    let finite = [bbox.x0, bbox.y0, bbox.x1, bbox.y1]
        .iter()
        .all(|v| v.is_finite());
    if !finite {
        return Err(garde::Error::new("bounding box has non-finite coordinates"));
    }
    if bbox.x0 > bbox.x1 || bbox.y0 > bbox.y1 {
        return Err(garde::Error::new("bounding box corners are out of order"));
    }
    Ok(())
}
