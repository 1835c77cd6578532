use serde::{Deserialize, Serialize};

use crate::{DisplayTransform, PageNumber, TextFragment};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HighlightRegion {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl HighlightRegion {
    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }

    pub fn right(&self) -> f32 {
        self.left + self.width
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacedHighlight {
    pub page: PageNumber,
    pub region: HighlightRegion,
}

pub fn compose<'a, I>(fragments: I, transform: &DisplayTransform) -> HighlightRegion
where
    I: IntoIterator<Item = &'a TextFragment>,
{
    let vertical_scale = transform.vertical_scale();
    let mut min_y = f32::INFINITY;
    let mut max_y = f32::NEG_INFINITY;

    for fragment in fragments {
        // the surface translation is the baseline; the run extends upward
        let surface = transform.to_surface(&fragment.transform);
        let baseline = surface.f;
        let top = baseline - fragment.height * vertical_scale;
        min_y = min_y.min(top);
        max_y = max_y.max(baseline);
    }

    if !min_y.is_finite() || !max_y.is_finite() {
        min_y = 0.0;
        max_y = 0.0;
    }

    HighlightRegion {
        left: 0.0,
        top: min_y,
        width: transform.surface_width() as f32,
        height: max_y - min_y,
    }
}
