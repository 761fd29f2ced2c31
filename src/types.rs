/// Rendered extent of an object in user units of the normalized root.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, width: f64, height: f64) -> Self {
        Self {
            min_x,
            min_y,
            width,
            height,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.min_x.is_finite()
            && self.min_y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width > 0.0
            && self.height > 0.0
    }

    /// `viewBox` attribute text.
    pub fn to_view_box(&self) -> String {
        format!(
            "{} {} {} {}",
            format_number(self.min_x),
            format_number(self.min_y),
            format_number(self.width),
            format_number(self.height)
        )
    }
}

/// Shortest round-tripping decimal form; never prints `-0`.
pub fn format_number(value: f64) -> String {
    let value = if value == 0.0 { 0.0 } else { value };
    format!("{value}")
}
