//! Viewport-to-transform equivalence.
//!
//! A root `<svg>` with `width`/`height`/`viewBox`/`preserveAspectRatio` displays
//! its content exactly as a viewport without a `viewBox` whose content carries
//! `translate(tx ty) scale(sx sy)`. See "Computing a viewport's transform" in
//! SVG 2 (coords.html#ComputingAViewportsTransform).

use crate::error::TransformError;
use crate::types::format_number;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    Number,
    Px,
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Length {
    pub value: f64,
    pub unit: LengthUnit,
}

impl Length {
    /// Parses a unitless, `px` or `%` length. Other units cannot be resolved
    /// without a rendering context and are rejected.
    pub fn parse(raw: &str) -> Result<Self, TransformError> {
        let raw = raw.trim();
        let (number, unit) = if let Some(number) = raw.strip_suffix('%') {
            (number, LengthUnit::Percent)
        } else if let Some(number) = raw.strip_suffix("px") {
            (number, LengthUnit::Px)
        } else {
            (raw, LengthUnit::Number)
        };
        let value = number
            .trim()
            .parse::<f64>()
            .map_err(|_| TransformError::SizeUndetermined)?;
        if !value.is_finite() {
            return Err(TransformError::SizeUndetermined);
        }
        Ok(Self { value, unit })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewBox {
    pub min_x: f64,
    pub min_y: f64,
    pub width: f64,
    pub height: f64,
}

impl ViewBox {
    pub fn parse(raw: &str) -> Result<Self, TransformError> {
        let values: Vec<f64> = raw
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| TransformError::SizeUndetermined)?;
        let [min_x, min_y, width, height] = values[..] else {
            return Err(TransformError::SizeUndetermined);
        };
        if values.iter().any(|v| !v.is_finite()) || width <= 0.0 || height <= 0.0 {
            return Err(TransformError::SizeUndetermined);
        }
        Ok(Self {
            min_x,
            min_y,
            width,
            height,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisAlign {
    Min,
    Mid,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    None,
    Aligned { x: AxisAlign, y: AxisAlign },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeetOrSlice {
    Meet,
    Slice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreserveAspectRatio {
    pub align: Align,
    pub meet_or_slice: MeetOrSlice,
}

impl Default for PreserveAspectRatio {
    fn default() -> Self {
        Self {
            align: Align::Aligned {
                x: AxisAlign::Mid,
                y: AxisAlign::Mid,
            },
            meet_or_slice: MeetOrSlice::Meet,
        }
    }
}

impl PreserveAspectRatio {
    pub fn parse(raw: &str) -> Result<Self, TransformError> {
        let invalid = || TransformError::InvalidAspectRatio(raw.to_string());
        let mut tokens = raw.split_whitespace().peekable();
        // `defer` only matters for <image> referencing another SVG.
        if tokens.peek() == Some(&"defer") {
            tokens.next();
        }
        let mut out = Self::default();
        if let Some(align) = tokens.next() {
            out.align = parse_align(align).ok_or_else(invalid)?;
        }
        if let Some(meet_or_slice) = tokens.next() {
            out.meet_or_slice = match meet_or_slice {
                "meet" => MeetOrSlice::Meet,
                "slice" => MeetOrSlice::Slice,
                _ => return Err(invalid()),
            };
        }
        if tokens.next().is_some() {
            return Err(invalid());
        }
        Ok(out)
    }
}

fn parse_align(raw: &str) -> Option<Align> {
    if raw == "none" {
        return Some(Align::None);
    }
    let axis = |part: &str| match part {
        "Min" => Some(AxisAlign::Min),
        "Mid" => Some(AxisAlign::Mid),
        "Max" => Some(AxisAlign::Max),
        _ => None,
    };
    let rest = raw.strip_prefix('x')?;
    if rest.len() != 7 || !rest.is_char_boundary(3) {
        return None;
    }
    let (x, y) = rest.split_at(3);
    let y = y.strip_prefix('Y')?;
    Some(Align::Aligned {
        x: axis(x)?,
        y: axis(y)?,
    })
}

/// Raw viewport inputs of an `<svg>` element.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewportSpec {
    pub width: Option<Length>,
    pub height: Option<Length>,
    pub view_box: Option<ViewBox>,
    pub preserve_aspect_ratio: Option<PreserveAspectRatio>,
}

impl ViewportSpec {
    /// Reads attribute values; absent or blank values count as missing.
    pub fn from_attributes(
        width: Option<&str>,
        height: Option<&str>,
        view_box: Option<&str>,
        preserve_aspect_ratio: Option<&str>,
    ) -> Result<Self, TransformError> {
        fn present(value: Option<&str>) -> Option<&str> {
            value.filter(|v| !v.trim().is_empty())
        }
        Ok(Self {
            width: present(width).map(Length::parse).transpose()?,
            height: present(height).map(Length::parse).transpose()?,
            view_box: present(view_box).map(ViewBox::parse).transpose()?,
            preserve_aspect_ratio: present(preserve_aspect_ratio)
                .map(PreserveAspectRatio::parse)
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransformOp {
    Translate(f64, f64),
    Scale(f64, f64),
}

impl fmt::Display for TransformOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformOp::Translate(tx, ty) => {
                write!(f, "translate({} {})", format_number(*tx), format_number(*ty))
            }
            TransformOp::Scale(sx, sy) => {
                write!(f, "scale({} {})", format_number(*sx), format_number(*sy))
            }
        }
    }
}

/// Space-separated `transform` attribute text.
pub fn transform_to_string(ops: &[TransformOp]) -> String {
    ops.iter()
        .map(|op| op.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

// Effective viewport extent along one axis.
fn resolve_dimension(length: Option<Length>, extent: Option<f64>) -> Result<f64, TransformError> {
    let value = match (length, extent) {
        (Some(length), Some(extent)) if length.unit == LengthUnit::Percent => {
            if length.value <= 0.0 {
                return Err(TransformError::SizeUndetermined);
            }
            length.value * extent / 100.0
        }
        (Some(length), _) if length.unit == LengthUnit::Percent => {
            return Err(TransformError::SizeUndetermined);
        }
        (Some(length), _) => length.value,
        (None, Some(extent)) => extent,
        (None, None) => return Err(TransformError::SizeUndetermined),
    };
    if value <= 0.0 || !value.is_finite() {
        return Err(TransformError::SizeUndetermined);
    }
    Ok(value)
}

/// Ops equivalent to the viewport; identity ops are left out, so a viewport
/// without a `viewBox` yields an empty list.
pub fn compute_transform(spec: &ViewportSpec) -> Result<Vec<TransformOp>, TransformError> {
    let extent_x = spec.view_box.map(|vb| vb.width);
    let extent_y = spec.view_box.map(|vb| vb.height);
    let width = resolve_dimension(spec.width, extent_x)?;
    let height = resolve_dimension(spec.height, extent_y)?;

    let Some(vb) = spec.view_box else {
        return Ok(Vec::new());
    };
    let par = spec.preserve_aspect_ratio.unwrap_or_default();

    let mut sx = width / vb.width;
    let mut sy = height / vb.height;
    if let Align::Aligned { .. } = par.align {
        let s = match par.meet_or_slice {
            MeetOrSlice::Meet => sx.min(sy),
            MeetOrSlice::Slice => sx.max(sy),
        };
        sx = s;
        sy = s;
    }

    let mut tx = -vb.min_x * sx;
    let mut ty = -vb.min_y * sy;
    if let Align::Aligned { x, y } = par.align {
        tx += axis_offset(x, width - vb.width * sx);
        ty += axis_offset(y, height - vb.height * sy);
    }

    let mut ops = Vec::new();
    if tx != 0.0 || ty != 0.0 {
        ops.push(TransformOp::Translate(tx, ty));
    }
    if sx != 1.0 || sy != 1.0 {
        ops.push(TransformOp::Scale(sx, sy));
    }
    Ok(ops)
}

fn axis_offset(align: AxisAlign, free_space: f64) -> f64 {
    match align {
        AxisAlign::Min => 0.0,
        AxisAlign::Mid => free_space / 2.0,
        AxisAlign::Max => free_space,
    }
}

/// Attribute-level entry point: parse, then compute.
pub fn viewport_transform(
    width: Option<&str>,
    height: Option<&str>,
    view_box: Option<&str>,
    preserve_aspect_ratio: Option<&str>,
) -> Result<Vec<TransformOp>, TransformError> {
    let spec = ViewportSpec::from_attributes(width, height, view_box, preserve_aspect_ratio)?;
    compute_transform(&spec)
}
