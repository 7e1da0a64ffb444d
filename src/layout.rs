use serde_json::Value;

use crate::error::{CdpError, Result};

/// A position in page coordinates.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// The four corners of one box-model quad.
#[derive(Debug, Copy, Clone)]
pub struct ElementQuad {
    pub top_left: Point,
    pub top_right: Point,
    pub bottom_right: Point,
    pub bottom_left: Point,
}

impl ElementQuad {
    /// Build a quad from the raw 8-element coordinate array the `DOM` domain
    /// reports.
    pub fn from_raw(raw: &[f64]) -> Result<Self> {
        if raw.len() != 8 {
            return Err(CdpError::msg(format!(
                "malformed quad with {} coordinates",
                raw.len()
            )));
        }
        Ok(Self {
            top_left: Point::new(raw[0], raw[1]),
            top_right: Point::new(raw[2], raw[3]),
            bottom_right: Point::new(raw[4], raw[5]),
            bottom_left: Point::new(raw[6], raw[7]),
        })
    }

    /// Parse the quad out of a box-model json payload field.
    pub fn from_json(value: &Value) -> Result<Self> {
        let raw: Vec<f64> = value
            .as_array()
            .map(|a| a.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();
        Self::from_raw(&raw)
    }

    /// The centroid of the quad.
    pub fn quad_center(&self) -> Point {
        Point {
            x: (self.top_left.x + self.top_right.x + self.bottom_right.x + self.bottom_left.x) / 4.,
            y: (self.top_left.y + self.top_right.y + self.bottom_right.y + self.bottom_left.y) / 4.,
        }
    }
}
