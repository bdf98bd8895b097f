//! Keyboard and touch state

use std::collections::HashSet;

#[derive(Default)]
pub struct Keys {
    pressed: HashSet<String>,
}

impl Keys {
    pub fn down(&mut self, key: String) {
        self.pressed.insert(key.to_lowercase());
    }

    pub fn up(&mut self, key: &str) {
        self.pressed.remove(&key.to_lowercase());
    }

    /// Window lost focus: no key-up events will arrive
    pub fn clear(&mut self) {
        self.pressed.clear();
    }

    pub fn is_pressed(&self, key: &str) -> bool {
        self.pressed.contains(key)
    }

    pub fn len(&self) -> usize {
        self.pressed.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Touch {
    None,
    Single([f64; 2]),
    Double([f64; 2], [f64; 2]),
}

/// A gesture derived from two consecutive touch states
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gesture {
    /// Single-finger drag, as a fraction of the viewport
    Drag { dx: f64, dy: f64 },
    /// Two-finger pinch; ratio of current to previous finger distance
    Pinch(f64),
}

pub struct Touches {
    previous: Touch,
    current: Touch,
    last_event_ms: Option<f64>,
}

impl Default for Touches {
    fn default() -> Self {
        Touches {
            previous: Touch::None,
            current: Touch::None,
            last_event_ms: None,
        }
    }
}

impl Touches {

    fn push(&mut self, ms: f64, touch: Touch) {
        self.previous = self.current;
        self.current = touch;
        self.last_event_ms = Some(ms);
    }

    fn from_points(x: &[f64], y: &[f64]) -> Touch {
        match (x, y) {
            ([x0], [y0]) => Touch::Single([*x0, *y0]),
            ([x0, x1, ..], [y0, y1, ..]) => Touch::Double([*x0, *y0], [*x1, *y1]),
            _ => Touch::None,
        }
    }

    /// A new touch starts a fresh gesture
    pub fn start(&mut self, ms: f64, x: &[f64], y: &[f64]) {
        let touch = Self::from_points(x, y);
        self.previous = touch;
        self.current = touch;
        self.last_event_ms = Some(ms);
    }

    pub fn moved(&mut self, ms: f64, x: &[f64], y: &[f64]) {
        self.push(ms, Self::from_points(x, y));
    }

    pub fn end(&mut self, ms: f64) {
        self.push(ms, Touch::None);
    }

    pub fn is_touching(&self) -> bool {
        self.current != Touch::None
    }

    /// Consume the movement since the last call
    ///
    /// Drags are measured against the viewport as it is now; an empty viewport
    /// yields no drag.
    pub fn take_gesture(&mut self, width: f64, height: f64) -> Option<Gesture> {
        let gesture = match (self.previous, self.current) {
            (Touch::Single(a), Touch::Single(b)) if a != b && width > 0.0 && height > 0.0 => {
                Some(Gesture::Drag {
                    dx: (b[0] - a[0]) / width,
                    dy: (b[1] - a[1]) / height,
                })
            }
            (Touch::Double(a0, a1), Touch::Double(b0, b1)) => {
                let before = ((a1[0] - a0[0]).powi(2) + (a1[1] - a0[1]).powi(2)).sqrt();
                let after = ((b1[0] - b0[0]).powi(2) + (b1[1] - b0[1]).powi(2)).sqrt();
                if before > 0.0 && before != after {
                    Some(Gesture::Pinch(after / before))
                } else {
                    None
                }
            }
            _ => None,
        };
        self.previous = self.current;
        gesture
    }
}
