//! RGB <-> CIE xy conversion within a lamp's color gamut
//!
//! Hue lamps can only reproduce colors inside a triangle of the CIE 1931
//! chromaticity diagram. The triangle depends on the hardware generation
//! (gamut A, B or C) which is derived from the model number. Colors
//! outside the triangle are moved to the closest reachable point.

/// A point of the CIE 1931 xy chromaticity diagram
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XyPoint {
    pub x: f64,
    pub y: f64,
}

impl XyPoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn cross(self, other: XyPoint) -> f64 {
        self.x * other.y - self.y * other.x
    }

    fn dot(self, other: XyPoint) -> f64 {
        self.x * other.x + self.y * other.y
    }

    fn minus(self, other: XyPoint) -> XyPoint {
        XyPoint::new(self.x - other.x, self.y - other.y)
    }

    fn distance(self, other: XyPoint) -> f64 {
        let d = self.minus(other);
        d.dot(d).sqrt()
    }
}

/// Color triangle reachable by a lamp
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gamut {
    pub red: XyPoint,
    pub green: XyPoint,
    pub blue: XyPoint,
}

impl Gamut {
    /// Hue bulbs and LivingColors of the first generation
    pub const A: Gamut = Gamut {
        red: XyPoint::new(0.704, 0.296),
        green: XyPoint::new(0.2151, 0.7106),
        blue: XyPoint::new(0.138, 0.08),
    };

    /// Hue white and color bulbs of the first generation
    pub const B: Gamut = Gamut {
        red: XyPoint::new(0.675, 0.322),
        green: XyPoint::new(0.4091, 0.518),
        blue: XyPoint::new(0.167, 0.04),
    };

    /// Current white and color ambiance lamps, including the Bluetooth ones
    pub const C: Gamut = Gamut {
        red: XyPoint::new(0.692, 0.308),
        green: XyPoint::new(0.17, 0.7),
        blue: XyPoint::new(0.153, 0.048),
    };

    pub fn contains(&self, p: XyPoint) -> bool {
        let v1 = self.green.minus(self.red);
        let v2 = self.blue.minus(self.red);
        let q = p.minus(self.red);
        let s = q.cross(v2) / v1.cross(v2);
        let t = v1.cross(q) / v1.cross(v2);
        s >= 0.0 && t >= 0.0 && s + t <= 1.0
    }

    /// The point of the triangle closest to `p`
    pub fn closest(&self, p: XyPoint) -> XyPoint {
        if self.contains(p) {
            return p;
        }
        let candidates = [
            closest_on_segment(self.red, self.green, p),
            closest_on_segment(self.blue, self.red, p),
            closest_on_segment(self.green, self.blue, p),
        ];
        candidates
            .into_iter()
            .min_by(|a, b| a.distance(p).total_cmp(&b.distance(p)))
            .unwrap_or(self.red)
    }
}

fn closest_on_segment(a: XyPoint, b: XyPoint, p: XyPoint) -> XyPoint {
    let ap = p.minus(a);
    let ab = b.minus(a);
    let t = (ap.dot(ab) / ab.dot(ab)).clamp(0.0, 1.0);
    XyPoint::new(a.x + ab.x * t, a.y + ab.y * t)
}

/// Gamut of a known model, `None` when the model number is not recognized
pub fn gamut_for_model(model: &str) -> Option<Gamut> {
    match model {
        "LST001" | "LLC005" | "LLC006" | "LLC007" | "LLC010" | "LLC011" | "LLC012"
        | "LLC013" | "LLC014" => Some(Gamut::A),
        "LCT001" | "LCT002" | "LCT003" | "LCT007" | "LLM001" => Some(Gamut::B),
        "LCT010" | "LCT011" | "LCT012" | "LCT014" | "LCT015" | "LCT016" | "LLC020"
        | "LST002" | "LCA001" | "LCA002" | "LCA003" | "LCT024" | "LCT026" => Some(Gamut::C),
        _ => None,
    }
}

/// Normalized RGB, each channel in `0.0..=1.0`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Rgb {
    pub fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }
}

/// D65 white point, used for black which has no chromaticity
const WHITE: XyPoint = XyPoint::new(0.3127, 0.3290);

fn gamma_expand(v: f64) -> f64 {
    if v > 0.04045 {
        ((v + 0.055) / 1.055).powf(2.4)
    } else {
        v / 12.92
    }
}

fn gamma_compress(v: f64) -> f64 {
    if v <= 0.0031308 {
        12.92 * v
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

/// Converts between RGB and xy for one gamut
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Converter {
    gamut: Gamut,
}

impl Default for Converter {
    fn default() -> Self {
        Self::new(Gamut::C)
    }
}

impl Converter {
    pub fn new(gamut: Gamut) -> Self {
        Self { gamut }
    }

    /// Converter for a model number, falling back to gamut C for unknown models
    pub fn for_model(model: &str) -> Self {
        gamut_for_model(model).map(Self::new).unwrap_or_default()
    }

    pub fn gamut(&self) -> Gamut {
        self.gamut
    }

    pub fn rgb_to_xy(&self, rgb: Rgb) -> XyPoint {
        let r = gamma_expand(rgb.r.clamp(0.0, 1.0));
        let g = gamma_expand(rgb.g.clamp(0.0, 1.0));
        let b = gamma_expand(rgb.b.clamp(0.0, 1.0));

        let x = r * 0.664511 + g * 0.154324 + b * 0.162028;
        let y = r * 0.283881 + g * 0.668433 + b * 0.047685;
        let z = r * 0.000088 + g * 0.072310 + b * 0.986039;

        let sum = x + y + z;
        let point = if sum > 0.0 {
            XyPoint::new(x / sum, y / sum)
        } else {
            WHITE
        };
        self.gamut.closest(point)
    }

    /// Full-brightness RGB for an xy color
    pub fn xy_to_rgb(&self, point: XyPoint) -> Rgb {
        let p = self.gamut.closest(point);

        let y = 1.0;
        let x = (y / p.y) * p.x;
        let z = (y / p.y) * (1.0 - p.x - p.y);

        let r = x * 1.656492 - y * 0.354851 - z * 0.255038;
        let g = -x * 0.707196 + y * 1.655397 + z * 0.036152;
        let b = x * 0.051713 - y * 0.121364 + z * 1.011530;

        let [r, g, b] = [r, g, b].map(|c| gamma_compress(c).max(0.0));
        let peak = r.max(g).max(b);
        let [r, g, b] = if peak > 1.0 {
            [r / peak, g / peak, b / peak]
        } else {
            [r, g, b]
        };
        Rgb::new(r, g, b)
    }
}
