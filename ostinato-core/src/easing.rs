//! Easing curves for parameter animations.
//!
//! An easing spec is a base curve name optionally suffixed with `-mirror`
//! (back-and-forth within one duration) and `-out` (inverted and flipped) or
//! `-inout` (linear blend of the base and its `-out` variant), e.g.
//! `exponential-mirror-inout`.

use std::f64::consts::PI;

/// Linear interpolation between two floats at progress `p`.
pub fn lerp(start: f64, end: f64, p: f64) -> f64 {
    start + (end - start) * p
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BaseCurve {
    Linear,
    Sine,
    Quadratic,
    Cubic,
    Quartic,
    Quintic,
    Exponential,
    Random,
    Elastic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
    In,
    Out,
    InOut,
}

/// A parsed easing spec, ready to shape animation progress.
#[derive(Debug)]
pub struct Easing {
    base: BaseCurve,
    variant: Variant,
    mirror: bool,
    seed: u64,
}

impl Easing {
    /// Parse an easing spec. Unknown base names are logged and fall back to
    /// `linear`; the suffixes still apply.
    pub fn parse(spec: &str) -> Easing {
        let mut rest = spec;
        let variant = if let Some(stripped) = rest.strip_suffix("-inout") {
            rest = stripped;
            Variant::InOut
        } else if let Some(stripped) = rest.strip_suffix("-out") {
            rest = stripped;
            Variant::Out
        } else {
            Variant::In
        };
        let mirror = if let Some(stripped) = rest.strip_suffix("-mirror") {
            rest = stripped;
            true
        } else {
            false
        };
        let base = match rest {
            "linear" => BaseCurve::Linear,
            "sine" => BaseCurve::Sine,
            "quadratic" => BaseCurve::Quadratic,
            "cubic" => BaseCurve::Cubic,
            "quartic" => BaseCurve::Quartic,
            "quintic" => BaseCurve::Quintic,
            "exponential" => BaseCurve::Exponential,
            "random" => BaseCurve::Random,
            "elastic" => BaseCurve::Elastic,
            other => {
                log::error!(target: "easing", "unknown easing \"{}\", falling back to \"linear\"", other);
                BaseCurve::Linear
            }
        };
        Easing {
            base,
            variant,
            mirror,
            seed: time_seed(),
        }
    }

    /// Shape a raw progress value in `[0, 1]` into eased progress.
    pub fn apply(&mut self, p: f64) -> f64 {
        let mut p = p.clamp(0.0, 1.0);
        if self.mirror {
            p = if p <= 0.5 { 2.0 * p } else { 2.0 * (1.0 - p) };
        }
        match self.variant {
            Variant::In => self.curve(p),
            Variant::Out => self.curve_out(p),
            Variant::InOut => lerp(self.curve(p), self.curve_out(p), p),
        }
    }

    fn curve_out(&mut self, p: f64) -> f64 {
        1.0 - self.curve(1.0 - p)
    }

    fn curve(&mut self, p: f64) -> f64 {
        match self.base {
            BaseCurve::Linear => p,
            BaseCurve::Sine => ((p - 1.0) * PI / 2.0).sin() + 1.0,
            BaseCurve::Quadratic => p * p,
            BaseCurve::Cubic => p * p * p,
            BaseCurve::Quartic => p * p * p * p,
            BaseCurve::Quintic => p * p * p * p * p,
            BaseCurve::Exponential => {
                if p == 0.0 {
                    0.0
                } else {
                    (2.0f64).powf(10.0 * (p - 1.0))
                }
            }
            BaseCurve::Random => {
                if p == 0.0 || p == 1.0 {
                    p
                } else {
                    self.next_random()
                }
            }
            BaseCurve::Elastic => (13.0 * PI / 2.0 * p).sin() * (2.0f64).powf(10.0 * (p - 1.0)),
        }
    }

    /// Xorshift step yielding a value in `[0, 1)`.
    fn next_random(&mut self) -> f64 {
        let mut x = self.seed;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.seed = x;
        (x >> 11) as f64 / (1u64 << 53) as f64
    }
}

fn time_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
        | 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_is_identity() {
        let mut e = Easing::parse("linear");
        assert_eq!(e.apply(0.0), 0.0);
        assert_eq!(e.apply(0.25), 0.25);
        assert_eq!(e.apply(1.0), 1.0);
    }

    #[test]
    fn endpoints_hold_for_all_curves() {
        for name in [
            "linear",
            "sine",
            "quadratic",
            "cubic",
            "quartic",
            "quintic",
            "exponential",
            "elastic",
        ] {
            let mut e = Easing::parse(name);
            assert!(e.apply(0.0).abs() < 1e-9, "{} at 0", name);
            assert!((e.apply(1.0) - 1.0).abs() < 1e-9, "{} at 1", name);
        }
    }

    #[test]
    fn out_variant_flips() {
        // quadratic-out(p) = 1 - (1-p)^2
        let mut e = Easing::parse("quadratic-out");
        assert!((e.apply(0.5) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn inout_blends_base_and_out() {
        // At p=0.5 the blend weight is 0.5: lerp(0.25, 0.75, 0.5) = 0.5
        let mut e = Easing::parse("quadratic-inout");
        assert!((e.apply(0.5) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn mirror_returns_to_start() {
        let mut e = Easing::parse("quadratic-mirror");
        assert!(e.apply(0.0).abs() < 1e-9);
        assert!((e.apply(0.5) - 1.0).abs() < 1e-9);
        assert!(e.apply(1.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_base_falls_back_to_linear() {
        let mut e = Easing::parse("wobble");
        assert_eq!(e.apply(0.3), 0.3);
    }

    #[test]
    fn random_pins_endpoints() {
        let mut e = Easing::parse("random");
        assert_eq!(e.apply(0.0), 0.0);
        assert_eq!(e.apply(1.0), 1.0);
        let mid = e.apply(0.5);
        assert!((0.0..1.0).contains(&mid));
    }
}
