//! Physical units with SI dimension bookkeeping.
//!
//! A [`Unit`] is a numeric multiplier times a product of atomic symbols raised
//! to integer powers (`10dm^2`, `kg*m/s^2`, `1/m`). Symbols keep their spelling
//! so that values stay in the unit a user chose; conversions go through each
//! symbol's SI scale.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Exponents of the base quantities `[m, kg, s, A, K, mol, cd, rad]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dimension(pub [i32; 8]);

impl Dimension {
    pub fn is_none(&self) -> bool {
        self.0.iter().all(|&e| e == 0)
    }

    fn scaled(self, by: i32) -> Self {
        let mut out = self.0;
        for e in &mut out {
            *e *= by;
        }
        Dimension(out)
    }

    fn plus(self, other: Dimension) -> Self {
        let mut out = self.0;
        for (e, o) in out.iter_mut().zip(other.0) {
            *e += o;
        }
        Dimension(out)
    }
}

const fn dim(m: i32, kg: i32, s: i32, a: i32, k: i32, mol: i32, cd: i32, rad: i32) -> Dimension {
    Dimension([m, kg, s, a, k, mol, cd, rad])
}

struct Atom {
    symbol: &'static str,
    aliases: &'static [&'static str],
    scale: f64,
    dimension: Dimension,
}

const LENGTH: Dimension = dim(1, 0, 0, 0, 0, 0, 0, 0);
const MASS: Dimension = dim(0, 1, 0, 0, 0, 0, 0, 0);
const TIME: Dimension = dim(0, 0, 1, 0, 0, 0, 0, 0);
const FREQUENCY: Dimension = dim(0, 0, -1, 0, 0, 0, 0, 0);
const ENERGY: Dimension = dim(2, 1, -2, 0, 0, 0, 0, 0);
const EV: f64 = 1.602_176_634e-19;

// The first eight entries are the coherent SI symbols, in `Dimension` order.
const ATOMS: &[Atom] = &[
    Atom { symbol: "m", aliases: &["meter", "metre"], scale: 1.0, dimension: LENGTH },
    Atom { symbol: "kg", aliases: &["kilogram"], scale: 1.0, dimension: MASS },
    Atom { symbol: "s", aliases: &["second", "sec"], scale: 1.0, dimension: TIME },
    Atom { symbol: "A", aliases: &["ampere"], scale: 1.0, dimension: dim(0, 0, 0, 1, 0, 0, 0, 0) },
    Atom { symbol: "K", aliases: &["kelvin"], scale: 1.0, dimension: dim(0, 0, 0, 0, 1, 0, 0, 0) },
    Atom { symbol: "mol", aliases: &[], scale: 1.0, dimension: dim(0, 0, 0, 0, 0, 1, 0, 0) },
    Atom { symbol: "cd", aliases: &[], scale: 1.0, dimension: dim(0, 0, 0, 0, 0, 0, 1, 0) },
    Atom { symbol: "rad", aliases: &["radian"], scale: 1.0, dimension: dim(0, 0, 0, 0, 0, 0, 0, 1) },
    Atom { symbol: "km", aliases: &[], scale: 1e3, dimension: LENGTH },
    Atom { symbol: "dm", aliases: &[], scale: 1e-1, dimension: LENGTH },
    Atom { symbol: "cm", aliases: &[], scale: 1e-2, dimension: LENGTH },
    Atom { symbol: "mm", aliases: &[], scale: 1e-3, dimension: LENGTH },
    Atom { symbol: "µm", aliases: &["um", "micron"], scale: 1e-6, dimension: LENGTH },
    Atom { symbol: "nm", aliases: &[], scale: 1e-9, dimension: LENGTH },
    Atom { symbol: "Å", aliases: &["angstrom", "AA"], scale: 1e-10, dimension: LENGTH },
    Atom { symbol: "pm", aliases: &[], scale: 1e-12, dimension: LENGTH },
    Atom { symbol: "fm", aliases: &[], scale: 1e-15, dimension: LENGTH },
    Atom { symbol: "g", aliases: &["gram"], scale: 1e-3, dimension: MASS },
    Atom { symbol: "mg", aliases: &[], scale: 1e-6, dimension: MASS },
    Atom { symbol: "ms", aliases: &[], scale: 1e-3, dimension: TIME },
    Atom { symbol: "µs", aliases: &["us"], scale: 1e-6, dimension: TIME },
    Atom { symbol: "ns", aliases: &[], scale: 1e-9, dimension: TIME },
    Atom { symbol: "ps", aliases: &[], scale: 1e-12, dimension: TIME },
    Atom { symbol: "min", aliases: &["minute"], scale: 60.0, dimension: TIME },
    Atom { symbol: "h", aliases: &["hour"], scale: 3600.0, dimension: TIME },
    Atom { symbol: "mK", aliases: &[], scale: 1e-3, dimension: dim(0, 0, 0, 0, 1, 0, 0, 0) },
    Atom { symbol: "deg", aliases: &["degree", "°"], scale: std::f64::consts::PI / 180.0, dimension: dim(0, 0, 0, 0, 0, 0, 0, 1) },
    Atom { symbol: "Hz", aliases: &[], scale: 1.0, dimension: FREQUENCY },
    Atom { symbol: "kHz", aliases: &[], scale: 1e3, dimension: FREQUENCY },
    Atom { symbol: "MHz", aliases: &[], scale: 1e6, dimension: FREQUENCY },
    Atom { symbol: "GHz", aliases: &[], scale: 1e9, dimension: FREQUENCY },
    Atom { symbol: "THz", aliases: &[], scale: 1e12, dimension: FREQUENCY },
    Atom { symbol: "N", aliases: &["newton"], scale: 1.0, dimension: dim(1, 1, -2, 0, 0, 0, 0, 0) },
    Atom { symbol: "J", aliases: &["joule"], scale: 1.0, dimension: ENERGY },
    Atom { symbol: "eV", aliases: &[], scale: EV, dimension: ENERGY },
    Atom { symbol: "meV", aliases: &[], scale: 1e-3 * EV, dimension: ENERGY },
    Atom { symbol: "µeV", aliases: &["ueV"], scale: 1e-6 * EV, dimension: ENERGY },
    Atom { symbol: "keV", aliases: &[], scale: 1e3 * EV, dimension: ENERGY },
    Atom { symbol: "MeV", aliases: &[], scale: 1e6 * EV, dimension: ENERGY },
    Atom { symbol: "W", aliases: &["watt"], scale: 1.0, dimension: dim(2, 1, -3, 0, 0, 0, 0, 0) },
    Atom { symbol: "Pa", aliases: &["pascal"], scale: 1.0, dimension: dim(-1, 1, -2, 0, 0, 0, 0, 0) },
    Atom { symbol: "C", aliases: &["coulomb"], scale: 1.0, dimension: dim(0, 0, 1, 1, 0, 0, 0, 0) },
    Atom { symbol: "V", aliases: &["volt"], scale: 1.0, dimension: dim(2, 1, -3, -1, 0, 0, 0, 0) },
    Atom { symbol: "T", aliases: &["tesla"], scale: 1.0, dimension: dim(0, 1, -2, -1, 0, 0, 0, 0) },
    Atom { symbol: "barn", aliases: &[], scale: 1e-28, dimension: dim(2, 0, 0, 0, 0, 0, 0, 0) },
];

fn lookup_atom(symbol: &str) -> Option<usize> {
    ATOMS
        .iter()
        .position(|atom| atom.symbol == symbol || atom.aliases.contains(&symbol))
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Factor {
    atom: usize,
    exponent: i32,
}

/// A physical unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Unit {
    multiplier: f64,
    factors: Vec<Factor>,
}

impl Default for Unit {
    fn default() -> Self {
        Self::dimensionless()
    }
}

impl Unit {
    pub fn dimensionless() -> Self {
        Self {
            multiplier: 1.0,
            factors: Vec::new(),
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed == "dimensionless" || trimmed == "1" {
            return Ok(Self::dimensionless());
        }
        UnitParser::new(trimmed)?.parse()
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn dimension(&self) -> Dimension {
        self.factors.iter().fold(Dimension::default(), |acc, f| {
            acc.plus(ATOMS[f.atom].dimension.scaled(f.exponent))
        })
    }

    /// Size of this unit expressed in coherent SI units.
    pub fn si_scale(&self) -> f64 {
        self.factors.iter().fold(self.multiplier, |acc, f| {
            acc * ATOMS[f.atom].scale.powi(f.exponent)
        })
    }

    pub fn is_dimensionless(&self) -> bool {
        self.factors.is_empty() && self.multiplier == 1.0
    }

    pub fn is_compatible(&self, other: &Unit) -> bool {
        self.dimension() == other.dimension()
    }

    /// Factor `f` such that `value_in_self * f == value_in_to`.
    pub fn conversion_factor(&self, to: &Unit) -> Result<f64> {
        if !self.is_compatible(to) {
            return Err(CoreError::Unit(format!(
                "cannot convert from '{self}' to '{to}'"
            )));
        }
        Ok(self.si_scale() / to.si_scale())
    }

    /// The unit without a numeric multiplier.
    ///
    /// A unit that carries a multiplier is re-expressed in coherent SI symbols,
    /// so `10dm^2` becomes `m^2` and `1e+9` becomes `dimensionless`.
    pub fn base_unit(&self) -> Unit {
        if self.multiplier == 1.0 {
            return self.clone();
        }
        let mut si = self.to_si();
        si.multiplier = 1.0;
        si
    }

    /// Equivalent unit spelled with coherent SI symbols (multiplier absorbs scales).
    pub fn to_si(&self) -> Unit {
        let dimension = self.dimension();
        let factors = dimension
            .0
            .iter()
            .enumerate()
            .filter(|(_, &e)| e != 0)
            .map(|(atom, &exponent)| Factor { atom, exponent })
            .collect();
        Unit {
            multiplier: self.si_scale(),
            factors,
        }
    }

    pub fn recip(&self) -> Unit {
        Unit {
            multiplier: 1.0 / self.multiplier,
            factors: self
                .factors
                .iter()
                .map(|f| Factor {
                    atom: f.atom,
                    exponent: -f.exponent,
                })
                .collect(),
        }
    }

    /// Product of two units. Identical symbols merge; distinct symbols of the
    /// same dimension (`dm*m`) collapse into SI symbols.
    pub fn mul(&self, other: &Unit) -> Unit {
        let mut out = self.mul_raw(other);
        if out.has_mixed_symbols() {
            out = out.to_si();
        }
        out
    }

    pub fn div(&self, other: &Unit) -> Unit {
        self.mul(&other.recip())
    }

    pub fn powi(&self, n: i32) -> Unit {
        if n == 0 {
            return Unit::dimensionless();
        }
        Unit {
            multiplier: self.multiplier.powi(n),
            factors: self
                .factors
                .iter()
                .map(|f| Factor {
                    atom: f.atom,
                    exponent: f.exponent * n,
                })
                .collect(),
        }
    }

    /// Real power; only allowed when every resulting exponent is an integer.
    pub fn powf(&self, n: f64) -> Result<Unit> {
        if n.fract() == 0.0 && n.abs() <= i32::MAX as f64 {
            return Ok(self.powi(n as i32));
        }
        let mut factors = Vec::with_capacity(self.factors.len());
        for f in &self.factors {
            let exponent = f.exponent as f64 * n;
            if (exponent - exponent.round()).abs() > 1e-9 {
                return Err(CoreError::Unit(format!(
                    "cannot raise '{self}' to the non-integer power {n}"
                )));
            }
            factors.push(Factor {
                atom: f.atom,
                exponent: exponent.round() as i32,
            });
        }
        Ok(Unit {
            multiplier: self.multiplier.powf(n),
            factors,
        })
    }

    fn mul_raw(&self, other: &Unit) -> Unit {
        let mut out = self.clone();
        out.multiplier *= other.multiplier;
        for f in &other.factors {
            out.push_factor(f.atom, f.exponent);
        }
        out
    }

    fn push_factor(&mut self, atom: usize, exponent: i32) {
        if let Some(existing) = self.factors.iter_mut().find(|f| f.atom == atom) {
            existing.exponent += exponent;
        } else {
            self.factors.push(Factor { atom, exponent });
        }
        self.factors.retain(|f| f.exponent != 0);
    }

    fn has_mixed_symbols(&self) -> bool {
        self.factors.iter().enumerate().any(|(i, a)| {
            self.factors[i + 1..]
                .iter()
                .any(|b| ATOMS[a.atom].dimension == ATOMS[b.atom].dimension)
        })
    }
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        if self.dimension() != other.dimension() {
            return false;
        }
        let (a, b) = (self.si_scale(), other.si_scale());
        (a - b).abs() <= 1e-12 * a.abs().max(b.abs())
    }
}

impl FromStr for Unit {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Unit::parse(s)
    }
}

impl TryFrom<String> for Unit {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Unit::parse(&value)
    }
}

impl TryFrom<&str> for Unit {
    type Error = CoreError;

    fn try_from(value: &str) -> Result<Self> {
        Unit::parse(value)
    }
}

impl From<Unit> for String {
    fn from(unit: Unit) -> Self {
        unit.to_string()
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render = |factor: &Factor| {
            let symbol = ATOMS[factor.atom].symbol;
            match factor.exponent.abs() {
                1 => symbol.to_string(),
                e => format!("{symbol}^{e}"),
            }
        };
        let numerator: Vec<String> = self
            .factors
            .iter()
            .filter(|f| f.exponent > 0)
            .map(render)
            .collect();
        let denominator: Vec<String> = self
            .factors
            .iter()
            .filter(|f| f.exponent < 0)
            .map(render)
            .collect();

        let mut out = String::new();
        if self.multiplier != 1.0 {
            out.push_str(&self.multiplier.to_string());
        }
        if numerator.is_empty() && denominator.is_empty() {
            if out.is_empty() {
                out.push_str("dimensionless");
            }
            return f.write_str(&out);
        }
        if numerator.is_empty() {
            if out.is_empty() {
                out.push('1');
            }
        } else {
            out.push_str(&numerator.join("*"));
        }
        for d in denominator {
            out.push('/');
            out.push_str(&d);
        }
        f.write_str(&out)
    }
}

// --- Parser ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Symbol(String),
    Star,
    Slash,
    Caret,
    Sign(i32),
}

struct UnitParser {
    source: String,
    tokens: Vec<Token>,
    pos: usize,
}

impl UnitParser {
    fn new(source: &str) -> Result<Self> {
        Ok(Self {
            source: source.to_string(),
            tokens: tokenize(source)?,
            pos: 0,
        })
    }

    fn error(&self, message: &str) -> CoreError {
        CoreError::Unit(format!("invalid unit '{}': {message}", self.source))
    }

    fn parse(mut self) -> Result<Unit> {
        let mut unit = Unit::dimensionless();
        let mut divide = false;

        while self.pos < self.tokens.len() {
            let term = self.parse_factor()?;
            unit = if divide {
                unit.mul_raw(&term.recip())
            } else {
                unit.mul_raw(&term)
            };
            divide = false;
            match self.tokens.get(self.pos) {
                Some(Token::Star) => self.pos += 1,
                Some(Token::Slash) => {
                    self.pos += 1;
                    divide = true;
                }
                _ => {}
            }
            if (divide || matches!(self.tokens.get(self.pos - 1), Some(Token::Star)))
                && self.pos >= self.tokens.len()
            {
                return Err(self.error("dangling operator"));
            }
        }
        Ok(unit)
    }

    fn parse_factor(&mut self) -> Result<Unit> {
        let base = match self.tokens.get(self.pos).cloned() {
            Some(Token::Number(n)) => Unit {
                multiplier: n,
                factors: Vec::new(),
            },
            Some(Token::Symbol(symbol)) => {
                let atom = lookup_atom(&symbol).ok_or_else(|| {
                    CoreError::Unit(format!("unknown unit symbol '{symbol}' in '{}'", self.source))
                })?;
                Unit {
                    multiplier: 1.0,
                    factors: vec![Factor { atom, exponent: 1 }],
                }
            }
            _ => return Err(self.error("expected a number or a unit symbol")),
        };
        self.pos += 1;

        if let Some(Token::Caret) = self.tokens.get(self.pos) {
            self.pos += 1;
            let mut sign = 1;
            if let Some(Token::Sign(s)) = self.tokens.get(self.pos) {
                sign = *s;
                self.pos += 1;
            }
            let exponent = match self.tokens.get(self.pos) {
                Some(Token::Number(n)) if n.fract() == 0.0 => *n as i32 * sign,
                _ => return Err(self.error("expected an integer exponent")),
            };
            self.pos += 1;
            return Ok(base.powi(exponent));
        }
        Ok(base)
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    num.push(d);
                    chars.next();
                } else if d == 'e' || d == 'E' {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    let mut exponent = String::new();
                    if let Some(&sign @ ('+' | '-')) = lookahead.peek() {
                        exponent.push(sign);
                        lookahead.next();
                    }
                    if !matches!(lookahead.peek(), Some(ch) if ch.is_ascii_digit()) {
                        break;
                    }
                    num.push(d);
                    num.push_str(&exponent);
                    chars = lookahead;
                } else {
                    break;
                }
            }
            let value = num
                .parse()
                .map_err(|_| CoreError::Unit(format!("invalid number '{num}' in unit '{input}'")))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '°' {
            let mut symbol = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphabetic() || d == '°' {
                    symbol.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Symbol(symbol));
        } else {
            chars.next();
            match c {
                '*' if chars.peek() == Some(&'*') => {
                    chars.next();
                    tokens.push(Token::Caret);
                }
                '*' | '·' => tokens.push(Token::Star),
                '/' => tokens.push(Token::Slash),
                '^' => tokens.push(Token::Caret),
                '-' => tokens.push(Token::Sign(-1)),
                '+' => tokens.push(Token::Sign(1)),
                other => {
                    return Err(CoreError::Unit(format!(
                        "unexpected character '{other}' in unit '{input}'"
                    )))
                }
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(s: &str) -> Unit {
        Unit::parse(s).expect("unit should parse")
    }

    #[test]
    fn parses_and_displays_common_units() {
        for text in ["m", "m/s", "km/s", "m^2", "1/m", "1/m^2", "kg*m/s^2", "meV", "Å"] {
            assert_eq!(unit(text).to_string(), text);
        }
        assert_eq!(unit("").to_string(), "dimensionless");
        assert_eq!(unit("dimensionless").to_string(), "dimensionless");
        assert_eq!(unit("m**2").to_string(), "m^2");
        assert_eq!(unit("m s^-1").to_string(), "m/s");
        assert_eq!(unit("angstrom").to_string(), "Å");
    }

    #[test]
    fn rejects_unknown_symbols() {
        let err = Unit::parse("unknown").expect_err("should fail");
        assert!(matches!(err, CoreError::Unit(_)));
        assert!(Unit::parse("m/").is_err());
        assert!(Unit::parse("m^x").is_err());
    }

    #[test]
    fn conversion_factors() {
        assert_eq!(unit("m").conversion_factor(&unit("mm")).unwrap(), 1000.0);
        assert_eq!(unit("m").conversion_factor(&unit("cm")).unwrap(), 100.0);
        assert!((unit("km/s").conversion_factor(&unit("m/s")).unwrap() - 1000.0).abs() < 1e-9);
        assert!((unit("meV").conversion_factor(&unit("eV")).unwrap() - 1e-3).abs() < 1e-15);
        assert!(unit("m").conversion_factor(&unit("s")).is_err());
    }

    #[test]
    fn base_unit_strips_numeric_multipliers() {
        assert_eq!(unit("1e+9").base_unit().to_string(), "dimensionless");
        assert_eq!(unit("1000").base_unit().to_string(), "dimensionless");
        assert_eq!(unit("10dm^2").base_unit().to_string(), "m^2");
        assert_eq!(unit("mm").base_unit().to_string(), "mm");
        assert!((unit("10dm^2").conversion_factor(&unit("m^2")).unwrap() - 0.1).abs() < 1e-15);
    }

    #[test]
    fn multiplication_merges_symbols() {
        assert_eq!(unit("m").mul(&unit("m")).to_string(), "m^2");
        assert_eq!(unit("m").div(&unit("m^2")).to_string(), "1/m");
        assert_eq!(unit("m").div(&unit("m")).to_string(), "dimensionless");
        assert_eq!(unit("m").div(&unit("s")).to_string(), "m/s");
    }

    #[test]
    fn mixed_symbols_collapse_to_si() {
        let product = unit("dm").mul(&unit("m"));
        assert!((product.multiplier() - 0.1).abs() < 1e-15);
        assert_eq!(product.base_unit().to_string(), "m^2");
    }

    #[test]
    fn fractional_powers_need_integer_exponents() {
        assert_eq!(unit("m^2").powf(0.5).unwrap().to_string(), "m");
        assert!(unit("m").powf(0.5).is_err());
        assert_eq!(unit("m").powi(-2).to_string(), "1/m^2");
    }

    #[test]
    fn display_round_trips_through_parse() {
        for text in ["0.1m^2", "1/m/s", "kg*m^2/s^2", "10dm^2"] {
            let parsed = unit(text);
            assert_eq!(unit(&parsed.to_string()), parsed);
        }
    }

    #[test]
    fn serde_uses_text_form() {
        let json = serde_json::to_string(&unit("km/s")).unwrap();
        assert_eq!(json, "\"km/s\"");
        let back: Unit = serde_json::from_str(&json).unwrap();
        assert_eq!(back.to_string(), "km/s");
        assert!(serde_json::from_str::<Unit>("\"bogus\"").is_err());
    }
}
