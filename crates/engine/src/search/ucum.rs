//! UCUM unit canonicalization.
//!
//! Quantities are indexed a second time in a base unit so that `1 kg` and
//! `1000 g` compare equal. Only the units commonly seen in clinical data are
//! covered; anything else is indexed with its original unit only.

use std::collections::HashMap;
use std::sync::LazyLock;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// The UCUM code system URI.
pub const UCUM_SYSTEM: &str = "http://unitsofmeasure.org";

/// ISO 4217 currency system used for Money values.
pub const CURRENCY_SYSTEM: &str = "urn:iso:std:iso:4217";

/// Conversion from a unit to its canonical base unit:
/// `canonical = value * factor + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitConversion {
    /// Canonical unit code.
    pub canonical_code: &'static str,
    factor: Decimal,
    offset: Decimal,
}

impl UnitConversion {
    const fn scale(canonical_code: &'static str, factor: Decimal) -> Self {
        Self {
            canonical_code,
            factor,
            offset: Decimal::ZERO,
        }
    }

    /// Converts a value to the canonical unit.
    pub fn apply(&self, value: Decimal) -> Option<Decimal> {
        value.checked_mul(self.factor)?.checked_add(self.offset)
    }
}

static UNITS: LazyLock<HashMap<&'static str, UnitConversion>> = LazyLock::new(|| {
    let one = Decimal::ONE;
    let mut units = HashMap::new();

    // mass
    units.insert("g", UnitConversion::scale("g", one));
    units.insert("kg", UnitConversion::scale("g", Decimal::new(1000, 0)));
    units.insert("mg", UnitConversion::scale("g", Decimal::new(1, 3)));
    units.insert("ug", UnitConversion::scale("g", Decimal::new(1, 6)));
    units.insert("ng", UnitConversion::scale("g", Decimal::new(1, 9)));
    units.insert("[lb_av]", UnitConversion::scale("g", Decimal::new(45359237, 5)));
    units.insert("[oz_av]", UnitConversion::scale("g", Decimal::new(28349523125, 9)));

    // length
    units.insert("m", UnitConversion::scale("m", one));
    units.insert("km", UnitConversion::scale("m", Decimal::new(1000, 0)));
    units.insert("cm", UnitConversion::scale("m", Decimal::new(1, 2)));
    units.insert("mm", UnitConversion::scale("m", Decimal::new(1, 3)));
    units.insert("um", UnitConversion::scale("m", Decimal::new(1, 6)));
    units.insert("[in_i]", UnitConversion::scale("m", Decimal::new(254, 4)));
    units.insert("[ft_i]", UnitConversion::scale("m", Decimal::new(3048, 4)));

    // volume
    units.insert("L", UnitConversion::scale("L", one));
    units.insert("l", UnitConversion::scale("L", one));
    units.insert("dL", UnitConversion::scale("L", Decimal::new(1, 1)));
    units.insert("mL", UnitConversion::scale("L", Decimal::new(1, 3)));
    units.insert("uL", UnitConversion::scale("L", Decimal::new(1, 6)));

    // time
    units.insert("s", UnitConversion::scale("s", one));
    units.insert("ms", UnitConversion::scale("s", Decimal::new(1, 3)));
    units.insert("min", UnitConversion::scale("s", Decimal::new(60, 0)));
    units.insert("h", UnitConversion::scale("s", Decimal::new(3600, 0)));
    units.insert("d", UnitConversion::scale("s", Decimal::new(86400, 0)));
    units.insert("wk", UnitConversion::scale("s", Decimal::new(604800, 0)));
    units.insert("mo", UnitConversion::scale("s", Decimal::new(2629800, 0)));
    units.insert("a", UnitConversion::scale("s", Decimal::new(31557600, 0)));

    // pressure
    units.insert("Pa", UnitConversion::scale("Pa", one));
    units.insert("kPa", UnitConversion::scale("Pa", Decimal::new(1000, 0)));
    units.insert("mm[Hg]", UnitConversion::scale("Pa", Decimal::new(133322387415, 9)));

    // amount of substance
    units.insert("mol", UnitConversion::scale("mol", one));
    units.insert("mmol", UnitConversion::scale("mol", Decimal::new(1, 3)));
    units.insert("umol", UnitConversion::scale("mol", Decimal::new(1, 6)));

    // mass concentration
    units.insert("g/L", UnitConversion::scale("g/L", one));
    units.insert("g/dL", UnitConversion::scale("g/L", Decimal::new(10, 0)));
    units.insert("mg/dL", UnitConversion::scale("g/L", Decimal::new(1, 2)));
    units.insert("mg/L", UnitConversion::scale("g/L", Decimal::new(1, 3)));
    units.insert("mg/mL", UnitConversion::scale("g/L", one));

    // substance concentration
    units.insert("mol/L", UnitConversion::scale("mol/L", one));
    units.insert("mmol/L", UnitConversion::scale("mol/L", Decimal::new(1, 3)));
    units.insert("umol/L", UnitConversion::scale("mol/L", Decimal::new(1, 6)));

    // rates
    units.insert("/s", UnitConversion::scale("/s", one));
    units.insert("/min", UnitConversion::scale("/s", one / Decimal::new(60, 0)));
    units.insert("/h", UnitConversion::scale("/s", one / Decimal::new(3600, 0)));

    units.insert("%", UnitConversion::scale("%", one));

    // temperature
    units.insert("K", UnitConversion::scale("K", one));
    units.insert(
        "Cel",
        UnitConversion {
            canonical_code: "K",
            factor: one,
            offset: Decimal::new(27315, 2),
        },
    );
    units.insert(
        "[degF]",
        UnitConversion {
            canonical_code: "K",
            factor: Decimal::new(5, 0) / Decimal::new(9, 0),
            offset: Decimal::new(27315, 2) - Decimal::new(160, 0) / Decimal::new(9, 0),
        },
    );

    units
});

/// Looks up the conversion for a UCUM code.
pub fn lookup(code: &str) -> Option<UnitConversion> {
    UNITS.get(code).copied()
}

/// Converts a value in `code` to the canonical unit.
///
/// Returns the canonical value and canonical unit code.
pub fn canonicalize(value: Decimal, code: &str) -> Option<(Decimal, &'static str)> {
    let conversion = lookup(code)?;
    Some((conversion.apply(value)?, conversion.canonical_code))
}

/// Like [`canonicalize`], returning an `f64` for storage.
pub fn canonicalize_f64(value: f64, code: &str) -> Option<(f64, &'static str)> {
    let decimal = Decimal::try_from(value).ok()?;
    let (canonical, unit) = canonicalize(decimal, code)?;
    Some((canonical.to_f64()?, unit))
}
