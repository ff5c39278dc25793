use serde::Serialize;

/// One row of the fixed conversion table: `1 name == factor base_unit`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitConversion {
    pub name: &'static str,
    pub base_unit: &'static str,
    pub factor: f64,
}

pub const MILLILITER: &str = "milliliter";
pub const GRAM: &str = "gram";
pub const PIECE: &str = "piece";

pub const UNIT_CONVERSIONS: &[UnitConversion] = &[
    UnitConversion {
        name: "tablespoon",
        base_unit: MILLILITER,
        factor: 15.0,
    },
    UnitConversion {
        name: "teaspoon",
        base_unit: MILLILITER,
        factor: 5.0,
    },
    UnitConversion {
        name: "cup",
        base_unit: MILLILITER,
        factor: 250.0,
    },
    UnitConversion {
        name: "milliliter",
        base_unit: MILLILITER,
        factor: 1.0,
    },
    UnitConversion {
        name: "liter",
        base_unit: MILLILITER,
        factor: 1000.0,
    },
    UnitConversion {
        name: "gram",
        base_unit: GRAM,
        factor: 1.0,
    },
    UnitConversion {
        name: "kilogram",
        base_unit: GRAM,
        factor: 1000.0,
    },
    UnitConversion {
        name: "piece",
        base_unit: PIECE,
        factor: 1.0,
    },
];

/// Quantity expressed in a base unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedQuantity {
    pub quantity: f64,
    pub base_unit: String,
}

/// Quantity expressed in a display unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormattedQuantity {
    pub quantity: f64,
    pub unit: String,
}

#[must_use]
pub fn lookup(unit_name: &str) -> Option<&'static UnitConversion> {
    UNIT_CONVERSIONS.iter().find(|c| c.name == unit_name)
}

/// Convert `quantity` of `unit_name` into its base unit.
///
/// Units missing from [`UNIT_CONVERSIONS`] pass through unconverted and act as
/// their own base unit.
#[must_use]
pub fn normalize(quantity: f64, unit_name: &str) -> NormalizedQuantity {
    match lookup(unit_name) {
        Some(conv) => NormalizedQuantity {
            quantity: quantity * conv.factor,
            base_unit: conv.base_unit.to_string(),
        },
        None => NormalizedQuantity {
            quantity,
            base_unit: unit_name.to_string(),
        },
    }
}

/// Convert a base-unit quantity into the unit a person would write on a list.
/// Precision is kept; rounding is left to the display layer.
#[must_use]
pub fn format(quantity: f64, base_unit: &str) -> FormattedQuantity {
    match base_unit {
        GRAM if quantity >= 1000.0 => FormattedQuantity {
            quantity: quantity / 1000.0,
            unit: "kilogram".to_string(),
        },
        MILLILITER if quantity >= 1000.0 => FormattedQuantity {
            quantity: quantity / 1000.0,
            unit: "liter".to_string(),
        },
        _ => FormattedQuantity {
            quantity,
            unit: base_unit.to_string(),
        },
    }
}

/// Map the spellings people type ("g", "Grams", "tbsp") to a canonical unit name.
#[must_use]
pub fn canonical_unit_name(raw: &str) -> Option<&'static str> {
    let lower = raw.trim().to_lowercase();
    let name = match lower.as_str() {
        "tbsp" | "tbs" | "tablespoon" | "tablespoons" => "tablespoon",
        "tsp" | "teaspoon" | "teaspoons" => "teaspoon",
        // Cooklang's default converter writes cups as "c"
        "c" | "cup" | "cups" => "cup",
        "ml" | "milliliter" | "milliliters" | "millilitre" | "millilitres" => "milliliter",
        "l" | "liter" | "liters" | "litre" | "litres" => "liter",
        "g" | "gram" | "grams" => "gram",
        "kg" | "kilogram" | "kilograms" => "kilogram",
        "pc" | "pcs" | "piece" | "pieces" => "piece",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_kilogram() {
        for q in [0.25, 1.0, 2.5, 40.0] {
            let n = normalize(q, "kilogram");
            assert!((n.quantity - q * 1000.0).abs() < f64::EPSILON);
            assert_eq!(n.base_unit, "gram");
        }
    }

    #[test]
    fn test_normalize_volume_units() {
        assert_eq!(normalize(2.0, "tablespoon").quantity, 30.0);
        assert_eq!(normalize(3.0, "teaspoon").quantity, 15.0);
        assert_eq!(normalize(2.0, "cup").quantity, 500.0);
        assert_eq!(normalize(1.5, "liter").quantity, 1500.0);
        assert_eq!(normalize(1.5, "liter").base_unit, "milliliter");
    }

    #[test]
    fn test_normalize_unknown_unit_passes_through() {
        let n = normalize(3.0, "unknown-unit");
        assert_eq!(n.quantity, 3.0);
        assert_eq!(n.base_unit, "unknown-unit");
    }

    #[test]
    fn test_normalize_is_case_sensitive() {
        // Canonicalisation happens at input time, not here
        let n = normalize(1.0, "Kilogram");
        assert_eq!(n.quantity, 1.0);
        assert_eq!(n.base_unit, "Kilogram");
    }

    #[test]
    fn test_every_table_base_unit_maps_to_itself() {
        for conv in UNIT_CONVERSIONS {
            let base = lookup(conv.base_unit).unwrap();
            assert_eq!(base.base_unit, conv.base_unit);
            assert_eq!(base.factor, 1.0);
        }
    }

    #[test]
    fn test_format_grams_to_kilograms() {
        let f = format(1500.0, "gram");
        assert_eq!(f.quantity, 1.5);
        assert_eq!(f.unit, "kilogram");

        let f = format(999.0, "gram");
        assert_eq!(f.quantity, 999.0);
        assert_eq!(f.unit, "gram");
    }

    #[test]
    fn test_format_threshold_is_inclusive() {
        let f = format(1000.0, "gram");
        assert_eq!(f.quantity, 1.0);
        assert_eq!(f.unit, "kilogram");

        let f = format(1000.0, "milliliter");
        assert_eq!(f.quantity, 1.0);
        assert_eq!(f.unit, "liter");
    }

    #[test]
    fn test_format_below_threshold_unchanged() {
        for (q, unit) in [(250.0, "milliliter"), (0.5, "gram"), (12.0, "piece")] {
            let f = format(q, unit);
            assert_eq!(f.quantity, q);
            assert_eq!(f.unit, unit);
        }
    }

    #[test]
    fn test_format_leaves_other_units_alone() {
        let f = format(5000.0, "piece");
        assert_eq!(f.quantity, 5000.0);
        assert_eq!(f.unit, "piece");

        let f = format(2000.0, "pinch");
        assert_eq!(f.unit, "pinch");
    }

    #[test]
    fn test_canonical_unit_name() {
        assert_eq!(canonical_unit_name("g"), Some("gram"));
        assert_eq!(canonical_unit_name("KG"), Some("kilogram"));
        assert_eq!(canonical_unit_name(" Tbsp "), Some("tablespoon"));
        assert_eq!(canonical_unit_name("litres"), Some("liter"));
        assert_eq!(canonical_unit_name("pcs"), Some("piece"));
        assert_eq!(canonical_unit_name("c"), Some("cup"));
        assert_eq!(canonical_unit_name("cups"), Some("cup"));
        assert_eq!(canonical_unit_name("pinch"), None);
        assert_eq!(canonical_unit_name(""), None);
    }
}
