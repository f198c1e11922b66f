//! crates/pickup_route_core/src/impact.rs
//!
//! Derivation of environmental-impact metrics from summed segregation
//! data. The coefficients are fixed in the current design; a future config
//! point if deployments ever need different factors.

use crate::domain::{ImpactRollup, SegregationTotals};

/// Kilograms of paper per tree saved.
const TREES_PER_KG_PAPER: f64 = 0.02;
/// Litres of water saved per kilogram of diverted waste.
const WATER_PER_KG: f64 = 3.5;
/// kWh of energy saved per kilogram of diverted waste.
const ENERGY_PER_KG: f64 = 0.5;

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Recomputes the full rollup for one (branch, corporate) pair from its
/// summed segregation rows. Landfill diversion equals the total weight.
/// Cardboard has no source column, so it is carried as zero.
pub fn derive_rollup(totals: &SegregationTotals) -> ImpactRollup {
    let total = totals.total_weight;
    let paper = totals.total_paper;

    ImpactRollup {
        corporate_code: totals.corporate_code.clone(),
        branch_code: totals.branch_code.clone(),
        total_weight: round2(total),
        total_plastic: round2(totals.total_plastic),
        total_cardboard: 0.0,
        total_paper: round2(paper),
        total_ewaste: round2(totals.total_ewaste),
        trees_saved: round2(paper * TREES_PER_KG_PAPER),
        water_saved: round2(total * WATER_PER_KG),
        energy_saved: round2(total * ENERGY_PER_KG),
        landfill_saved: round2(total),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollup_matches_fixed_coefficients() {
        // Two segregation rows: weights 10 and 20, paper 3 and 5.
        let totals = SegregationTotals {
            branch_code: "BR001".to_string(),
            corporate_code: "CORP1".to_string(),
            total_weight: 30.0,
            total_plastic: 4.0,
            total_paper: 8.0,
            total_ewaste: 1.0,
            total_metal: 0.0,
            total_glass: 0.0,
        };

        let rollup = derive_rollup(&totals);
        assert_eq!(rollup.total_weight, 30.0);
        assert_eq!(rollup.total_paper, 8.0);
        assert_eq!(rollup.trees_saved, 0.16);
        assert_eq!(rollup.water_saved, 105.0);
        assert_eq!(rollup.energy_saved, 15.0);
        assert_eq!(rollup.landfill_saved, 30.0);
        assert_eq!(rollup.total_cardboard, 0.0);
    }

    #[test]
    fn rollup_rounds_to_two_decimals() {
        let totals = SegregationTotals {
            branch_code: "BR002".to_string(),
            corporate_code: "CORP1".to_string(),
            total_weight: 2.468,
            total_plastic: 0.0,
            total_paper: 0.333,
            total_ewaste: 0.0,
            total_metal: 0.0,
            total_glass: 0.0,
        };

        let rollup = derive_rollup(&totals);
        assert_eq!(rollup.trees_saved, 0.01);
        assert_eq!(rollup.water_saved, 8.64);
        assert_eq!(rollup.energy_saved, 1.23);
        assert_eq!(rollup.landfill_saved, 2.47);
    }
}
