//! Loess correction pinned to statsmodels
//!
//! Expected values are `statsmodels.nonparametric.lowess(cd4, reference,
//! frac=0.5)` interpolated back onto the reference with `np.interp`. The data
//! is a saturating marker with noise, tied reference values (39.2, 51.1 x4,
//! 74.9) and one outlier (row 47). Rows in the outer quarters of the reference
//! range are skipped, since edge handling is where LOWESS implementations
//! legitimately differ.

use approx::assert_relative_eq;
use cytonorm_rs::{CurveFitter, EventTable, Lowess, NormalizationConfig, StrategyConfig, normalize};

const REFERENCE: [f64; 48] = [
    137.9, 74.9, 141.5, 39.2, 113.0, 108.1, 128.4, 39.2,
    66.2, 87.4, 168.6, 51.1, 73.6, 135.8, 162.1, 197.8,
    164.1, 103.6, 117.0, 132.6, 51.1, 146.7, 148.9, 196.3,
    79.2, 100.2, 147.5, 153.2, 51.1, 22.8, 160.9, 27.4,
    127.5, 51.1, 120.2, 112.7, 91.5, 52.9, 136.3, 149.0,
    74.9, 194.9, 170.2, 90.2, 146.9, 42.6, 129.4, 118.8,
];

const CD4: [f64; 48] = [
    28.67, 23.82, 27.68, 17.14, 26.6, 23.79, 26.76, 14.24,
    21.22, 23.2, 28.1, 19.61, 20.32, 26.09, 27.98, 32.28,
    29.49, 25.29, 25.95, 25.94, 18.21, 27.62, 28.02, 29.13,
    24.54, 26.19, 28.17, 29.0, 16.48, 12.86, 27.77, 11.94,
    28.19, 19.28, 28.01, 24.84, 24.95, 16.95, 29.74, 26.64,
    20.85, 32.56, 30.28, 22.18, 27.37, 17.17, 25.96, 88.21,
];

/// (row, fitted value, corrected value) for rows in the central half of the
/// reference range
const EXPECTED: [(usize, f64, f64); 24] = [
    (0, 27.442527785798916, 1.0447288319713859),
    (1, 21.678232545458133, 1.098798066219222),
    (2, 27.585562831504973, 1.003423427285927),
    (4, 25.80063641066816, 1.030982320614437),
    (5, 25.38942422115104, 0.9370043130076728),
    (6, 26.873002906574502, 0.9957949282048097),
    (9, 23.339522937891754, 0.9940220312873131),
    (13, 27.334648176857915, 0.9544662814459905),
    (17, 24.999040614874513, 1.0116388220495296),
    (18, 26.13783513183055, 0.9928136691166972),
    (19, 27.164187973311158, 0.9549337541577196),
    (21, 27.825129780888922, 0.9926278949099526),
    (24, 22.321750778188694, 1.0993761306563294),
    (25, 24.65622405959922, 1.062206440722364),
    (32, 26.810611420855324, 1.0514493518067136),
    (34, 26.356588695159815, 1.0627323711715326),
    (35, 25.774490577192193, 0.9637435869239207),
    (36, 23.813148916161065, 1.047740476819821),
    (38, 27.359059382632193, 1.0870256752642327),
    (40, 21.678232545458133, 0.9617942771062461),
    (43, 23.684143428530508, 0.9364915419859103),
    (44, 27.835178900674133, 0.9832880937344051),
    (46, 26.945782498925205, 0.9634160745205851),
    (47, 26.263475960884428, 3.3586567189878367),
];

const TOLERANCE: f64 = 2e-2;

#[test]
fn test_lowess_fit_matches_statsmodels() {
    let curve = Lowess::new(0.5).fit(&REFERENCE, &CD4).unwrap();
    assert_eq!(curve.x.len(), REFERENCE.len());

    for (row, fitted, _) in EXPECTED {
        assert_relative_eq!(
            curve.interpolate(REFERENCE[row]),
            fitted,
            max_relative = TOLERANCE
        );
    }
}

#[test]
fn test_loess_strategy_matches_statsmodels() {
    let cell_index: Vec<f64> = (1..=REFERENCE.len()).map(|i| i as f64).collect();
    let table = EventTable::from_columns([
        ("Cell_Index", cell_index),
        ("165Ho", REFERENCE.to_vec()),
        ("CD4", CD4.to_vec()),
    ])
    .unwrap();
    let config = NormalizationConfig::new(StrategyConfig::Loess {
        reference: "165Ho".into(),
        span: 0.5,
        iterations: 3,
        delta: 0.0,
    })
    .with_ignore(["Cell_Index"]);

    let output = normalize(&table, &config, None).unwrap();
    assert_eq!(output.table.n_events(), REFERENCE.len());
    assert_eq!(output.table.column_f64("165Ho").unwrap(), REFERENCE.to_vec());

    let corrected = output.table.column_f64("CD4").unwrap();
    for (row, _, expected) in EXPECTED {
        assert_relative_eq!(corrected[row], expected, max_relative = TOLERANCE);
    }
}

#[test]
fn test_outlier_does_not_drag_the_curve() {
    let robust = Lowess::new(0.5).fit(&REFERENCE, &CD4).unwrap();
    let plain = Lowess {
        iterations: 0,
        ..Lowess::new(0.5)
    }
    .fit(&REFERENCE, &CD4)
    .unwrap();

    // Robust fit stays near the statsmodels value at the outlier's reference
    let (row, fitted, _) = EXPECTED[EXPECTED.len() - 1];
    assert_eq!(row, 47);
    assert_relative_eq!(robust.interpolate(REFERENCE[row]), fitted, max_relative = TOLERANCE);
    assert!(plain.interpolate(REFERENCE[row]) > robust.interpolate(REFERENCE[row]));
}
