//! Source -> normalise -> sink over real files

use cytonorm_rs::{
    DelimitedFiles, EstimationMode, NormalizationConfig, PrefixedSink, ReferenceEstimator,
    StrategyConfig, TableSink, TableSource, normalize, read_delimited,
};
use std::path::PathBuf;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_direct_ratio_files_round_trip() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "sample.txt",
        "Cell_Index\tRefCh\tM1\tM2\n1\t2.0\t10.0\t20.0\n2\t0.005\t1.0\t2.0\n3\t4.0\t8.0\t40.0\n",
    );

    let source = DelimitedFiles::discover(&[dir.path().to_path_buf()], "txt").unwrap();
    let sink = PrefixedSink::beside_inputs();
    let config = NormalizationConfig::new(StrategyConfig::DirectRatio {
        reference: "RefCh".into(),
    })
    .with_ignore(["Cell_Index"]);

    for id in source.list_inputs().unwrap() {
        let table = source.read(&id).unwrap();
        let corrected = normalize(&table, &config, None).unwrap();
        sink.write(&id, &corrected.table).unwrap();
    }

    let output = dir.path().join("normalised").join("normalised_sample.txt");
    let table = read_delimited(&output).unwrap();
    assert_eq!(table.columns(), vec!["Cell_Index", "RefCh", "M1", "M2"]);
    assert_eq!(table.column_f64("Cell_Index").unwrap(), vec![1.0, 3.0]);
    assert_eq!(table.column_f64("M1").unwrap(), vec![5.0, 2.0]);
    assert_eq!(table.column_f64("M2").unwrap(), vec![10.0, 10.0]);

    // Integer metadata is written back as integers
    let text = std::fs::read_to_string(&output).unwrap();
    assert!(text.lines().nth(1).unwrap().starts_with("1\t"));

    // Outputs are not picked up as inputs on a second run
    let again = DelimitedFiles::discover(&[dir.path().join("normalised")], "txt").unwrap();
    assert!(again.is_empty());
}

#[test]
fn test_batch_min_max_over_directory() {
    let dir = TempDir::new().unwrap();
    write(&dir, "a.txt", "Ref\tM\n0\t1\n10\t1\n");
    write(&dir, "b.txt", "Ref\tM\n5\t1\n20\t1\n");

    let source = DelimitedFiles::discover(&[dir.path().to_path_buf()], "txt").unwrap();
    let config = NormalizationConfig::new(StrategyConfig::MinMaxRatio {
        reference: "Ref".into(),
        mode: EstimationMode::Batch,
    });
    let ids = source.list_inputs().unwrap();
    let tables: Vec<_> = ids.iter().map(|id| source.read(id).unwrap()).collect();
    let context = ReferenceEstimator::estimate(&tables, &config.strategy).unwrap();
    assert_eq!(context.reference_range, Some((0.0, 20.0)));

    let out_dir = dir.path().join("out");
    let sink = PrefixedSink::in_dir(&out_dir);
    for (id, table) in ids.iter().zip(&tables) {
        let corrected = normalize(table, &config, Some(&context)).unwrap();
        sink.write(id, &corrected.table).unwrap();
    }

    let a = read_delimited(&out_dir.join("normalised_a.txt")).unwrap();
    // Rescaled 0 gives 1/0; that row is dropped
    assert_eq!(a.column_f64("Ref").unwrap(), vec![0.5]);
    assert_eq!(a.column_f64("M").unwrap(), vec![2.0]);

    let b = read_delimited(&out_dir.join("normalised_b.txt")).unwrap();
    assert_eq!(b.column_f64("Ref").unwrap(), vec![0.25, 1.0]);
    assert_eq!(b.column_f64("M").unwrap(), vec![4.0, 1.0]);
}
