use std::fs::File;

use arbor_arrow_root::{
    fixtures::{BranchDef, FileBuilder, TreeBuilder},
    SourceFile, Tree,
};
use arbor_output::{export, Compression, ExportError, ExportOptions, TreeExport};
use arrow::{
    array::{Array, AsArray},
    datatypes::{DataType, Float32Type, Float64Type, Int32Type},
    record_batch::RecordBatch,
};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

fn events() -> Tree {
    let bytes = FileBuilder::new()
        .tree(
            TreeBuilder::new("events")
                .branch(BranchDef::scalar("energy", &[4.1f64, 5.2, 6.3, 7.4, 8.5]).entries_per_basket(2))
                .branch(BranchDef::scalar("n", &[1i32, 0, 2, 1, 0]))
                .branch(BranchDef::counted(
                    "px",
                    "n",
                    &[vec![1.0f32], vec![], vec![2.0, 3.0], vec![4.0], vec![]],
                ))
                .branch(BranchDef::std_string("label", &["a", "b", "c", "d", "e"]))
                .branch(BranchDef::leaflist("packed", &[1, 2, 3, 4, 5], &[0.0; 5])),
        )
        .build();
    SourceFile::from_bytes(bytes)
        .expect("open fixture")
        .get_tree("events")
        .expect("events")
}

fn read_back(path: &std::path::Path) -> Vec<RecordBatch> {
    let file = File::open(path).expect("open parquet");
    ParquetRecordBatchReaderBuilder::try_new(file)
        .expect("parquet reader")
        .build()
        .expect("batch reader")
        .collect::<Result<Vec<_>, _>>()
        .expect("read batches")
}

#[test]
fn supported_columns_are_written_and_unsupported_ones_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("events.parquet");
    let report = events()
        .export(&ExportOptions::new(&destination).batch_size(2))
        .expect("export");

    assert_eq!(report.rows, 5);
    assert_eq!(report.columns, vec!["energy", "n", "px", "label"]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].column, "packed");

    let batches = read_back(&destination);
    let rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
    assert_eq!(rows, 5);

    let schema = batches[0].schema();
    assert_eq!(schema.field_with_name("label").unwrap().data_type(), &DataType::Utf8);
    assert!(matches!(
        schema.field_with_name("px").unwrap().data_type(),
        DataType::List(_)
    ));

    let energy: Vec<f64> = batches
        .iter()
        .flat_map(|batch| {
            batch
                .column_by_name("energy")
                .unwrap()
                .as_primitive::<Float64Type>()
                .values()
                .to_vec()
        })
        .collect();
    assert_eq!(energy, vec![4.1, 5.2, 6.3, 7.4, 8.5]);

    let px: Vec<Vec<f32>> = batches
        .iter()
        .flat_map(|batch| {
            let list = batch.column_by_name("px").unwrap().as_list::<i32>().clone();
            (0..list.len())
                .map(|i| {
                    list.value(i)
                        .as_primitive::<Float32Type>()
                        .values()
                        .to_vec()
                })
                .collect::<Vec<_>>()
        })
        .collect();
    assert_eq!(px, vec![vec![1.0], vec![], vec![2.0, 3.0], vec![4.0], vec![]]);

    let labels: Vec<String> = batches
        .iter()
        .flat_map(|batch| {
            batch
                .column_by_name("label")
                .unwrap()
                .as_string::<i32>()
                .iter()
                .map(|v| v.unwrap().to_string())
                .collect::<Vec<_>>()
        })
        .collect();
    assert_eq!(labels, vec!["a", "b", "c", "d", "e"]);
}

#[test]
fn selected_columns_keep_their_order() {
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("subset.parquet");
    let options = ExportOptions::new(&destination)
        .columns(["n", "energy"])
        .compression(Compression::Fast);
    let report = export(&events(), &options).expect("export");
    assert_eq!(report.columns, vec!["n", "energy"]);
    assert!(report.skipped.is_empty());

    let batches = read_back(&destination);
    let schema = batches[0].schema();
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    assert_eq!(names, vec!["n", "energy"]);
    assert_eq!(
        batches[0].column(0).as_primitive::<Int32Type>().values(),
        &[1, 0, 2, 1, 0]
    );
}

#[test]
fn existing_destinations_need_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("events.parquet");
    std::fs::write(&destination, b"placeholder").unwrap();

    let options = ExportOptions::new(&destination).columns(["energy"]);
    assert!(matches!(
        events().export(&options),
        Err(ExportError::DestinationExists(_))
    ));
    assert_eq!(std::fs::read(&destination).unwrap(), b"placeholder");

    events()
        .export(&options.clone().overwrite(true).compression(Compression::Balanced))
        .expect("overwrite");
    assert_eq!(read_back(&destination)[0].num_rows(), 5);
}

#[test]
fn all_or_nothing_stops_at_the_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("strict.parquet");
    let options = ExportOptions::new(&destination).all_or_nothing(true);
    match events().export(&options) {
        Err(ExportError::Column { column, .. }) => assert_eq!(column, "packed"),
        other => panic!("expected a column failure, got {:?}", other),
    }
    assert!(!destination.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn nothing_to_export_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let options = ExportOptions::new(dir.path().join("none.parquet")).columns(["packed", "missing"]);
    assert!(matches!(
        events().export(&options),
        Err(ExportError::NoColumns)
    ));
}

#[test]
fn options_deserialize_with_defaults() {
    let options: ExportOptions = serde_json::from_str(
        r#"{ "destination": "out.parquet", "compression": "snappy", "columns": ["energy"] }"#,
    )
    .unwrap();
    assert_eq!(options.compression, Compression::Balanced);
    assert_eq!(options.columns.as_deref(), Some(&["energy".to_string()][..]));
    assert!(!options.overwrite);
    assert!(!options.all_or_nothing);
    assert!(options.batch_size > 0);
}
