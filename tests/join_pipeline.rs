// End-to-end join pipelines over in-memory sources

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Float64Array, Int32Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Float64Type, Int32Type, Int64Type, Schema, SchemaRef};

use mini_join_engine::expr::{col, lit, ExprBuilder, NamedExpr, ScalarLiteral};
use mini_join_engine::{
    BinaryOperatorSpec, ColumnBatch, EngineError, ExecutionConfig, JoinKind, JoinPipeline,
    MemoryPool, MemorySource,
};

fn keyed_schema(key: &str, payload: &str) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(key, DataType::Int32, true),
        Field::new(payload, DataType::Utf8, false),
    ]))
}

fn keyed_batch(schema: &SchemaRef, keys: Vec<Option<i32>>, payload: Vec<&str>) -> ColumnBatch {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int32Array::from(keys)),
        Arc::new(StringArray::from(payload)),
    ];
    ColumnBatch::try_new(schema.clone(), columns).unwrap()
}

fn source(schema: &SchemaRef, batches: Vec<ColumnBatch>) -> Box<MemorySource> {
    Box::new(MemorySource::new(schema.clone(), batches))
}

/// (left key, left payload, right key, right payload) per output row
fn joined_rows(batches: &[ColumnBatch]) -> Vec<(Option<i32>, Option<String>, Option<i32>, Option<String>)> {
    let text = |a: &ArrayRef, i: usize| {
        let a = a.as_string::<i32>();
        a.is_valid(i).then(|| a.value(i).to_string())
    };
    let int = |a: &ArrayRef, i: usize| {
        let a = a.as_primitive::<Int32Type>();
        a.is_valid(i).then(|| a.value(i))
    };
    let mut rows = Vec::new();
    for batch in batches {
        let c = batch.columns();
        for i in 0..batch.num_rows() {
            rows.push((int(&c[0], i), text(&c[1], i), int(&c[2], i), text(&c[3], i)));
        }
    }
    rows
}

fn hash_pipeline(
    kind: JoinKind,
    batch_size: usize,
    left: Vec<ColumnBatch>,
    right: Vec<ColumnBatch>,
    pool: Arc<MemoryPool>,
) -> JoinPipeline {
    let ls = keyed_schema("id", "name");
    let rs = keyed_schema("fk", "tag");
    let config = ExecutionConfig::with_batch_size(batch_size);
    let spec = BinaryOperatorSpec::hash_join(kind, ls.clone(), rs.clone(), vec![0], vec![0], &config);
    JoinPipeline::try_new(&spec, source(&ls, left), source(&rs, right), &config, pool).unwrap()
}

#[test]
fn equi_join_emits_only_matching_keys() {
    let ls = keyed_schema("id", "name");
    let rs = keyed_schema("fk", "tag");
    let pipeline = hash_pipeline(
        JoinKind::Inner,
        4,
        vec![keyed_batch(&ls, vec![Some(1), Some(2)], vec!["a", "b"])],
        vec![keyed_batch(&rs, vec![Some(2), Some(3)], vec!["x", "y"])],
        MemoryPool::unbounded(),
    );

    let out = pipeline.run().unwrap();
    assert_eq!(
        joined_rows(&out),
        vec![(Some(2), Some("b".to_string()), Some(2), Some("x".to_string()))]
    );
    assert_eq!(out.len(), 1);
    assert!(out[0].num_rows() < 4);
}

#[test]
fn ten_row_input_split_four_four_two() {
    let ls = keyed_schema("id", "name");
    let rs = keyed_schema("fk", "tag");
    let keys: Vec<Option<i32>> = (0..10).map(Some).collect();
    let names = vec!["n"; 10];
    let pipeline = hash_pipeline(
        JoinKind::Inner,
        4,
        vec![keyed_batch(&ls, keys.clone(), names.clone())],
        vec![keyed_batch(&rs, keys, names)],
        MemoryPool::unbounded(),
    );

    let out = pipeline.run().unwrap();
    let sizes: Vec<usize> = out.iter().map(ColumnBatch::num_rows).collect();
    assert_eq!(sizes, vec![4, 4, 2]);
    let sequence: Vec<u64> = out.iter().map(ColumnBatch::sequence_number).collect();
    assert_eq!(sequence, vec![0, 1, 2]);
}

#[test]
fn outer_kinds_pad_the_missing_side() {
    let ls = keyed_schema("id", "name");
    let rs = keyed_schema("fk", "tag");
    let left = || vec![keyed_batch(&ls, vec![Some(1), Some(2), None], vec!["a", "b", "n"])];
    let right = || vec![keyed_batch(&rs, vec![Some(2), Some(5), None], vec!["x", "y", "z"])];
    let s = |v: &str| Some(v.to_string());

    let run = |kind| {
        let out = hash_pipeline(kind, 8, left(), right(), MemoryPool::unbounded())
            .run()
            .unwrap();
        joined_rows(&out)
    };

    let matched = (Some(2), s("b"), Some(2), s("x"));
    assert_eq!(run(JoinKind::Inner), vec![matched.clone()]);
    assert_eq!(
        run(JoinKind::LeftOuter),
        vec![
            matched.clone(),
            (Some(1), s("a"), None, None),
            (None, s("n"), None, None),
        ]
    );
    assert_eq!(
        run(JoinKind::RightOuter),
        vec![
            matched.clone(),
            (None, None, Some(5), s("y")),
            (None, None, None, s("z")),
        ]
    );
    assert_eq!(
        run(JoinKind::FullOuter),
        vec![
            matched,
            (None, None, Some(5), s("y")),
            (None, None, None, s("z")),
            (Some(1), s("a"), None, None),
            (None, s("n"), None, None),
        ]
    );
}

#[test]
fn empty_inputs_end_with_one_empty_batch() {
    let pipeline = hash_pipeline(JoinKind::FullOuter, 4, vec![], vec![], MemoryPool::unbounded());
    let out = pipeline.run().unwrap();
    assert_eq!(out.len(), 1);
    assert!(out[0].is_empty());
    assert_eq!(out[0].num_columns(), 4);
}

#[test]
fn budget_exhaustion_surfaces_as_join_failure() {
    let ls = keyed_schema("id", "name");
    let rs = keyed_schema("fk", "tag");
    let keys: Vec<Option<i32>> = (0..5000).map(Some).collect();
    let names = vec!["payload"; 5000];
    let pool = MemoryPool::new(1024);
    let mut pipeline = hash_pipeline(
        JoinKind::Inner,
        64,
        vec![keyed_batch(&ls, keys, names)],
        vec![keyed_batch(&rs, vec![Some(1)], vec!["x"])],
        pool.clone(),
    );

    let mut produced = 0;
    let err = pipeline
        .run_with_sink(|_| {
            produced += 1;
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::JoinExecution { .. }));
    assert_eq!(produced, 0);
    assert_eq!(pool.in_use(), 0);
}

#[test]
fn cross_join_evaluates_expression_list() {
    let ls = Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, false)]));
    let rs = Arc::new(Schema::new(vec![Field::new("b", DataType::Int64, false)]));
    let left = ColumnBatch::try_new(ls.clone(), vec![Arc::new(Int64Array::from(vec![1, 2, 3]))])
        .unwrap();
    let right = ColumnBatch::try_new(rs.clone(), vec![Arc::new(Int64Array::from(vec![10, 20]))])
        .unwrap();

    let config = ExecutionConfig::with_batch_size(4);
    let spec = BinaryOperatorSpec::cross_join(
        ls.clone(),
        rs.clone(),
        Some(col(0).neq(lit(ScalarLiteral::Int64(2)))),
        vec![
            NamedExpr::new(col(1), "b"),
            NamedExpr::new(col(0), "a"),
            NamedExpr::new(col(0).lt(col(1)), "a_lt_b"),
        ],
        &config,
    );
    let mut pipeline = JoinPipeline::try_new(
        &spec,
        Box::new(MemorySource::new(ls, vec![left])),
        Box::new(MemorySource::new(rs, vec![right])),
        &config,
        MemoryPool::unbounded(),
    )
    .unwrap();

    let schema = pipeline.output_schema().unwrap();
    assert_eq!(schema.field(2).data_type(), &DataType::Boolean);

    let out = pipeline.run().unwrap();
    let mut pairs = Vec::new();
    for batch in &out {
        let b = batch.column(0).unwrap().as_primitive::<Int64Type>();
        let a = batch.column(1).unwrap().as_primitive::<Int64Type>();
        let lt = batch.column(2).unwrap().as_boolean();
        for i in 0..batch.num_rows() {
            pairs.push((a.value(i), b.value(i), lt.value(i)));
        }
    }
    assert_eq!(
        pairs,
        vec![(1, 10, true), (1, 20, true), (3, 10, true), (3, 20, true)]
    );
    // 4 surviving pairs fill one batch; an empty batch ends the stream.
    let sizes: Vec<usize> = out.iter().map(ColumnBatch::num_rows).collect();
    assert_eq!(sizes, vec![4, 0]);
}

#[test]
fn hash_and_cross_join_agree_on_float_keys() {
    let ls = Arc::new(Schema::new(vec![Field::new("x", DataType::Float64, false)]));
    let rs = Arc::new(Schema::new(vec![Field::new("y", DataType::Float64, false)]));
    let left = || {
        let values: ArrayRef = Arc::new(Float64Array::from(vec![0.0, f64::NAN, 2.5]));
        vec![ColumnBatch::try_new(ls.clone(), vec![values]).unwrap()]
    };
    let right = || {
        let values: ArrayRef = Arc::new(Float64Array::from(vec![-0.0, f64::NAN, 2.5]));
        vec![ColumnBatch::try_new(rs.clone(), vec![values]).unwrap()]
    };
    let pairs = |out: Vec<ColumnBatch>| {
        let mut pairs = Vec::new();
        for batch in &out {
            let x = batch.column(0).unwrap().as_primitive::<Float64Type>();
            let y = batch.column(1).unwrap().as_primitive::<Float64Type>();
            for i in 0..batch.num_rows() {
                pairs.push((x.value(i).to_string(), y.value(i).to_string()));
            }
        }
        pairs.sort();
        pairs
    };

    let config = ExecutionConfig::with_batch_size(4);
    let hash = BinaryOperatorSpec::hash_join(JoinKind::Inner, ls.clone(), rs.clone(), vec![0], vec![0], &config);
    let hash_out = JoinPipeline::try_new(&hash, source(&ls, left()), source(&rs, right()), &config, MemoryPool::unbounded())
        .unwrap()
        .run()
        .unwrap();

    let cross = BinaryOperatorSpec::cross_join(
        ls.clone(),
        rs.clone(),
        Some(col(0).eq(col(1))),
        vec![NamedExpr::new(col(0), "x"), NamedExpr::new(col(1), "y")],
        &config,
    );
    let cross_out = JoinPipeline::try_new(&cross, source(&ls, left()), source(&rs, right()), &config, MemoryPool::unbounded())
        .unwrap()
        .run()
        .unwrap();

    let expected = vec![
        ("0".to_string(), "-0".to_string()),
        ("2.5".to_string(), "2.5".to_string()),
    ];
    assert_eq!(pairs(hash_out), expected);
    assert_eq!(pairs(cross_out), expected);
}

#[test]
fn config_loads_from_json() {
    let config: ExecutionConfig =
        serde_json::from_str(r#"{ "batch_size_rows": 2, "memory_budget_bytes": 1048576 }"#).unwrap();
    assert_eq!(config.queue_capacity, ExecutionConfig::default().queue_capacity);

    let pool = MemoryPool::from_budget(config.memory_budget_bytes);
    assert_eq!(pool.budget(), 1 << 20);

    let ls = keyed_schema("id", "name");
    let rs = keyed_schema("fk", "tag");
    let spec = BinaryOperatorSpec::hash_join(JoinKind::Inner, ls.clone(), rs.clone(), vec![0], vec![0], &config);
    let out = JoinPipeline::try_new(
        &spec,
        source(&ls, vec![keyed_batch(&ls, vec![Some(7), Some(7), Some(7)], vec!["a", "b", "c"])]),
        source(&rs, vec![keyed_batch(&rs, vec![Some(7)], vec!["x"])]),
        &config,
        pool,
    )
    .unwrap()
    .run()
    .unwrap();
    let sizes: Vec<usize> = out.iter().map(ColumnBatch::num_rows).collect();
    assert_eq!(sizes, vec![2, 1]);
}
