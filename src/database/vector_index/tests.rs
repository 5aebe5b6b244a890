use super::*;
use tempfile::TempDir;

fn sample_vectors() -> Vec<Vec<f32>> {
    vec![
        vec![0.0, 0.0, 0.0],
        vec![1.0, 0.0, 0.0],
        vec![0.0, 2.0, 0.0],
        vec![0.1, 0.2, 0.3],
        vec![-1.5, 0.25, 4.0],
    ]
}

#[test]
fn build_records_dimension_and_slots() {
    let index = VectorIndex::build(sample_vectors()).expect("should build index");

    assert_eq!(index.len(), 5);
    assert_eq!(index.dimension(), 3);
    assert_eq!(index.vector(2), Some(&[0.0, 2.0, 0.0][..]));
    assert_eq!(index.vector(5), None);
}

#[test]
fn build_rejects_mixed_dimensions() {
    let result = VectorIndex::build(vec![vec![1.0, 2.0], vec![1.0, 2.0, 3.0]]);
    assert!(matches!(
        result,
        Err(KbError::DimensionMismatch {
            expected: 2,
            actual: 3
        })
    ));
}

#[test]
fn build_rejects_non_finite_values() {
    assert!(VectorIndex::build(vec![vec![1.0, f32::NAN]]).is_err());
    assert!(VectorIndex::build(vec![vec![f32::INFINITY, 0.0]]).is_err());
    assert!(VectorIndex::build(vec![vec![]]).is_err());
}

#[test]
fn search_orders_by_distance() {
    let index = VectorIndex::build(sample_vectors()).expect("should build index");

    let hits = index.search(&[0.9, 0.0, 0.0], 3).expect("search should succeed");

    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].slot, 1);
    assert!((hits[0].distance - 0.1).abs() < 1e-6);
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[test]
fn search_breaks_ties_by_slot() {
    let index = VectorIndex::build(vec![
        vec![1.0, 0.0],
        vec![0.0, 1.0],
        vec![-1.0, 0.0],
        vec![0.0, -1.0],
    ])
    .expect("should build index");

    let hits = index.search(&[0.0, 0.0], 4).expect("search should succeed");
    let slots: Vec<usize> = hits.iter().map(|h| h.slot).collect();
    assert_eq!(slots, vec![0, 1, 2, 3]);

    let top_two = index.search(&[0.0, 0.0], 2).expect("search should succeed");
    let slots: Vec<usize> = top_two.iter().map(|h| h.slot).collect();
    assert_eq!(slots, vec![0, 1]);
}

#[test]
fn search_with_k_larger_than_index_returns_everything() {
    let index = VectorIndex::build(sample_vectors()).expect("should build index");

    let hits = index.search(&[0.3, 0.3, 0.3], 50).expect("search should succeed");

    assert_eq!(hits.len(), 5);
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[test]
fn search_rejects_zero_k() {
    let index = VectorIndex::build(sample_vectors()).expect("should build index");
    assert!(matches!(
        index.search(&[0.0, 0.0, 0.0], 0),
        Err(KbError::InvalidArgument(_))
    ));
}

#[test]
fn search_rejects_wrong_query_dimension() {
    let index = VectorIndex::build(sample_vectors()).expect("should build index");
    assert!(matches!(
        index.search(&[0.0, 0.0], 1),
        Err(KbError::DimensionMismatch { .. })
    ));
}

#[test]
fn empty_index_returns_no_results() {
    let index = VectorIndex::build(Vec::new()).expect("empty build is allowed");
    assert!(index.is_empty());

    let hits = index.search(&[1.0, 2.0], 3).expect("empty search is not an error");
    assert!(hits.is_empty());
}

#[test]
fn persist_and_load_round_trip() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("index.arrow");

    let index = VectorIndex::build(sample_vectors()).expect("should build index");
    index.persist(&path).expect("should persist index");

    let loaded = VectorIndex::load(&path).expect("should load index");
    assert_eq!(loaded, index);

    for query in [[0.0, 0.0, 0.0], [1.0, 1.0, 1.0], [-2.0, 0.5, 3.0]] {
        assert_eq!(
            loaded.search(&query, 5).expect("search should succeed"),
            index.search(&query, 5).expect("search should succeed")
        );
    }
}

#[test]
fn persist_preserves_exact_bits() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("index.arrow");

    let awkward = vec![vec![f32::MIN_POSITIVE, -0.0, 1.0e-38, 0.1 + 0.2, f32::MAX]];
    let index = VectorIndex::build(awkward.clone()).expect("should build index");
    index.persist(&path).expect("should persist index");

    let loaded = VectorIndex::load(&path).expect("should load index");
    let stored = loaded.vector(0).expect("slot 0 exists");
    for (a, b) in stored.iter().zip(&awkward[0]) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
}

#[test]
fn empty_index_round_trips() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("index.arrow");

    VectorIndex::default()
        .persist(&path)
        .expect("should persist empty index");
    let loaded = VectorIndex::load(&path).expect("should load empty index");
    assert!(loaded.is_empty());
}

#[test]
fn load_rejects_garbage() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("index.arrow");
    std::fs::write(&path, b"definitely not arrow").expect("should write file");

    assert!(matches!(
        VectorIndex::load(&path),
        Err(KbError::IndexCorrupt(_))
    ));
}
