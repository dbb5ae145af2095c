use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndstore::{
    Backend, BackendConfig, Catalogue, DataAccessibility, Dataset, Dataspace, Dtype, Fragment,
    FragmentDescriptor, Hypercube, MemBackend, MemCatalogue, MeteredBackend, NdStoreError,
    PosixBackend, Store, StoreConfig,
};

const HEIGHT: usize = 10;
const WIDTH: usize = 4096;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Store backed by in-memory backends with the given names and configs.
fn mem_store(configs: &[(&str, BackendConfig)]) -> Store {
    init_logging();
    let mut store = Store::new(StoreConfig::default(), Arc::new(MemCatalogue::new()));
    for (name, config) in configs {
        let backend = Arc::new(MemBackend::new(*name, config.clone()));
        store.register_backend(backend).expect("register backend");
    }
    store
}

fn small_fragments(max_fragment_size: usize) -> BackendConfig {
    BackendConfig {
        max_fragment_size,
        max_threads_per_node: 2,
        ..BackendConfig::default()
    }
}

/// Deterministic byte pattern.
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) % 251) as u8).collect()
}

fn u64_buf(values: impl Iterator<Item = u64>) -> Vec<u8> {
    let mut buf = Vec::new();
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

fn i32_at(buf: &[u8], index: usize) -> i32 {
    i32::from_le_bytes(buf[index * 4..index * 4 + 4].try_into().unwrap())
}

fn f32_at(buf: &[u8], index: usize) -> f32 {
    f32::from_le_bytes(buf[index * 4..index * 4 + 4].try_into().unwrap())
}

// ---------------------------------------------------------------------------
// End-to-end round trips
// ---------------------------------------------------------------------------

#[test]
fn two_d_uint64_round_trip_on_posix() {
    init_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = Arc::new(PosixBackend::new(
        "posix0",
        dir.path().join("data"),
        BackendConfig::default(),
    ));
    let mut store = Store::new(StoreConfig::default(), Arc::new(MemCatalogue::new()));
    store.register_backend(backend).expect("register");
    store
        .mkfs(false, DataAccessibility::Global)
        .expect("mkfs should create the tree");

    let space = Dataspace::new(Dtype::Uint64, &[HEIGHT as i64, WIDTH as i64]).expect("space");
    let dataset = Dataset::create("readwrite", space.clone()).expect("dataset");

    let buf_w = u64_buf((0..(HEIGHT * WIDTH) as u64).map(|i| i + 1));
    store
        .write_blocking(&dataset, &buf_w, &space)
        .expect("write should succeed");

    let mut buf_r = vec![0u8; buf_w.len()];
    let fill = store
        .read_blocking(&dataset, &mut buf_r, &space)
        .expect("read should succeed");
    assert!(fill.is_none(), "fully written region needs no fill");

    let mismatches = buf_w
        .iter()
        .zip(&buf_r)
        .filter(|(a, b)| a != b)
        .count();
    assert_eq!(mismatches, 0, "round trip must be bytewise exact");
}

#[test]
fn round_trip_across_shapes_and_types() {
    let cases: &[(Dtype, &[i64])] = &[
        (Dtype::Int8, &[17]),
        (Dtype::Int32, &[5, 7]),
        (Dtype::Uint64, &[3, 4, 5]),
        (Dtype::Float64, &[2, 3, 2, 2]),
    ];
    for &(dtype, shape) in cases {
        // A small fragment cap so every case exercises real splitting.
        let store = mem_store(&[("m0", small_fragments(128))]);
        let space = Dataspace::new(dtype, shape).expect("space");
        let dataset = Dataset::create("shapes", space.clone()).expect("dataset");

        let data = pattern(space.byte_size());
        store
            .write_blocking(&dataset, &data, &space)
            .expect("write");

        let mut out = vec![0u8; data.len()];
        store
            .read_blocking(&dataset, &mut out, &space)
            .expect("read");
        assert_eq!(data, out, "round trip failed for {dtype:?} {shape:?}");
    }
}

#[test]
fn sub_region_read_gathers_partial_fragments() {
    // Small fragments so the read region clips several row-slab fragments:
    // every retained fragment delivers only part of itself.
    let store = mem_store(&[("m0", small_fragments(128))]);
    let space = Dataspace::new(Dtype::Int32, &[10, 10]).expect("space");
    let dataset = Dataset::create("subread", space.clone()).expect("dataset");

    let mut data = Vec::new();
    for v in 0..100i32 {
        data.extend_from_slice(&v.to_le_bytes());
    }
    store.write_blocking(&dataset, &data, &space).expect("write");

    let window = Dataspace::new(Dtype::Int32, &[4, 4])
        .expect("window")
        .with_offset(&[4, 2])
        .expect("offset");
    let mut out = vec![0u8; 64];
    let fill = store
        .read_blocking(&dataset, &mut out, &window)
        .expect("read window");
    assert!(fill.is_none(), "the window is fully covered");

    for row in 0..4usize {
        for col in 0..4usize {
            let got = i32_at(&out, row * 4 + col);
            let expected = ((row + 4) * 10 + col + 2) as i32;
            assert_eq!(got, expected, "wrong value at window ({row},{col})");
        }
    }
}

#[test]
fn inline_execution_round_trip() {
    // A zero thread budget means no pool: tasks run on the caller's thread.
    let config = BackendConfig {
        max_threads_per_node: 0,
        ..small_fragments(64)
    };
    let store = mem_store(&[("inline", config)]);
    let space = Dataspace::new(Dtype::Uint8, &[300]).expect("space");
    let dataset = Dataset::create("inline", space.clone()).expect("dataset");

    let data = pattern(300);
    store.write_blocking(&dataset, &data, &space).expect("write");
    let mut out = vec![0u8; 300];
    store.read_blocking(&dataset, &mut out, &space).expect("read");
    assert_eq!(data, out);
}

// ---------------------------------------------------------------------------
// Overwrite semantics
// ---------------------------------------------------------------------------

#[test]
fn overwrite_inner_region_wins() {
    let store = mem_store(&[("m0", BackendConfig::default())]);
    let space = Dataspace::new(Dtype::Float32, &[8, 8]).expect("space");
    let dataset = Dataset::create("overwrite", space.clone()).expect("dataset");

    let ones: Vec<u8> = (0..64).flat_map(|_| 1.0f32.to_le_bytes()).collect();
    store.write_blocking(&dataset, &ones, &space).expect("write ones");

    let inner = Dataspace::new(Dtype::Float32, &[4, 4])
        .expect("inner")
        .with_offset(&[2, 2])
        .expect("offset");
    let zeros = vec![0u8; 64];
    store.write_blocking(&dataset, &zeros, &inner).expect("write zeros");

    let mut out = vec![0u8; 256];
    store.read_blocking(&dataset, &mut out, &space).expect("read");

    for row in 0..8i64 {
        for col in 0..8i64 {
            let value = f32_at(&out, (row * 8 + col) as usize);
            let expected = if (2..6).contains(&row) && (2..6).contains(&col) {
                0.0
            } else {
                1.0
            };
            assert_eq!(value, expected, "wrong value at ({row},{col})");
        }
    }
}

#[test]
fn later_write_shadows_overlapped_band() {
    let store = mem_store(&[("m0", BackendConfig::default())]);
    let space = Dataspace::new(Dtype::Uint8, &[100]).expect("space");
    let dataset = Dataset::create("bands", space.clone()).expect("dataset");

    store
        .write_blocking(&dataset, &vec![1u8; 100], &space)
        .expect("write base");
    let band = Dataspace::new(Dtype::Uint8, &[50])
        .expect("band")
        .with_offset(&[25])
        .expect("offset");
    store
        .write_blocking(&dataset, &vec![2u8; 50], &band)
        .expect("write band");

    let mut out = vec![0u8; 100];
    store.read_blocking(&dataset, &mut out, &space).expect("read");
    assert!(out[0..25].iter().all(|&b| b == 1), "prefix keeps the old data");
    assert!(out[25..75].iter().all(|&b| b == 2), "band shows the new data");
    assert!(out[75..100].iter().all(|&b| b == 1), "suffix keeps the old data");
}

// ---------------------------------------------------------------------------
// Fill values
// ---------------------------------------------------------------------------

#[test]
fn partial_read_fills_the_uncovered_tail() {
    let store = mem_store(&[("m0", BackendConfig::default())]);
    let space = Dataspace::new(Dtype::Int32, &[100]).expect("space");
    let dataset = Dataset::create("fill", space.clone())
        .expect("dataset")
        .with_fill_value(&(-1i32).to_le_bytes())
        .expect("fill value");

    let head = Dataspace::new(Dtype::Int32, &[50]).expect("head");
    let mut head_buf = Vec::new();
    for v in 0..50i32 {
        head_buf.extend_from_slice(&v.to_le_bytes());
    }
    store
        .write_blocking(&dataset, &head_buf, &head)
        .expect("write head");

    let mut out = vec![0u8; 400];
    let fill = store
        .read_blocking(&dataset, &mut out, &space)
        .expect("read")
        .expect("tail must have been filled");

    assert_eq!(
        fill,
        vec![Hypercube::from_offset_size(&[50], &[50])],
        "fill region is exactly the unwritten tail"
    );
    for i in 0..50 {
        assert_eq!(i32_at(&out, i), i as i32, "written prefix survives");
    }
    for i in 50..100 {
        assert_eq!(i32_at(&out, i), -1, "tail takes the fill value");
    }
}

#[test]
fn read_of_empty_dataset_is_all_fill() {
    let store = mem_store(&[("m0", BackendConfig::default())]);
    let space = Dataspace::new(Dtype::Int32, &[4, 4]).expect("space");
    let dataset = Dataset::create("pristine", space.clone())
        .expect("dataset")
        .with_fill_value(&7i32.to_le_bytes())
        .expect("fill value");

    let mut out = vec![0u8; 64];
    let fill = store
        .read_blocking(&dataset, &mut out, &space)
        .expect("read")
        .expect("everything must be filled");

    let filled: i64 = fill.iter().map(Hypercube::element_count).sum();
    assert_eq!(filled, 16, "the whole region was filled");
    for i in 0..16 {
        assert_eq!(i32_at(&out, i), 7);
    }
}

#[test]
fn read_without_fill_value_fails_and_leaves_buffer_untouched() {
    let store = mem_store(&[("m0", BackendConfig::default())]);
    let space = Dataspace::new(Dtype::Uint8, &[64]).expect("space");
    let dataset = Dataset::create("nofill", space.clone()).expect("dataset");

    let mut out = vec![0xABu8; 64];
    let err = store
        .read_blocking(&dataset, &mut out, &space)
        .expect_err("uncovered read without fill value must fail");
    assert!(matches!(err, NdStoreError::IncompleteData));
    assert!(
        out.iter().all(|&b| b == 0xAB),
        "no byte of the user buffer may change"
    );
}

// ---------------------------------------------------------------------------
// Strided user buffers
// ---------------------------------------------------------------------------

#[test]
fn strided_write_takes_every_second_column() {
    let store = mem_store(&[("m0", BackendConfig::default())]);
    let dataset_space = Dataspace::new(Dtype::Int32, &[10, 10]).expect("space");
    let dataset = Dataset::create("strided", dataset_space.clone()).expect("dataset");

    // Source buffer laid out as [10,20]; the write space picks every second
    // column via a stride of 2 along the fast axis.
    let mut src = Vec::new();
    for i in 0..200i32 {
        src.extend_from_slice(&i.to_le_bytes());
    }
    let write_space = Dataspace::new(Dtype::Int32, &[10, 10])
        .expect("write space")
        .with_stride(&[20, 2])
        .expect("stride");
    store
        .write_blocking(&dataset, &src, &write_space)
        .expect("strided write");

    let mut out = vec![0u8; 400];
    store
        .read_blocking(&dataset, &mut out, &dataset_space)
        .expect("read");

    for row in 0..10usize {
        for col in 0..10usize {
            let got = i32_at(&out, row * 10 + col);
            let expected = (row * 20 + col * 2) as i32;
            assert_eq!(got, expected, "wrong value at ({row},{col})");
        }
    }
}

// ---------------------------------------------------------------------------
// Multi-backend distribution
// ---------------------------------------------------------------------------

#[test]
fn weighted_backends_split_the_region_three_to_one() {
    let fast = BackendConfig {
        estimated_throughput: 3.0,
        ..BackendConfig::default()
    };
    let slow = BackendConfig {
        estimated_throughput: 1.0,
        ..BackendConfig::default()
    };
    let store = mem_store(&[("fast", fast), ("slow", slow)]);

    let space = Dataspace::new(Dtype::Int8, &[400]).expect("space");
    let dataset = Dataset::create("weighted", space.clone()).expect("dataset");
    store
        .write_blocking(&dataset, &pattern(400), &space)
        .expect("write");

    let descriptors = store
        .catalogue()
        .lookup_fragments("weighted", &space.extends())
        .expect("lookup");
    assert!(!descriptors.is_empty());

    let mut covered = 0i64;
    for descriptor in &descriptors {
        let extends = descriptor.extends();
        covered += extends.element_count();
        match descriptor.backend.as_str() {
            "fast" => assert!(
                extends.range(0).end <= 300,
                "fast backend owns [0,300), got {extends:?}"
            ),
            "slow" => assert!(
                extends.range(0).start >= 300,
                "slow backend owns [300,400), got {extends:?}"
            ),
            other => panic!("unexpected backend '{other}'"),
        }
    }
    assert_eq!(covered, 400, "the fragments partition the write");
}

// ---------------------------------------------------------------------------
// Redundancy pruning against manually seeded fragments
// ---------------------------------------------------------------------------

/// Persist a dense fragment directly through a backend and catalogue, the
/// way an external tool would seed a dataset.
fn seed_fragment(
    backend: &MemBackend,
    catalogue: &Arc<dyn Catalogue>,
    dataset: &str,
    offset: i64,
    len: i64,
    value: u8,
    seq: u64,
) {
    let space = Dataspace::new(Dtype::Uint8, &[len])
        .expect("space")
        .with_offset(&[offset])
        .expect("offset");
    let mut fragment = Fragment::with_data(
        dataset,
        backend.name(),
        space.clone(),
        vec![value; len as usize],
    );
    backend.commit(&mut fragment).expect("commit");
    catalogue
        .register(FragmentDescriptor {
            dataset: dataset.to_string(),
            backend: backend.name().to_string(),
            space,
            seq,
        })
        .expect("register");
}

#[test]
fn redundant_fragment_is_pruned_on_partial_reads() {
    init_logging();
    let backend = Arc::new(MemBackend::new("m0", BackendConfig::default()));
    let catalogue: Arc<dyn Catalogue> = Arc::new(MemCatalogue::new());
    let mut store = Store::new(StoreConfig::default(), Arc::clone(&catalogue));
    store.register_backend(backend.clone()).expect("register");

    let dataset = Dataset::create(
        "manual",
        Dataspace::new(Dtype::Uint8, &[100]).expect("space"),
    )
    .expect("dataset");

    // Two overlapping fragments seeded in one batch: [0,60) of 1s and
    // [40,100) of 2s, with equal commit sequence.
    seed_fragment(&backend, &catalogue, "manual", 0, 60, 1, 1);
    seed_fragment(&backend, &catalogue, "manual", 40, 60, 2, 1);
    assert_eq!(backend.object_count(), 2, "both fragments are stored");

    // Reading everything needs both fragments.
    let full = Dataspace::new(Dtype::Uint8, &[100]).expect("space");
    let mut out = vec![0u8; 100];
    store.read_blocking(&dataset, &mut out, &full).expect("read full");
    assert!(out[0..60].iter().all(|&b| b == 1), "first fragment's claim");
    assert!(out[60..100].iter().all(|&b| b == 2), "second fragment's claim");

    // Reading [0,50) is covered by the first fragment alone; had the second
    // been retained, bytes [40,50) would read 2.
    let head = Dataspace::new(Dtype::Uint8, &[50]).expect("head");
    let mut out = vec![0u8; 50];
    store.read_blocking(&dataset, &mut out, &head).expect("read head");
    assert!(
        out.iter().all(|&b| b == 1),
        "only the first fragment may be retained for [0,50)"
    );
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn concurrent_requests_complete_without_deadlock() {
    let store = mem_store(&[("m0", small_fragments(64))]);
    let store = Arc::new(store);

    std::thread::scope(|scope| {
        for t in 0..8 {
            let store = Arc::clone(&store);
            scope.spawn(move || {
                let space = Dataspace::new(Dtype::Uint8, &[256]).expect("space");
                let dataset =
                    Dataset::create(format!("stress{t}"), space.clone()).expect("dataset");
                for round in 0..10 {
                    let data = pattern(256 + t + round);
                    let data = &data[t + round..];
                    store.write_blocking(&dataset, data, &space).expect("write");
                    let mut out = vec![0u8; 256];
                    store.read_blocking(&dataset, &mut out, &space).expect("read");
                    assert_eq!(data, &out[..], "thread {t} round {round}");
                }
            });
        }
    });
}

// ---------------------------------------------------------------------------
// Throughput metering
// ---------------------------------------------------------------------------

#[test]
fn metered_backend_reports_observed_throughput() {
    init_logging();
    let inner = MemBackend::new(
        "metered",
        BackendConfig {
            estimated_throughput: 42.0,
            ..BackendConfig::default()
        },
    );
    let backend = Arc::new(MeteredBackend::new(inner));
    assert_eq!(
        backend.estimate_throughput(),
        42.0,
        "before any traffic the configured estimate is used"
    );

    let mut store = Store::new(StoreConfig::default(), Arc::new(MemCatalogue::new()));
    store.register_backend(backend.clone()).expect("register");

    let space = Dataspace::new(Dtype::Uint8, &[4096]).expect("space");
    let dataset = Dataset::create("traffic", space.clone()).expect("dataset");
    store
        .write_blocking(&dataset, &pattern(4096), &space)
        .expect("write");
    let mut out = vec![0u8; 4096];
    store.read_blocking(&dataset, &mut out, &space).expect("read");

    assert!(
        backend.estimate_throughput() > 0.0,
        "observed traffic must produce a positive estimate"
    );
}

// ---------------------------------------------------------------------------
// POSIX backend integrity
// ---------------------------------------------------------------------------

fn find_fragment_file(root: &Path) -> Option<PathBuf> {
    for entry in fs::read_dir(root).ok()? {
        let path = entry.ok()?.path();
        if path.is_dir() {
            if let Some(found) = find_fragment_file(&path) {
                return Some(found);
            }
        } else if path.extension().is_some_and(|e| e == "frag") {
            return Some(path);
        }
    }
    None
}

#[test]
fn corrupted_fragment_payload_is_detected() {
    init_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("data");
    let backend = Arc::new(PosixBackend::new("posix0", &root, BackendConfig::default()));
    let mut store = Store::new(StoreConfig::default(), Arc::new(MemCatalogue::new()));
    store.register_backend(backend).expect("register");

    let space = Dataspace::new(Dtype::Uint8, &[32]).expect("space");
    let dataset = Dataset::create("integrity", space.clone()).expect("dataset");
    store
        .write_blocking(&dataset, &pattern(32), &space)
        .expect("write");

    let file = find_fragment_file(&root).expect("a fragment file exists");
    let mut bytes = fs::read(&file).expect("read fragment file");
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&file, bytes).expect("write corrupted file");

    let mut out = vec![0u8; 32];
    let err = store
        .read_blocking(&dataset, &mut out, &space)
        .expect_err("corruption must surface");
    match err {
        NdStoreError::Backend { source, .. } => {
            assert!(
                matches!(*source, NdStoreError::CrcMismatch(_)),
                "expected a CRC mismatch, got {source}"
            );
        }
        other => panic!("expected a backend error, got {other}"),
    }
}

#[test]
fn mkfs_enforce_discards_existing_fragments() {
    init_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = Arc::new(PosixBackend::new(
        "posix0",
        dir.path().join("data"),
        BackendConfig::default(),
    ));
    let mut store = Store::new(StoreConfig::default(), Arc::new(MemCatalogue::new()));
    store.register_backend(backend).expect("register");
    store.mkfs(false, DataAccessibility::Global).expect("mkfs");

    let space = Dataspace::new(Dtype::Uint8, &[16]).expect("space");
    let dataset = Dataset::create("wiped", space.clone()).expect("dataset");
    store
        .write_blocking(&dataset, &pattern(16), &space)
        .expect("write");

    store
        .mkfs(true, DataAccessibility::Global)
        .expect("reformat");

    let mut out = vec![0u8; 16];
    let err = store
        .read_blocking(&dataset, &mut out, &space)
        .expect_err("wiped dataset has nothing to read");
    assert!(matches!(err, NdStoreError::IncompleteData));
}

// ---------------------------------------------------------------------------
// Argument validation
// ---------------------------------------------------------------------------

#[test]
fn mismatched_and_oversized_requests_are_rejected() {
    let store = mem_store(&[("m0", BackendConfig::default())]);
    let dataset = Dataset::create(
        "strict",
        Dataspace::new(Dtype::Int32, &[10]).expect("space"),
    )
    .expect("dataset");

    // Wrong element type.
    let wrong_type = Dataspace::new(Dtype::Float32, &[10]).expect("space");
    assert!(matches!(
        store.write_blocking(&dataset, &[0u8; 40], &wrong_type),
        Err(NdStoreError::InvalidArgument(_))
    ));

    // Region outside the dataset extents.
    let oversized = Dataspace::new(Dtype::Int32, &[20]).expect("space");
    assert!(matches!(
        store.write_blocking(&dataset, &[0u8; 80], &oversized),
        Err(NdStoreError::InvalidArgument(_))
    ));

    // Buffer shorter than the region needs.
    let space = Dataspace::new(Dtype::Int32, &[10]).expect("space");
    assert!(matches!(
        store.write_blocking(&dataset, &[0u8; 8], &space),
        Err(NdStoreError::InvalidArgument(_))
    ));
}
