//! End-to-end pipeline tests: in-memory tarball → filter → budgets →
//! chunker, with no network involved.

use flate2::write::GzEncoder;
use flate2::Compression;
use tar::Header;

use gitrag::chunk::Chunker;
use gitrag::config::{ChunkingConfig, IngestLimits};
use gitrag::filter::PathFilter;
use gitrag::ingest::{collect_files, StopReason};

fn build_tarball(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let gz = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(gz);
    for (path, data) in entries {
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("repo-0123abc/{path}"), *data)
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

#[test]
fn mixed_repo_yields_only_admitted_source_chunks() {
    // ~50 tokens of Python, a denylisted dependency file, and a binary.
    let python = "def handler(event):\n    return {\"status\": 200, \"body\": event[\"path\"]}\n";
    let tarball = build_tarball(&[
        ("a.py", python.as_bytes()),
        ("node_modules/b.js", b"module.exports = () => 1;".as_slice()),
        ("img.png", &[0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a]),
    ]);

    let limits = IngestLimits::default();
    let filter = PathFilter::new(&limits.deny_dirs);
    let (files, stats) = collect_files(tarball.as_slice(), &filter, &limits).unwrap();

    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, "a.py");
    assert_eq!(stats.filtered, 2);

    // target 800 / overlap 120: the short file fits in one window.
    let chunker = Chunker::new(&ChunkingConfig::default());
    let chunks = chunker.chunk_corpus(&files);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].file, "a.py");
    assert!(!chunks.iter().any(|c| c.file.contains("node_modules")));
    assert!(!chunks.iter().any(|c| c.file == "img.png"));
}

#[test]
fn byte_budget_truncates_second_file_and_stops() {
    let f1 = vec![b'a'; 800];
    let f2 = vec![b'b'; 800];
    let tarball = build_tarball(&[("f1.txt", f1.as_slice()), ("f2.txt", f2.as_slice())]);

    let mut limits = IngestLimits::default();
    limits.byte_budget = 1000;
    let filter = PathFilter::new(&limits.deny_dirs);
    let (files, stats) = collect_files(tarball.as_slice(), &filter, &limits).unwrap();

    assert_eq!(files.len(), 2);
    assert_eq!(files[0].content.len(), 800);
    assert_eq!(files[1].content.len(), 200);
    assert_eq!(stats.admitted_bytes, 1000);
}

#[test]
fn budget_invariants_hold_across_a_larger_tree() {
    let entries: Vec<(String, Vec<u8>)> = (0..40)
        .map(|i| {
            (
                format!("src/module_{i}.rs"),
                format!("pub fn f_{i}() -> usize {{ {i} }}\n").repeat(20).into_bytes(),
            )
        })
        .collect();
    let borrowed: Vec<(&str, &[u8])> = entries
        .iter()
        .map(|(p, d)| (p.as_str(), d.as_slice()))
        .collect();
    let tarball = build_tarball(&borrowed);

    let mut limits = IngestLimits::default();
    limits.max_files = 10;
    limits.byte_budget = 4000;
    let filter = PathFilter::new(&limits.deny_dirs);
    let (files, stats) = collect_files(tarball.as_slice(), &filter, &limits).unwrap();

    assert!(files.len() <= limits.max_files);
    let total: usize = files.iter().map(|f| f.content.len()).sum();
    assert!(total <= limits.byte_budget);
    assert_eq!(total, stats.admitted_bytes);
    assert!(matches!(
        stats.stopped,
        Some(StopReason::FileBudget) | Some(StopReason::ByteBudget)
    ));
}

#[test]
fn reingesting_identical_content_produces_identical_chunk_ids() {
    let body = "fn main() {\n    println!(\"hello\");\n}\n".repeat(50);
    let tarball = build_tarball(&[
        ("src/main.rs", body.as_bytes()),
        ("README.md", b"# demo\n\nsome docs".as_slice()),
    ]);

    let limits = IngestLimits::default();
    let filter = PathFilter::new(&limits.deny_dirs);
    let mut config = ChunkingConfig::default();
    config.target_tokens = 64;
    config.overlap_tokens = 16;
    let chunker = Chunker::new(&config);

    let run = |bytes: &[u8]| -> Vec<String> {
        let (files, _) = collect_files(bytes, &filter, &limits).unwrap();
        chunker
            .chunk_corpus(&files)
            .into_iter()
            .map(|c| c.chunk_id)
            .collect()
    };

    let first = run(&tarball);
    let second = run(&tarball);
    assert!(first.len() > 1);
    assert_eq!(first, second);

    // Ids are unique within a run.
    let mut deduped = first.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(deduped.len(), first.len());
}
