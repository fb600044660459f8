//! End-to-end scenarios (distilled spec §8 S1-S6), run against `MemFilesystem`
//! and `RecordingSpawner` so no real process is ever spawned.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parr_core::exec::progress::ProgressReporter;
use parr_core::exec::scheduler::{self, execute_tree, CancelFlag};
use parr_core::exec::{RecordingSpawner, Spawner};
use parr_core::fs::MemFilesystem;
use parr_core::graph::build_execution_graph;
use parr_core::logging::{Destination, Logger};
use parr_core::script::{self, Configuration};
use parr_core::value::{DynamicSet, ScopeStack};
use parr_core::{Filesystem, GraphError};
use std::sync::Mutex;

fn run(
    script_src: &str,
    fs: &MemFilesystem,
    cwd: &Path,
    config_override: impl FnOnce(&mut Configuration),
) -> (parr_core::exec::ExecutionReport, Arc<RecordingSpawner>) {
    let scopes = ScopeStack::new();
    let dynamic = DynamicSet::with_reserved();
    let (mut parsed, scopes) =
        script::parse(script_src, "t.parr".to_string(), fs, cwd, scopes, dynamic.clone()).unwrap();
    config_override(&mut parsed.config);

    let (node, _warnings) = build_execution_graph(&parsed, "default", &scopes, &dynamic, fs, cwd).unwrap();
    let frozen = scheduler::freeze(&node);
    let spawner = Arc::new(RecordingSpawner::new());
    let spawner_dyn: Arc<dyn Spawner> = spawner.clone();
    let progress = Arc::new(ProgressReporter::new(0));
    let cancel = CancelFlag::new();
    let logger = Arc::new(Mutex::new(Logger::new(Destination::Stdout, script::Verbosity::Error).unwrap()));

    let report = tokio_test_block_on(execute_tree(
        frozen,
        parsed.shells.clone(),
        parsed.config.clone(),
        spawner_dyn,
        progress,
        logger,
        cancel,
        cwd.to_path_buf(),
    ));
    (report, spawner)
}

fn tokio_test_block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(fut)
}

#[test]
fn s1_foreach_copy_runs_once_per_match_then_skips_then_reruns_touched() {
    let script_src = r#"
        process: p {
          foreach ".*\\.txt$" { destination = "{?:directory}/{?:file}.out"; cp "{?}" "{destination}" }
        }
        execution: default { p(".*") }
    "#;

    let mut fs = MemFilesystem::new();
    fs.add_file("/work/a.txt", "a");
    fs.add_file("/work/b.txt", "b");

    let (report, spawner) = run(script_src, &fs, Path::new("/work"), |_| {});
    assert_eq!(report.transitions.len(), 2);
    assert!(report.transitions.iter().all(|t| t.ran));
    let calls = spawner.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().any(|c| c.raw_cmdline.contains("a.txt") && c.raw_cmdline.contains("a.out")));
    assert!(calls.iter().any(|c| c.raw_cmdline.contains("b.txt") && c.raw_cmdline.contains("b.out")));

    // Second run: outputs now exist and are newer than the inputs -> nothing runs.
    let input_mtime = fs.metadata(Path::new("/work/a.txt")).unwrap().modified;
    fs.add_file_at("/work/a.out", "a", input_mtime + Duration::from_secs(10));
    fs.add_file_at("/work/b.out", "b", input_mtime + Duration::from_secs(10));

    let (report2, spawner2) = run(script_src, &fs, Path::new("/work"), |_| {});
    assert_eq!(report2.transitions.len(), 2);
    assert!(report2.transitions.iter().all(|t| !t.ran));
    assert_eq!(spawner2.calls().len(), 0);

    // Touching a.txt (mtime + 2s past its output) re-runs only that transition.
    fs.touch("/work/a.txt", input_mtime + Duration::from_secs(12));
    let (report3, spawner3) = run(script_src, &fs, Path::new("/work"), |_| {});
    let ran: Vec<_> = report3.transitions.iter().filter(|t| t.ran).collect();
    assert_eq!(ran.len(), 1);
    let calls3 = spawner3.calls();
    assert_eq!(calls3.len(), 1);
    assert!(calls3[0].raw_cmdline.contains("a.txt"));
}

#[test]
fn s2_all_concatenation_forwards_temporary_to_dependent() {
    let script_src = r#"
        process: c {
          all ".*\\.part$" { ~destination = "/work/merged.bin"; cat "{@*}" > "{destination}" }
        }
        process: s {
          foreach ".*" { destination = "/work/final.bin"; sign "{?}" "{destination}" }
        }
        execution: default { c(".*\\.part$") > s }
    "#;

    let mut fs = MemFilesystem::new();
    fs.add_file("/work/a.part", "a");
    fs.add_file("/work/b.part", "b");

    let mut config_flag = false;
    let (report, spawner) = run(script_src, &fs, Path::new("/work"), |cfg| {
        cfg.remove_temporaries = true;
        config_flag = true;
    });
    assert!(config_flag);
    assert_eq!(report.transitions.len(), 2);
    assert!(report.transitions.iter().all(|t| t.ran));

    let calls = spawner.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].raw_cmdline.contains("cat"));
    assert!(calls[0].raw_cmdline.contains("merged.bin"));
    assert!(calls[1].raw_cmdline.contains("sign"));
    assert!(calls[1].raw_cmdline.contains("merged.bin"));
    assert!(calls[1].raw_cmdline.contains("final.bin"));

    // `c`'s output is declared temporary -- post-run cleanup deletes it once
    // `s` has consumed it, regardless of whether it actually landed on disk
    // under this spawner (RecordingSpawner never touches the fixture fs).
    let temp_output = report.transitions[0]
        .output
        .iter()
        .find(|p| p.lock().unwrap().is_temporary())
        .expect("c's destination is declared temporary");
    assert!(temp_output.lock().unwrap().is_temporary());
}

#[test]
fn s3_if_pragma_picks_matching_branch() {
    let fs = MemFilesystem::new();
    let mut scopes = ScopeStack::new();
    scopes.set(
        "OS",
        parr_core::value::StringLiteral::literal("windows", parr_core::LineInfo::synthetic()),
    );
    let (_script, scopes) = script::parse(
        r#"@if OS is "windows" @then shellId = "cmd"; @else shellId = "sh"; @end"#,
        "t.parr",
        &fs,
        Path::new("/work"),
        scopes,
        DynamicSet::with_reserved(),
    )
    .unwrap();
    assert_eq!(scopes.lookup("shellId").unwrap().get_string(), "cmd");
}

#[test]
fn s4_regex_captures_produce_renamed_output() {
    let script_src = r#"
        process: rename {
          foreach "(?<stem>.*)\\.bak$" { destination = "{stem}.txt"; mv "{?}" "{destination}" }
        }
        execution: default { rename(".*") }
    "#;

    let mut fs = MemFilesystem::new();
    fs.add_file("/work/note.bak", "x");

    let (report, spawner) = run(script_src, &fs, Path::new("/work"), |_| {});
    assert_eq!(report.transitions.len(), 1);
    let output_path = report.transitions[0].output[0].lock().unwrap().path_string();
    assert!(output_path.ends_with("note.txt"), "unexpected output path: {output_path}");
    assert_eq!(spawner.calls().len(), 1);
    assert!(spawner.calls()[0].raw_cmdline.contains("note.bak"));
}

#[test]
fn s5_duplicate_output_rejected_with_both_locations() {
    let script_src = r#"
        process: a { foreach ".*" { destination = "/work/x"; cp "{?}" "{destination}" } }
        process: b { foreach ".*" { destination = "/work/x"; cp "{?}" "{destination}" } }
        execution: default { a(".*") | b(".*") }
    "#;

    let mut fs = MemFilesystem::new();
    fs.add_file("/work/in.txt", "x");

    let scopes = ScopeStack::new();
    let dynamic = DynamicSet::with_reserved();
    let (parsed, scopes) =
        script::parse(script_src, "t.parr".to_string(), &fs, Path::new("/work"), scopes, dynamic.clone())
            .unwrap();

    let err = build_execution_graph(&parsed, "default", &scopes, &dynamic, &fs, Path::new("/work"))
        .unwrap_err();
    match err {
        GraphError::DuplicateOutput { path, locations } => {
            assert!(path.ends_with("x"));
            assert_eq!(locations.len(), 2);
        }
        other => panic!("expected DuplicateOutput, got {other:?}"),
    }
}

#[test]
fn s6_stale_output_deletion_removes_no_longer_produced_file() {
    use parr_core::exec::complete::{self, CompletionSummary};
    use parr_core::index::sqlite::SqliteIndex;
    use tempfile::tempdir;

    let dir = tempdir().unwrap();
    let db_path = dir.path().join("run.db");

    // First run: script produces both out/a.o and out/b.o.
    let script_v1 = r#"
        process: build {
          foreach ".*\\.c$" { destination = "/work/out/{?:file}.o"; cc "{?}" "{destination}" }
        }
        execution: default { build(".*\\.c$") }
    "#;
    let mut fs = MemFilesystem::new();
    fs.add_file("/work/a.c", "a");
    fs.add_file("/work/b.c", "b");

    let (report1, _spawner1) = run(script_v1, &fs, Path::new("/work"), |cfg| cfg.remove_remains = true);
    assert_eq!(report1.transitions.len(), 2);

    {
        let index = SqliteIndex::open(&db_path).unwrap();
        let mut summary = CompletionSummary::default();
        // Simulate both outputs having actually landed on disk for this run.
        fs.add_file("/work/out/a.o", "obj-a");
        fs.add_file("/work/out/b.o", "obj-b");
        complete::reconcile_index(&report1, &fs, &index, &mut summary).unwrap();
        assert!(summary.deleted_stale.is_empty());
    }

    // Second run: script edited so only a.c is compiled (b.c dropped). The
    // index reconciliation should now find out/b.o stale and delete it.
    let script_v2 = r#"
        process: build {
          foreach "a\\.c$" { destination = "/work/out/{?:file}.o"; cc "{?}" "{destination}" }
        }
        execution: default { build(".*\\.c$") }
    "#;
    let (report2, _spawner2) = run(script_v2, &fs, Path::new("/work"), |cfg| cfg.remove_remains = true);
    assert_eq!(report2.transitions.len(), 1);

    let index = SqliteIndex::open(&db_path).unwrap();
    let mut summary = CompletionSummary::default();
    complete::reconcile_index(&report2, &fs, &index, &mut summary).unwrap();
    assert_eq!(summary.deleted_stale.len(), 1);
    assert!(summary.deleted_stale[0].ends_with("b.o"));
    assert!(!fs.exists(Path::new("/work/out/b.o")));
}
