use std::fs;
use std::path::Path;
use std::process::Command;

fn keygrid_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_keygrid"))
}

/// A fresh project root with a `.git` marker so `get_project_root` stops
/// walking up at the tempdir instead of escaping into the real filesystem.
fn project(tmp: &Path) {
    fs::create_dir_all(tmp.join(".git")).expect("seed .git marker");
}

#[test]
fn compress_decompress_round_trip() {
    let out = keygrid_bin().args(["compress", ">>>>>"]).output().expect("run compress");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let compressed = String::from_utf8_lossy(&out.stdout).trim().to_string();
    assert_eq!(compressed, ">5");

    let out = keygrid_bin().args(["decompress", &compressed]).output().expect("run decompress");
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), ">>>>>");
}

#[test]
fn get_char_reads_decompressed_index() {
    // "x3." decompresses to "xxx." (a run of three 'x' then a literal '.').
    let out = keygrid_bin().args(["get_char", "x3.", "3"]).output().expect("run get_char");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), ".");

    let out = keygrid_bin().args(["get_char", "x3.", "1"]).output().expect("run get_char");
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "x");
}

#[test]
fn get_char_out_of_range_fails() {
    let out = keygrid_bin().args(["get_char", "x3.", "9"]).output().expect("run get_char");
    assert!(!out.status.success(), "expected non-zero exit status");
}

#[test]
fn set_char_rejects_writing_onto_the_diagonal() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let tracker = tmp.path().join("t.md");
    fs::write(
        &tracker,
        "---KEY_DEFINITIONS_START---\n1A: /a\n1B: /b\n---KEY_DEFINITIONS_END---\n\
---GRID_START---\nlast_KEY_edit: 1B\nlast_GRID_edit: 1B\n1A = o>\n1B = <o\n---GRID_END---\n",
    )
    .expect("seed tracker");

    let out = keygrid_bin()
        .args(["set_char", "1", "x", "--output", tracker.to_str().unwrap(), "--key", "1B"])
        .output()
        .expect("run set_char");
    assert!(!out.status.success(), "writing over a diagonal cell must fail");
    let content_after = fs::read_to_string(&tracker).unwrap();
    assert!(content_after.contains("1B = <o"), "tracker must be left untouched on failure");
}

#[test]
fn set_char_updates_one_cell_in_place() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let tracker = tmp.path().join("t.md");
    fs::write(
        &tracker,
        "---KEY_DEFINITIONS_START---\n1A: /a\n1B: /b\n---KEY_DEFINITIONS_END---\n\
---GRID_START---\nlast_KEY_edit: 1B\nlast_GRID_edit: 1B\n1A = op\n1B = po\n---GRID_END---\n",
    )
    .expect("seed tracker");

    let out = keygrid_bin()
        .args(["set_char", "1", ">", "--output", tracker.to_str().unwrap(), "--key", "1A"])
        .output()
        .expect("run set_char");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let content_after = fs::read_to_string(&tracker).unwrap();
    assert!(content_after.contains("1A = o>"));
}

#[test]
fn remove_file_drops_the_row_and_column() {
    let tmp = tempfile::tempdir().expect("tempdir");
    project(tmp.path());
    let tracker = tmp.path().join("t.md");
    fs::write(
        &tracker,
        "---KEY_DEFINITIONS_START---\n1A: /a.py\n1B: /b.py\n---KEY_DEFINITIONS_END---\n\
---GRID_START---\nlast_KEY_edit: 1B\nlast_GRID_edit: 1B\n1A = o>\n1B = <o\n---GRID_END---\n",
    )
    .expect("seed tracker");

    let out = keygrid_bin()
        .current_dir(tmp.path())
        .args(["remove-file", "/b.py", "--output", tracker.to_str().unwrap()])
        .output()
        .expect("run remove-file");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let content_after = fs::read_to_string(&tracker).unwrap();
    assert!(!content_after.contains("1B:"));
    assert!(content_after.contains("1A:"));
}

#[test]
fn remove_file_on_absent_path_reports_no_op_and_succeeds() {
    let tmp = tempfile::tempdir().expect("tempdir");
    project(tmp.path());
    let tracker = tmp.path().join("t.md");
    fs::write(
        &tracker,
        "---KEY_DEFINITIONS_START---\n1A: /a.py\n---KEY_DEFINITIONS_END---\n\
---GRID_START---\nlast_KEY_edit: 1A\nlast_GRID_edit: 1A\n1A = o\n---GRID_END---\n",
    )
    .expect("seed tracker");

    let out = keygrid_bin()
        .current_dir(tmp.path())
        .args(["remove-file", "/does-not-exist.py", "--output", tracker.to_str().unwrap()])
        .output()
        .expect("run remove-file");
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("was not present"));
}

#[test]
fn export_tracker_csv_and_dot_and_json() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let tracker = tmp.path().join("t.md");
    fs::write(
        &tracker,
        "---KEY_DEFINITIONS_START---\n1A: /a.py\n1B: /b.py\n---KEY_DEFINITIONS_END---\n\
---GRID_START---\nlast_KEY_edit: 1B\nlast_GRID_edit: 1B\n1A = o>\n1B = <o\n---GRID_END---\n",
    )
    .expect("seed tracker");

    let csv_out = keygrid_bin()
        .args(["export-tracker", tracker.to_str().unwrap(), "--format", "csv"])
        .output()
        .expect("run export csv");
    assert!(csv_out.status.success());
    let csv_text = String::from_utf8_lossy(&csv_out.stdout);
    assert!(csv_text.starts_with("Source Key,Source Path,Target Key,Target Path,Dependency Type"));
    assert!(csv_text.contains("1A,/a.py,1B,/b.py,>"));

    let dot_out = keygrid_bin()
        .args(["export-tracker", tracker.to_str().unwrap(), "--format", "dot"])
        .output()
        .expect("run export dot");
    assert!(dot_out.status.success());
    let dot_text = String::from_utf8_lossy(&dot_out.stdout);
    assert!(dot_text.contains("digraph dependencies"));
    assert!(dot_text.contains("color=blue"));

    let json_path = tmp.path().join("out.json");
    let json_out = keygrid_bin()
        .args([
            "export-tracker",
            tracker.to_str().unwrap(),
            "--format",
            "json",
            "--output",
            json_path.to_str().unwrap(),
        ])
        .output()
        .expect("run export json");
    assert!(json_out.status.success());
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(json["keys"]["1A"], "/a.py");
}

#[test]
fn export_tracker_rejects_unknown_format() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let tracker = tmp.path().join("t.md");
    fs::write(
        &tracker,
        "---KEY_DEFINITIONS_START---\n1A: /a.py\n---KEY_DEFINITIONS_END---\n\
---GRID_START---\nlast_KEY_edit: 1A\nlast_GRID_edit: 1A\n1A = o\n---GRID_END---\n",
    )
    .expect("seed tracker");

    let out = keygrid_bin()
        .args(["export-tracker", tracker.to_str().unwrap(), "--format", "xml"])
        .output()
        .expect("run export xml");
    assert!(!out.status.success(), "expected non-zero exit status for an unknown format");
}

#[test]
fn generate_keys_assigns_hierarchical_keys_and_writes_main_tracker() {
    let tmp = tempfile::tempdir().expect("tempdir");
    project(tmp.path());
    let src = tmp.path().join("src");
    fs::create_dir_all(src.join("pkg")).unwrap();
    fs::write(src.join("a.py"), "import os\n").unwrap();
    fs::write(src.join("pkg").join("util.py"), "x = 1\n").unwrap();

    let out = keygrid_bin()
        .current_dir(tmp.path())
        .args(["generate-keys", src.to_str().unwrap(), "--tracker_type", "main"])
        .output()
        .expect("run generate-keys");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let tracker_path = tmp.path().join("cline_docs").join("memory").join("module_relationship_tracker.md");
    assert!(tracker_path.exists(), "main tracker should be written under the default memory dir");
    let content = fs::read_to_string(&tracker_path).unwrap();
    assert!(content.contains("---KEY_DEFINITIONS_START---"));
}

#[test]
fn generate_keys_mini_writes_one_tracker_per_populated_module() {
    let tmp = tempfile::tempdir().expect("tempdir");
    project(tmp.path());
    let src = tmp.path().join("src");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("a.py"), "").unwrap();
    fs::write(src.join("b.py"), "").unwrap();

    let out = keygrid_bin()
        .current_dir(tmp.path())
        .args(["generate-keys", src.to_str().unwrap(), "--tracker_type", "mini"])
        .output()
        .expect("run generate-keys mini");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let mini_tracker = src.join("src_module.md");
    assert!(mini_tracker.exists(), "mini tracker should live inside the module directory");
}

#[test]
fn analyze_project_resolves_a_python_import_across_modules() {
    let tmp = tempfile::tempdir().expect("tempdir");
    project(tmp.path());
    let src = tmp.path().join("src");
    fs::create_dir_all(src.join("pkg1")).unwrap();
    fs::create_dir_all(src.join("pkg2")).unwrap();
    fs::write(src.join("pkg1").join("a.py"), "import src.pkg2.b\n\ndef run():\n    b.helper()\n").unwrap();
    fs::write(src.join("pkg2").join("b.py"), "def helper():\n    pass\n").unwrap();

    let out = keygrid_bin()
        .current_dir(tmp.path())
        .args(["analyze-project"])
        .output()
        .expect("run analyze-project");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let main_tracker = tmp.path().join("cline_docs").join("memory").join("module_relationship_tracker.md");
    let content = fs::read_to_string(&main_tracker).unwrap();
    assert!(content.contains("pkg1"));
    assert!(content.contains("pkg2"));
    // pkg1 depends on pkg2 via the explicit import; some non-empty, non-placeholder
    // character must appear on that row once rolled up to module granularity.
    assert!(content.contains("---GRID_START---"));
}

#[test]
fn analyze_project_resolves_a_markdown_link_in_the_doc_tracker() {
    let tmp = tempfile::tempdir().expect("tempdir");
    project(tmp.path());
    fs::create_dir_all(tmp.path().join("src")).unwrap();
    fs::write(tmp.path().join("src").join("main.py"), "").unwrap();
    let docs = tmp.path().join("docs");
    fs::create_dir_all(&docs).unwrap();
    fs::write(docs.join("a.md"), "See [other](b.md) for details.\n").unwrap();
    fs::write(docs.join("b.md"), "# B\n").unwrap();

    let out = keygrid_bin()
        .current_dir(tmp.path())
        .args(["analyze-project"])
        .output()
        .expect("run analyze-project");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let doc_tracker = tmp.path().join("cline_docs").join("memory").join("doc_tracker.md");
    let data_text = fs::read_to_string(&doc_tracker).unwrap();
    assert!(data_text.contains("a.md"));
    assert!(data_text.contains("b.md"));
}

#[test]
fn suggest_dependencies_recomputes_only_keys_already_in_the_tracker() {
    let tmp = tempfile::tempdir().expect("tempdir");
    project(tmp.path());
    let src = tmp.path().join("src");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("a.py"), "import src.b\n").unwrap();
    fs::write(src.join("b.py"), "").unwrap();

    let gen = keygrid_bin()
        .current_dir(tmp.path())
        .args(["generate-keys", src.to_str().unwrap(), "--tracker_type", "main"])
        .output()
        .expect("run generate-keys");
    assert!(gen.status.success());

    let main_tracker = tmp.path().join("cline_docs").join("memory").join("module_relationship_tracker.md");
    let out = keygrid_bin()
        .current_dir(tmp.path())
        .args([
            "suggest-dependencies",
            "--tracker",
            main_tracker.to_str().unwrap(),
            "--tracker_type",
            "main",
        ])
        .output()
        .expect("run suggest-dependencies");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
}

#[test]
fn suggest_dependencies_on_empty_tracker_fails() {
    let tmp = tempfile::tempdir().expect("tempdir");
    project(tmp.path());
    let tracker = tmp.path().join("empty.md");
    fs::write(&tracker, "---KEY_DEFINITIONS_START---\n---KEY_DEFINITIONS_END---\n---GRID_START---\n---GRID_END---\n").unwrap();

    let out = keygrid_bin()
        .current_dir(tmp.path())
        .args([
            "suggest-dependencies",
            "--tracker",
            tracker.to_str().unwrap(),
            "--tracker_type",
            "main",
        ])
        .output()
        .expect("run suggest-dependencies");
    assert!(!out.status.success(), "an empty tracker has nothing to recompute suggestions for");
}

#[test]
fn generate_embeddings_reports_a_count() {
    let tmp = tempfile::tempdir().expect("tempdir");
    project(tmp.path());
    let src = tmp.path().join("src");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("a.py"), "def f():\n    pass\n").unwrap();

    let out = keygrid_bin()
        .current_dir(tmp.path())
        .args(["generate-embeddings", src.to_str().unwrap()])
        .output()
        .expect("run generate-embeddings");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(String::from_utf8_lossy(&out.stdout).contains("generated/refreshed"));
}
