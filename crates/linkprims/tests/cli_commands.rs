#![cfg(all(unix, feature = "cli"))]

use std::path::PathBuf;
use std::process::{Command, Output};

const GAIN_TABLE: &str = r#"[
  {"index": 10, "kind": "byte", "flags": "ram|rom", "ram": "3", "rom": "7", "name": "Gain"}
]"#;

fn table_file(tag: &str) -> PathBuf {
    let path = PathBuf::from(format!(
        "/tmp/linkprims-{tag}-{}-{}.json",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::write(&path, GAIN_TABLE).expect("table file should be writable");
    path
}

fn linkprims(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_linkprims"))
        .env_remove("LINKPRIMS_TABLE")
        .env_remove("LINKPRIMS_SERIAL")
        .args(["--log-level", "error"])
        .args(args)
        .output()
        .expect("linkprims should run")
}

#[test]
fn version_prints_package_version() {
    let output = linkprims(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("linkprims {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn params_lists_system_page_and_table() {
    let table = table_file("params");
    let table_arg = table.to_string_lossy().to_string();
    let output = linkprims(&["--format", "json", "--table", &table_arg, "params"]);
    let _ = std::fs::remove_file(&table);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"count\":11"));
    assert!(stdout.contains("\"name\":\"serialno\""));
    assert!(stdout.contains("\"name\":\"gain\""));
}

#[test]
fn read_by_name_returns_stored_serial() {
    let output = linkprims(&["--format", "json", "--serial", "SN-42", "read", "serialno", "--field", "rom"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"source\":\"device\""));
    assert!(stdout.contains("\"rom\":\"SN-42\""));
}

#[test]
fn read_by_index_decodes_parameter_count() {
    let output = linkprims(&["--format", "pretty", "read", "0", "1"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("name=params"));
    assert!(stdout.contains("ram=0x0a"));
    assert!(stdout.contains("name=pages"));
}

#[test]
fn write_updates_ram_and_reads_back() {
    let table = table_file("write");
    let table_arg = table.to_string_lossy().to_string();
    let output = linkprims(&["--format", "json", "--table", &table_arg, "write", "gain=200"]);
    let _ = std::fs::remove_file(&table);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"ram\":\"0xc8\""));
    assert!(stdout.contains("\"rom\":\"0x07\""));
}

#[test]
fn poll_stops_after_count_samples() {
    let output = linkprims(&["--format", "json", "poll", "ticker", "--interval", "20ms", "--count", "2"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let samples: Vec<_> = stdout.lines().filter(|line| line.contains("\"sample\"")).collect();
    assert_eq!(samples.len(), 2);
    assert!(samples[1].contains("\"sample\":2"));
    assert!(samples[0].contains("\"name\":\"ticker\""));
}

#[test]
fn unknown_parameter_returns_64() {
    let output = linkprims(&["read", "7", "42"]);
    assert_eq!(output.status.code(), Some(64));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no parameter"));
}

#[test]
fn unknown_name_on_device_returns_60() {
    let output = linkprims(&["read", "nothing"]);
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn invalid_duration_returns_64() {
    let output = linkprims(&["read", "0", "--timeout", "soon"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn missing_table_file_returns_64() {
    let output = linkprims(&["--table", "/nonexistent/linkprims-table.json", "params"]);
    assert_eq!(output.status.code(), Some(64));
}
