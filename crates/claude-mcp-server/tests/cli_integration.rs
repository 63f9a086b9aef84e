//! End-to-end coverage: the built binary driven over stdio with
//! newline-delimited JSON-RPC frames.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use serde_json::{json, Value};
use tempfile::tempdir;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const CONFIG_ENV_KEYS: &[&str] = &[
    "ASSISTANT_BINARY_NAME",
    "DEFAULT_CMD_TIMEOUT_MS",
    "DEFAULT_ASSISTANT_TIMEOUT_MS",
    "MAX_COMPLETED",
    "MAX_AGE_MS",
    "SIGTERM_GRACE_MS",
    "SWEEP_INTERVAL_MS",
    "MAX_BUF",
    "ALLOWED_COMMANDS",
    "ALLOW_ALL_COMMANDS",
    "ORCHESTRATOR_MODE",
    "DEBUG",
];

fn binary_command() -> Command {
    let mut command = Command::new(assert_cmd::cargo::cargo_bin!("claude-mcp-server"));
    for key in CONFIG_ENV_KEYS {
        command.env_remove(key);
    }
    command
}

fn request_frame(id: Value, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

fn encode_lines(frames: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for frame in frames {
        out.extend_from_slice(serde_json::to_string(frame).expect("encode frame").as_bytes());
        out.push(b'\n');
    }
    out
}

fn decode_lines(raw: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(raw)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str::<Value>(line).expect("response line"))
        .collect()
}

fn run_server(stdin_payload: Vec<u8>) -> (Vec<Value>, String) {
    let output = binary_command()
        .write_stdin(stdin_payload)
        .output()
        .expect("run server");
    assert!(
        output.status.success(),
        "server exited nonzero: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );
    (
        decode_lines(&output.stdout),
        String::from_utf8_lossy(&output.stderr).to_string(),
    )
}

#[cfg(unix)]
fn write_script(dir: &Path, body: &str) -> PathBuf {
    let script = dir.join("mock-claude.sh");
    let content = format!("#!/bin/sh\nset -eu\n{body}\n");
    std::fs::write(&script, content).expect("write script");
    let mut perms = std::fs::metadata(&script)
        .expect("script metadata")
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script, perms).expect("chmod script");
    script
}

#[test]
fn functional_initialize_and_tools_list_roundtrip() {
    let (responses, _stderr) = run_server(encode_lines(&[
        request_frame(json!("init"), "initialize", json!({})),
        request_frame(json!("list"), "tools/list", json!({})),
    ]));

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["id"], "init");
    assert_eq!(responses[0]["result"]["protocolVersion"], "2024-11-05");

    let tools = responses[1]["result"]["tools"].as_array().expect("tools");
    let names = tools
        .iter()
        .map(|tool| tool["name"].as_str().expect("name"))
        .collect::<Vec<_>>();
    assert_eq!(
        names,
        vec![
            "assistant",
            "execute_command",
            "read_output",
            "force_terminate",
            "list_sessions"
        ]
    );
}

#[test]
fn functional_policy_denied_command_is_an_error_reply() {
    let (responses, _stderr) = run_server(encode_lines(&[request_frame(
        json!(1),
        "tools/call",
        json!({ "name": "execute_command", "arguments": { "command": "rm -rf /" } }),
    )]));

    assert_eq!(responses.len(), 1);
    let result = &responses[0]["result"];
    assert_eq!(result["isError"], true);
    assert!(result["content"][0]["text"]
        .as_str()
        .expect("text")
        .contains("Command not allowed"));
}

#[test]
fn regression_unknown_tool_reports_method_not_found() {
    let (responses, _stderr) = run_server(encode_lines(&[request_frame(
        json!(7),
        "tools/call",
        json!({ "name": "nope", "arguments": {} }),
    )]));

    assert_eq!(responses[0]["error"]["code"], -32601);
    assert_eq!(responses[0]["error"]["message"], "Tool nope not found");
}

#[test]
fn regression_malformed_line_reports_parse_error_and_loop_continues() {
    let mut payload = b"this is not json\n".to_vec();
    payload.extend_from_slice(&encode_lines(&[request_frame(
        json!(2),
        "tools/list",
        json!({}),
    )]));
    let (responses, _stderr) = run_server(payload);

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["error"]["code"], -32700);
    assert!(responses[1]["result"]["tools"].is_array());
}

#[test]
fn regression_unlisted_method_reports_method_not_found() {
    let (responses, _stderr) = run_server(encode_lines(&[request_frame(
        json!(3),
        "resources/list",
        json!({}),
    )]));
    assert_eq!(responses[0]["error"]["code"], -32601);
}

#[cfg(unix)]
#[test]
fn integration_blocking_assistant_returns_mock_cli_output() {
    let dir = tempdir().expect("tempdir");
    let script = write_script(dir.path(), r#"echo "hi""#);

    let output = binary_command()
        .env("ASSISTANT_BINARY_NAME", script.display().to_string())
        .write_stdin(encode_lines(&[request_frame(
            json!("task"),
            "tools/call",
            json!({ "name": "assistant", "arguments": { "prompt": "echo hi", "workFolder": "/tmp" } }),
        )]))
        .output()
        .expect("run server");
    assert!(output.status.success());

    let responses = decode_lines(&output.stdout);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["result"]["content"][0]["text"], "hi\n");

    // First successful assistant call writes the one-line identification
    // banner to stderr.
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("claude-mcp-server v"));
}

#[cfg(unix)]
#[test]
fn integration_detached_assistant_hands_back_a_pid_handle() {
    let dir = tempdir().expect("tempdir");
    let script = write_script(dir.path(), "sleep 10");

    let output = binary_command()
        .env("ASSISTANT_BINARY_NAME", script.display().to_string())
        .write_stdin(encode_lines(&[request_frame(
            json!("detach"),
            "tools/call",
            json!({ "name": "assistant", "arguments": { "prompt": "sleep 10", "workFolder": "/tmp", "wait": false } }),
        )]))
        .output()
        .expect("run server");
    assert!(output.status.success());

    let responses = decode_lines(&output.stdout);
    let result = &responses[0]["result"];
    let text = result["content"][0]["text"].as_str().expect("text");
    assert!(text.starts_with("Claude Code task started with PID "));
    let pid = result["metadata"]["pid"].as_i64().expect("pid");
    assert!(text.contains(&pid.to_string()));
    assert_eq!(result["metadata"]["isRunning"], true);
}

#[test]
fn regression_relative_assistant_binary_is_a_fatal_startup_error() {
    let output = binary_command()
        .env("ASSISTANT_BINARY_NAME", "./relative/claude")
        .write_stdin(Vec::new())
        .output()
        .expect("run server");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("relative path"));
}
