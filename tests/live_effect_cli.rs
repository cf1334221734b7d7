use std::process::Command;

use serde_json::Value;

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_live_effect"))
}

fn simulate(args: &[&str]) -> (Option<i32>, Value) {
    let output = cli()
        .arg("simulate")
        .args(args)
        .output()
        .expect("simulate command");
    let stdout = String::from_utf8(output.stdout).expect("stdout utf8");
    let report = serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("expected JSON report ({err}), got {stdout}"));
    (output.status.code(), report)
}

#[test]
fn simulate_reports_clean_pass_through() {
    let (code, report) = simulate(&["--periods", "50"]);

    assert_eq!(code, Some(0));
    assert_eq!(report["sample_rate"], 16000);
    assert_eq!(report["frames_per_period"], 320);
    assert_eq!(report["bytes_per_period"], 640);
    assert_eq!(report["matched"], 50);
    assert_eq!(report["mismatched"], 0);
    assert_eq!(report["input_state"], "running");
    assert_eq!(report["output_state"], "running");
    assert_eq!(report["channel"]["periods_written"], 50);
}

#[test]
fn simulate_recovers_from_disconnect() {
    let (code, report) = simulate(&["--periods", "20", "--disconnect-after", "10"]);

    assert_eq!(code, Some(0));
    assert_eq!(report["disconnected_at"], 10);
    assert_eq!(report["matched"], 20);
    // The channel is reallocated by the reopen.
    assert_eq!(report["channel"]["periods_written"], 10);
}

#[test]
fn simulate_honors_config_file() {
    let path = std::env::temp_dir().join(format!("live-effect-cli-{}.json", std::process::id()));
    std::fs::write(&path, r#"{ "sampleRate": 48000, "periodLenMs": 10 }"#).unwrap();

    let (code, report) = simulate(&["--periods", "5", "--config", path.to_str().unwrap()]);
    let _ = std::fs::remove_file(&path);

    assert_eq!(code, Some(0));
    assert_eq!(report["sample_rate"], 48000);
    assert_eq!(report["frames_per_period"], 480);
}
