use std::fs;
use std::io::Write;
use std::process::Command;

use tempfile::{tempdir, NamedTempFile};

fn write_config(dir: &std::path::Path, scan: &str, n_workers: usize) -> std::path::PathBuf {
    let output_dir = dir.join("out");
    let config_path = dir.join("config.json");
    let contents = serde_json::json!({
        "direction": "minimize",
        "population_size": 4,
        "seed": 42,
        "parameters": [
            {"kind": "double", "label": "x", "lower_init": -5.0, "upper_init": 5.0}
        ],
        "scan": scan,
        "halt": {"max_iterations": 2},
        "n_workers": n_workers,
        "output_dir": output_dir,
    });
    fs::write(&config_path, serde_json::to_vec_pretty(&contents).unwrap()).unwrap();
    config_path
}

fn write_fitness_script(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("fitness.sh");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh").unwrap();
    writeln!(file, "echo RESULT=$STRATAOPT_X").unwrap();
    drop(file);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
    }
    path
}

#[test]
fn test_validate_command_success() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let config_path = write_config(dir.path(), "d(0,-5,5,4)", 0);

    let output = Command::new(assert_cmd::cargo::cargo_bin!("metasolve"))
        .arg("validate")
        .arg("--config")
        .arg(&config_path)
        .output()?;

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Config OK"));
    Ok(())
}

#[test]
fn test_validate_command_invalid_grammar() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let config_path = write_config(dir.path(), "not-a-valid-grammar(", 0);

    let output = Command::new(assert_cmd::cargo::cargo_bin!("metasolve"))
        .arg("validate")
        .arg("--config")
        .arg(&config_path)
        .output()?;

    assert!(!output.status.success());
    Ok(())
}

#[test]
fn test_validate_command_missing_file() -> Result<(), Box<dyn std::error::Error>> {
    let output = Command::new(assert_cmd::cargo::cargo_bin!("metasolve"))
        .arg("validate")
        .arg("--config")
        .arg("/nonexistent/config.json")
        .output()?;

    assert!(!output.status.success());
    Ok(())
}

#[test]
fn test_validate_command_malformed_json() -> Result<(), Box<dyn std::error::Error>> {
    let mut file = NamedTempFile::new()?;
    writeln!(file, "not json at all")?;

    let output = Command::new(assert_cmd::cargo::cargo_bin!("metasolve"))
        .arg("validate")
        .arg("--config")
        .arg(file.path())
        .output()?;

    assert!(!output.status.success());
    Ok(())
}

#[test]
fn test_scan_command_reports_parsed_entries() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let config_path = write_config(dir.path(), "d(0,-5,5,4)", 0);

    let output = Command::new(assert_cmd::cargo::cargo_bin!("metasolve"))
        .arg("scan")
        .arg("--config")
        .arg(&config_path)
        .output()?;

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Parsed 1 scan entries"));
    Ok(())
}

#[test]
fn test_run_command_sequential_executor_prints_best() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let config_path = write_config(dir.path(), "d(0,-5,5,4)", 0);
    let script_path = write_fitness_script(dir.path());

    let output = Command::new(assert_cmd::cargo::cargo_bin!("metasolve"))
        .arg("run")
        .arg("--config")
        .arg(&config_path)
        .arg("--script")
        .arg(&script_path)
        .output()?;

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("best_known_raw"));

    let all_solutions = dir.path().join("out").join("all_solutions.csv");
    assert!(all_solutions.exists());
    Ok(())
}

#[test]
fn test_run_command_thread_pool_executor_prints_best() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let config_path = write_config(dir.path(), "d(0,-5,5,4)", 2);
    let script_path = write_fitness_script(dir.path());

    let output = Command::new(assert_cmd::cargo::cargo_bin!("metasolve"))
        .arg("run")
        .arg("--config")
        .arg(&config_path)
        .arg("--script")
        .arg(&script_path)
        .output()?;

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("best_known_raw"));
    Ok(())
}

/// A missing fitness script fails every evaluation, but the run itself
/// completes — failed evaluations are reported as invalid individuals
/// rather than aborting the whole scan.
#[test]
fn test_run_command_missing_script_yields_no_valid_individual() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let config_path = write_config(dir.path(), "d(0,-5,5,4)", 0);

    let output = Command::new(assert_cmd::cargo::cargo_bin!("metasolve"))
        .arg("run")
        .arg("--config")
        .arg(&config_path)
        .arg("--script")
        .arg(dir.path().join("does-not-exist.sh"))
        .output()?;

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("no valid individual was evaluated"));
    Ok(())
}
