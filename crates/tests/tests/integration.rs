//! End-to-end tests for complete framework runs.
//!
//! These tests drive the full pipeline:
//! Config → Catalog → Resolve → Preprocess → Run (mock drivers) → Package

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mdtf_data::{Catalog, CatalogBuilder, Dataset, DatasetStore, VarStatus, Variable};
use mdtf_foundation::ErrorKind;
use mdtf_runtime::spawner::mock::MockBehavior;
use mdtf_runtime::{
    EXIT_INTERRUPTED, EXIT_NO_DATA, EXIT_POD_FAILED, EXIT_SUCCESS, RunRecord, RunStatus, Shutdown,
    read_records,
};
use mdtf_settings::{CatalogStyle, Config, EnvSnapshot};
use mdtf_tests::TestHarness;
use serde_json::json;

fn record<'a>(records: &'a [RunRecord], pod: &str) -> &'a RunRecord {
    records
        .iter()
        .find(|r| r.pod == pod)
        .unwrap_or_else(|| panic!("no record for POD '{pod}'"))
}

fn years(first: i32, last: i32) -> Vec<i32> {
    (first..=last).collect()
}

/// Test that comment markers inside JSONC strings are kept verbatim.
#[test]
fn test_jsonc_comment_inside_string_is_preserved() {
    let h = TestHarness::new();
    let text = h
        .config_text(("CM4_hist", 1990, 1991), &["example"], json!({}))
        .replacen('{', "{\n  // run identifier below is not a comment\n", 1)
        .replace("\"run_id\": \"test\"", "\"run_id\": \"a // b /* c */\" /* trailing */");

    let config = h.load_config(&text);

    assert_eq!(config.run_id, "a // b /* c */");
}

/// Test that a JSONC syntax error names the original line.
#[test]
fn test_jsonc_syntax_error_reports_original_line() {
    let h = TestHarness::new();
    let path = h.root().join("broken.jsonc");
    fs::write(&path, "{\n  // comment\n  \"run_id\": \"x\",\n  \"case_list\": [,]\n}\n").unwrap();

    let err = Config::load(&path, &EnvSnapshot::default()).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigSyntax);
    assert!(err.to_string().contains(":4:"), "error should point at line 4: {err}");
}

/// Test that an alternate is used when the primary name is absent, and the
/// POD still sees its own variable name.
///
/// Verifies: substitution status, alternate chain, rename, exported names
#[tokio::test]
async fn test_alternate_substitution_and_rename() {
    let h = TestHarness::new();
    h.add_monthly("CM4_hist", "PRECT", "kg m-2 s-1", &years(1990, 1991));
    h.add_pod(
        "precip",
        json!({
            "pr": {
                "freq": "mon",
                "units": "kg m-2 s-1",
                "alternates": [{ "var_name": "pr", "name_in_model": "PRECT", "freq": "mon" }]
            }
        }),
    );
    let config = h.load_config(&h.config_text(("CM4_hist", 1990, 1991), &["precip"], json!({})));

    let summary = h.run(config).await;

    assert_eq!(summary.exit_code(), EXIT_SUCCESS);
    let precip = record(&summary.records, "precip");
    assert_eq!(precip.status, RunStatus::Succeeded, "reason: {:?}", precip.reason);
    let pr = &precip.variables[0];
    assert_eq!(pr.status, VarStatus::Substituted);
    assert_eq!(pr.chain, ["pr@mon", "PRECT@mon"]);

    let spawned = h.spawner().spawned();
    assert_eq!(spawned.len(), 1);
    assert_eq!(spawned[0].env.get("pr_var"), Some("pr"));
    let file = PathBuf::from(spawned[0].env.get("pr_var_FILE").expect("file exported"));
    assert_eq!(Some(file.as_path()), pr.file.as_deref());

    let ds = h.store().read(&file).expect("preprocessed file readable");
    assert!(ds.variable("pr").is_some());
    assert!(ds.variable("PRECT").is_none());
    assert_eq!(ds.dims["time"], 24);
}

/// Test that partial time coverage skips only the affected POD.
#[tokio::test]
async fn test_partial_coverage_skips_one_pod_and_runs_the_others() {
    let h = TestHarness::new();
    h.add_monthly("CM4_hist", "tas", "K", &years(1990, 1999));
    h.add_monthly("CM4_hist", "zg", "m", &years(1990, 1995));
    h.add_pod("complete", json!({ "tas": { "freq": "mon" } }));
    h.add_pod("partial", json!({ "zg": { "freq": "mon" } }));
    let config = h.load_config(&h.config_text(
        ("CM4_hist", 1990, 1999),
        &["partial", "complete"],
        json!({}),
    ));

    let summary = h.run(config).await;

    let partial = record(&summary.records, "partial");
    assert_eq!(partial.status, RunStatus::SkippedMissingData);
    let reason = partial.reason.as_ref().expect("skipped POD has a reason");
    assert_eq!(reason.code, "E004");
    assert!(reason.message.contains("zg"), "message: {}", reason.message);
    assert_eq!(partial.variables[0].status, VarStatus::MissingRequired);

    assert_eq!(record(&summary.records, "complete").status, RunStatus::Succeeded);
    let spawned: Vec<String> = h.spawner().spawned().into_iter().map(|s| s.pod).collect();
    assert_eq!(spawned, ["complete"]);
    assert_eq!(summary.exit_code(), EXIT_SUCCESS);

    // report order follows the POD list
    let pods: Vec<&str> = summary.records.iter().map(|r| r.pod.as_str()).collect();
    assert_eq!(pods, ["partial", "complete"]);
}

/// Test that metres are converted to centimetres with attributes kept.
#[tokio::test]
async fn test_unit_conversion_m_to_cm() {
    let h = TestHarness::new();
    h.add_monthly("CM4_hist", "zg", "m", &[1990]);
    h.add_pod("heights", json!({ "zg": { "freq": "mon", "units": "cm" } }));
    let config = h.load_config(&h.config_text(("CM4_hist", 1990, 1990), &["heights"], json!({})));

    let summary = h.run(config).await;

    assert_eq!(record(&summary.records, "heights").status, RunStatus::Succeeded);
    let spawned = h.spawner().spawned();
    let file = PathBuf::from(spawned[0].env.get("zg_var_FILE").unwrap());
    let ds = h.store().read(&file).unwrap();
    let zg = ds.variable("zg").unwrap();
    assert_eq!(zg.text_attr("units"), Some("cm"));
    assert_eq!(zg.text_attr("long_name"), Some("zg from CM4"));
    let values = zg.data.as_ref().unwrap();
    assert!((values[1] - 100.0).abs() < 1e-9, "1 m should become 100 cm, got {}", values[1]);
}

/// Test that a gap between chunks fails preprocessing and skips the POD.
#[tokio::test]
async fn test_gap_in_time_axis_skips_pod() {
    let h = TestHarness::new();
    h.add_monthly("CM4_hist", "tas", "K", &[1990, 1992]);
    h.add_pod("gappy", json!({ "tas": { "freq": "mon" } }));
    let config = h.load_config(&h.config_text(("CM4_hist", 1990, 1992), &["gappy"], json!({})));

    let summary = h.run(config).await;

    let gappy = record(&summary.records, "gappy");
    assert_eq!(gappy.status, RunStatus::SkippedMissingData);
    let reason = gappy.reason.as_ref().unwrap();
    assert_eq!(reason.kind, ErrorKind::Preprocess);
    assert!(reason.message.contains("non-monotonic/overlapping time axis"));
    assert!(h.spawner().spawned().is_empty());
    assert_eq!(summary.exit_code(), EXIT_NO_DATA);
}

/// Test that data starting mid-year does not count as covering that year.
#[tokio::test]
async fn test_mid_year_start_skips_pod() {
    let h = TestHarness::new();
    let half_year = Dataset::new()
        .with_attr("source_id", "CM4")
        .with_attr("variant_label", "r1i1p1f1")
        .with_attr("grid_label", "gr1")
        .with_dim("time", 6)
        .with_variable(
            Variable::new("time", &["time"])
                .with_attr("units", "days since 1990-07-01")
                .with_attr("calendar", "360_day")
                .with_data((0..6).map(|m| (m * 30 + 15) as f64).collect()),
        )
        .with_variable(
            Variable::new("tas", &["time"])
                .with_attr("units", "K")
                .with_data(vec![280.0; 6]),
        );
    h.add_dataset("CM4_hist", "atmos.199007-199012.tas.nc", &half_year);
    h.add_pod("late", json!({ "tas": { "freq": "mon" } }));
    let config = h.load_config(&h.config_text(("CM4_hist", 1990, 1990), &["late"], json!({})));

    let summary = h.run(config).await;

    let late = record(&summary.records, "late");
    assert_eq!(late.status, RunStatus::SkippedMissingData);
    assert_eq!(late.reason.as_ref().unwrap().code, "E004");
    assert!(h.spawner().spawned().is_empty());
    assert_eq!(summary.exit_code(), EXIT_NO_DATA);
}

/// Test that PODs needing the same input share one preprocessed file.
#[tokio::test]
async fn test_shared_input_is_preprocessed_once() {
    let h = TestHarness::new();
    h.add_monthly("CM4_hist", "tas", "K", &years(1990, 1991));
    for pod in ["first", "second"] {
        h.add_pod(pod, json!({ "tas": { "freq": "mon" } }));
    }
    let config = h.load_config(&h.config_text(
        ("CM4_hist", 1990, 1991),
        &["first", "second"],
        json!({ "num_workers": 2 }),
    ));
    let writes_before = h.store().writes();

    let summary = h.run(config).await;

    assert_eq!(summary.exit_code(), EXIT_SUCCESS);
    assert_eq!(h.store().writes() - writes_before, 1, "shared input written more than once");
    let spawned = h.spawner().spawned();
    assert_eq!(spawned.len(), 2);
    let files: Vec<_> = spawned.iter().map(|s| s.env.get("tas_var_FILE")).collect();
    assert!(files[0].is_some());
    assert_eq!(files[0], files[1]);
}

/// Test that a timeout also stops processes the driver started.
#[tokio::test]
async fn test_timeout_stops_processes_started_by_the_driver() {
    let h = TestHarness::new();
    h.add_monthly("CM4_hist", "tas", "K", &[1990]);
    h.add_pod("nested", json!({ "tas": { "freq": "mon" } }));
    let marker = h.root().join("survived");
    h.spawner().set_behavior(MockBehavior::Script {
        script: format!("bash -c 'sleep 3; touch {}'; echo done", marker.display()),
    });
    let config = h.load_config(&h.config_text(
        ("CM4_hist", 1990, 1990),
        &["nested"],
        json!({ "timeout_secs": 1 }),
    ));

    let summary = h.run(config).await;

    let nested = record(&summary.records, "nested");
    assert_eq!(nested.status, RunStatus::Failed);
    assert!(nested.reason.as_ref().unwrap().message.contains("timed out after 1s"));
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!marker.exists(), "process started by the driver outlived the timeout");
}

/// Test that a failing driver is recorded while the framework carries on.
///
/// Verifies: exit code captured, log retained in the output, exit status 3
#[tokio::test]
async fn test_driver_exit_code_is_reported() {
    let h = TestHarness::new();
    h.add_monthly("CM4_hist", "tas", "K", &[1990]);
    h.add_pod("broken", json!({ "tas": { "freq": "mon" } }));
    h.add_pod("fine", json!({ "tas": { "freq": "mon" } }));
    h.spawner().set_pod_behavior("broken", MockBehavior::Exit { code: 7 });
    let config = h.load_config(&h.config_text(
        ("CM4_hist", 1990, 1990),
        &["broken", "fine"],
        json!({ "num_workers": 2 }),
    ));

    let summary = h.run(config).await;

    let broken = record(&summary.records, "broken");
    assert_eq!(broken.status, RunStatus::Failed);
    assert_eq!(broken.exit_code, Some(7));
    assert_eq!(broken.reason.as_ref().unwrap().kind, ErrorKind::PodExecution);
    let log_path = broken.log_path.as_ref().unwrap();
    assert!(log_path.starts_with(h.output_dir()), "log should be published: {}", log_path.display());
    let log = fs::read_to_string(log_path).expect("log retained");
    assert!(log.contains("exit status 7"));

    assert_eq!(record(&summary.records, "fine").status, RunStatus::Succeeded);
    assert_eq!(summary.exit_code(), EXIT_POD_FAILED);

    let published = read_records(&h.output_dir().join("run_records.json")).unwrap();
    assert_eq!(published, summary.records);
    let index = fs::read_to_string(h.output_dir().join("index.html")).unwrap();
    assert!(index.contains("CM4_hist/broken/broken.html"));
    assert!(h.output_dir().join("CM4_hist/broken/broken.html").is_file());
    assert!(!h.output_dir().join("CM4_hist/inputs").exists());
    assert!(!h.work_dir().exists());
}

/// Test that two runs over the same inputs make the same choices.
#[tokio::test]
async fn test_resolution_is_deterministic() {
    let h = TestHarness::new();
    h.add_monthly("CM4_hist", "PRECT", "kg m-2 s-1", &years(1990, 1992));
    h.add_monthly("CM4_hist", "tas", "K", &years(1990, 1992));
    h.add_pod(
        "mixed",
        json!({
            "pr": { "freq": "mon", "alternates": [{ "name_in_model": "PRECT", "freq": "mon" }] },
            "tas": { "freq": "mon" },
            "ts": { "freq": "mon", "required": false }
        }),
    );
    let text = h.config_text(("CM4_hist", 1990, 1992), &["mixed"], json!({ "overwrite": true }));

    let first = h.run(h.load_config(&text)).await;
    let second = h.run(h.load_config(&text)).await;

    let view = |r: &RunRecord| {
        r.variables
            .iter()
            .map(|v| (v.name.clone(), v.status, v.chain.clone(), v.file.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(view(&first.records[0]), view(&second.records[0]));
    assert_eq!(first.records[0].variables[2].status, VarStatus::MissingOptional);
    assert_eq!(first.records[0].status, RunStatus::Succeeded);
}

/// Test that two assets with the same catalog key cannot both be cataloged.
#[test]
fn test_catalog_keys_are_unique() {
    let h = TestHarness::new();
    let paths = h.add_monthly("CM4_hist", "tas", "K", &[1990]);
    let copy = h
        .model_root("CM4_hist")
        .join("atmos/pp/monthly/1yr/atmos.199001-199012.tas.nc");
    let ds = h.store().read(&paths[0]).unwrap();
    h.store().write(&copy, &ds).unwrap();

    let catalog = CatalogBuilder::new(h.model_root("CM4_hist"), CatalogStyle::Drs, Arc::new(h.store().clone()))
        .build()
        .unwrap();

    assert_eq!(catalog.len(), 1);
    assert_eq!(catalog.entries()[0].path, copy);
    assert_eq!(catalog.invalid().len(), 1);
    assert!(catalog.invalid()[0].reason.message.contains("duplicate catalog key"));

    let table = h.root().join("catalog.csv");
    catalog.write(&table).unwrap();
    let loaded = Catalog::load(&table).unwrap();
    assert_eq!(loaded.entries(), catalog.entries());
}

/// Test that PODs running side by side keep to their own directories.
#[tokio::test]
async fn test_pod_isolation() {
    let h = TestHarness::new();
    h.add_monthly("CM4_hist", "tas", "K", &[1990]);
    for pod in ["alpha", "beta"] {
        h.add_pod(pod, json!({ "tas": { "freq": "mon" } }));
    }
    h.spawner().set_behavior(MockBehavior::Script {
        script: "mkdir -p model && touch \"model/$CASENAME.png\" && sleep 0.2".to_string(),
    });
    let config = h.load_config(&h.config_text(
        ("CM4_hist", 1990, 1990),
        &["alpha", "beta"],
        json!({ "num_workers": 2, "output_escape_policy": "fail" }),
    ));

    let summary = h.run(config).await;

    for pod in ["alpha", "beta"] {
        let r = record(&summary.records, pod);
        assert_eq!(r.status, RunStatus::Succeeded, "{pod}: {:?}", r.reason);
        assert_eq!(r.figures, [PathBuf::from("model/CM4_hist.png")]);
        assert!(h.output_dir().join("CM4_hist").join(pod).join("model/CM4_hist.png").is_file());
    }
}

/// Test that writing outside the POD directory follows the escape policy.
#[tokio::test]
async fn test_escaped_output_policy() {
    for (policy, expected) in [("warn", RunStatus::Succeeded), ("fail", RunStatus::Failed)] {
        let h = TestHarness::new();
        h.add_monthly("CM4_hist", "tas", "K", &[1990]);
        h.add_pod("rogue", json!({ "tas": { "freq": "mon" } }));
        h.spawner().set_behavior(MockBehavior::Script {
            script: "touch ../rogue.txt".to_string(),
        });
        let config = h.load_config(&h.config_text(
            ("CM4_hist", 1990, 1990),
            &["rogue"],
            json!({ "output_escape_policy": policy }),
        ));

        let summary = h.run(config).await;

        let rogue = record(&summary.records, "rogue");
        assert_eq!(rogue.status, expected, "policy {policy}");
        if expected == RunStatus::Failed {
            assert!(rogue.reason.as_ref().unwrap().message.contains("rogue.txt"));
        }
    }
}

/// Test that an interrupt stops the run with a partial report.
#[tokio::test]
async fn test_interrupt_writes_partial_report() {
    let h = TestHarness::new();
    h.add_monthly("CM4_hist", "tas", "K", &[1990]);
    h.add_pod("first", json!({ "tas": { "freq": "mon" } }));
    h.add_pod("second", json!({ "tas": { "freq": "mon" } }));
    h.spawner().set_behavior(MockBehavior::Hang);
    let config = h.load_config(&h.config_text(("CM4_hist", 1990, 1990), &["first", "second"], json!({})));

    let shutdown = Arc::new(Shutdown::new());
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            shutdown.interrupt(Duration::from_millis(100));
        });
    }
    let summary = h.framework(config).run(shutdown).await.unwrap();

    assert_eq!(summary.exit_code(), EXIT_INTERRUPTED);
    assert!(summary.records.iter().all(|r| r.status == RunStatus::Cancelled));
    assert_eq!(h.spawner().spawned().len(), 1);
    assert!(h.output_dir().join("index.html").is_file());
}

/// Test that test mode resolves and preprocesses but runs no driver.
#[tokio::test]
async fn test_mode_runs_no_drivers() {
    let h = TestHarness::new();
    h.add_monthly("CM4_hist", "tas", "K", &[1990]);
    h.add_pod("example", json!({ "tas": { "freq": "mon" } }));
    let config = h.load_config(&h.config_text(
        ("CM4_hist", 1990, 1990),
        &["example"],
        json!({ "test_mode": true }),
    ));

    let summary = h.run(config).await;

    assert_eq!(record(&summary.records, "example").status, RunStatus::Succeeded);
    assert!(h.spawner().spawned().is_empty());
    assert!(record(&summary.records, "example").variables[0].file.is_some());
}

/// Test that fatal problems are errors rather than records.
#[tokio::test]
async fn test_fatal_errors() {
    let h = TestHarness::new();
    h.add_pod("example", json!({ "tas": { "freq": "mon" } }));

    let unknown = h.load_config(&h.config_text(("CM4_hist", 1990, 1990), &["nope"], json!({})));
    let err = h.framework(unknown).run(Arc::new(Shutdown::new())).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigSchema);

    fs::create_dir_all(h.output_dir().join("previous")).unwrap();
    let config = h.load_config(&h.config_text(("CM4_hist", 1990, 1990), &["example"], json!({})));
    let err = h.framework(config).run(Arc::new(Shutdown::new())).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Filesystem);
    assert!(h.spawner().spawned().is_empty());
}
