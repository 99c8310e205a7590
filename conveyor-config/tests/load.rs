use conveyor_config::shared::{PipelineConfig, RunnerConfig};
use conveyor_config::{
    Environment, LoadConfigError, configuration_layers, load_runner_config_from,
};
use std::fs;
use std::path::PathBuf;

/// Creates a fresh directory under the system temp dir holding a `configuration` folder.
fn scratch_dir(name: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!(
        "conveyor-config-{name}-{}",
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&root);
    fs::create_dir_all(root.join("configuration")).unwrap();
    root
}

#[test]
fn environment_file_overrides_base_file() {
    let root = scratch_dir("overrides");
    fs::write(
        root.join("configuration/base.yaml"),
        "pipeline:\n  capacity: 3\n  item_count: 50\nrace:\n  trials: 10\n",
    )
    .unwrap();
    fs::write(
        root.join("configuration/dev.yaml"),
        "pipeline:\n  capacity: 8\n  use_lock: false\n",
    )
    .unwrap();

    let config = load_runner_config_from(&root, Environment::Dev).unwrap();

    assert_eq!(config.pipeline.capacity, 8);
    assert_eq!(config.pipeline.item_count, 50);
    assert!(!config.pipeline.use_lock);
    assert_eq!(
        config.pipeline.consumer_count,
        PipelineConfig::DEFAULT_CONSUMER_COUNT
    );
    assert_eq!(config.race.trials, 10);
    assert!(config.validate().is_ok());

    let _ = fs::remove_dir_all(root);
}

#[test]
fn json_files_are_accepted() {
    let root = scratch_dir("json");
    fs::write(root.join("configuration/base.json"), r#"{"pipeline": {"worker_count": 9}}"#)
        .unwrap();
    fs::write(root.join("configuration/prod.json"), "{}").unwrap();

    let config = load_runner_config_from(&root, Environment::Prod).unwrap();
    assert_eq!(config.pipeline.worker_count, 9);

    let _ = fs::remove_dir_all(root);
}

#[test]
fn environment_file_is_optional() {
    let root = scratch_dir("optional");
    fs::write(root.join("configuration/base.yml"), "pipeline:\n  capacity: 4\n").unwrap();

    let layers = configuration_layers(&root, Environment::Prod).unwrap();
    assert_eq!(layers.len(), 1);
    assert!(layers[0].path.ends_with("configuration/base.yml"));

    let config = load_runner_config_from(&root, Environment::Prod).unwrap();
    assert_eq!(config.pipeline.capacity, 4);
    assert_eq!(config.race, RunnerConfig::default().race);

    let _ = fs::remove_dir_all(root);
}

#[test]
fn missing_base_file_is_reported() {
    let root = scratch_dir("no-base");
    fs::write(root.join("configuration/dev.yaml"), "pipeline: {}\n").unwrap();

    let err = load_runner_config_from(&root, Environment::Dev).unwrap_err();
    assert!(matches!(err, LoadConfigError::MissingBaseFile(_)));

    let _ = fs::remove_dir_all(root);
}

#[test]
fn malformed_file_is_named_in_the_error() {
    let root = scratch_dir("malformed");
    fs::write(root.join("configuration/base.yaml"), "pipeline: {}\n").unwrap();
    fs::write(root.join("configuration/dev.json"), "{ not json").unwrap();

    let err = load_runner_config_from(&root, Environment::Dev).unwrap_err();
    let LoadConfigError::InvalidFile { path, .. } = &err else {
        panic!("expected an invalid file error, got {err}");
    };
    assert!(path.ends_with("configuration/dev.json"));

    let _ = fs::remove_dir_all(root);
}

#[test]
fn missing_configuration_directory_is_reported() {
    let root = std::env::temp_dir().join(format!("conveyor-config-none-{}", std::process::id()));
    let _ = fs::remove_dir_all(&root);

    let err = load_runner_config_from(&root, Environment::Dev).unwrap_err();
    assert!(matches!(
        err,
        LoadConfigError::MissingConfigurationDirectory(_)
    ));
}

#[test]
fn runner_config_round_trips_through_json() {
    let config = RunnerConfig::default();
    let rendered = serde_json::to_string(&config).unwrap();
    let parsed: RunnerConfig = serde_json::from_str(&rendered).unwrap();
    assert_eq!(parsed, config);
}
