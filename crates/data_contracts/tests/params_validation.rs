use data_contracts::{FinetuneParams, ParamsError};
use std::fs;

const PARAMS_JSON: &str = r#"{
    "patch_size": 240,
    "loader_opts": { "batch_size": 16, "shuffle": true, "num_workers": 4, "num_channels": 4 },
    "train_opts": { "loss": "ce", "superres": false },
    "model_opts": { "model": "unet", "num_classes": 5 },
    "save_dir": "ignored/by/finetuning"
}"#;

#[test]
fn loads_training_params_with_defaults() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("params.json");
    fs::write(&path, PARAMS_JSON).unwrap();

    let params = FinetuneParams::from_path(&path).unwrap();
    assert_eq!(params.patch_size, 240);
    assert_eq!(params.loader_opts.num_workers, 4);
    assert_eq!(params.train_opts.loss, "ce");
    assert_eq!(params.model_opts.base_channels, 32);
    assert_eq!(params.model_opts.depth, 4);
    assert_eq!(params.model_opts.norm_groups, 8);
}

#[test]
fn zero_batch_size_rejected() {
    let mut params: FinetuneParams = serde_json::from_str(PARAMS_JSON).unwrap();
    params.loader_opts.batch_size = 0;
    let err = params.validate().unwrap_err();
    assert!(matches!(
        err,
        ParamsError::Zero {
            field: "loader_opts.batch_size"
        }
    ));
}

#[test]
fn norm_groups_must_divide_channels() {
    let mut params: FinetuneParams = serde_json::from_str(PARAMS_JSON).unwrap();
    params.model_opts.norm_groups = 5;
    assert!(matches!(
        params.validate(),
        Err(ParamsError::NormGroups { groups: 5, channels: 32 })
    ));
}

#[test]
fn missing_file_reports_path() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("absent.json");
    let err = FinetuneParams::from_path(&path).unwrap_err();
    assert!(matches!(err, ParamsError::Io { .. }));
    assert!(err.to_string().contains("absent.json"));
}
