//! End-to-end tests for the pre-encode → train pipeline.
//!
//! The external toolkit is replaced by small shell scripts run through `sh`,
//! and the hub by a fetcher that writes placeholder files.

#![cfg(unix)]

use async_trait::async_trait;
use audiogym_training::{
    ArtifactFetcher, CollectingProgressSink, JobSlug, LaunchMode, ModelRegistry, NoticeLevel, Pipeline, PipelineOptions,
    PreEncodeRequest, ScriptPlatform, StageState, Toolchain, TrainRequest, TrainingError, TrainingHyperParams,
    TrainingLayout, TrainingResult,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const REGISTRY: &str = r"
diffusion:
  stable-audio-open-1.0:
    repo: stabilityai/stable-audio-open-1.0
    file: model.safetensors
    config_file: model_config.json
    autoencoder: oobleck
autoencoder:
  oobleck:
    repo: stabilityai/stable-audio-open-1.0
    file: vae_model.ckpt
    config_file: vae_model_config.json
";

const PRE_ENCODE_TOOL: &str = r#"out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output-path) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
echo "encoding into $out"
mkdir -p "$out"
echo "encoder warnings go here" >&2
"#;

const TRAIN_TOOL: &str = r#"name=""
while [ $# -gt 0 ]; do
  case "$1" in
    --name) name="$2"; shift 2 ;;
    *) shift ;;
  esac
done
echo "training $name"
"#;

fn template() -> Value {
    json!({
        "model_type": "diffusion_cond",
        "sample_rate": 44100,
        "training": {
            "pre_encoded": false,
            "optimizer_configs": { "diffusion": { "optimizer": { "type": "AdamW", "config": { "lr": 5e-5 } } } },
            "demo": { "demo_every": 2000, "num_demos": 4 }
        }
    })
}

#[derive(Default)]
struct PlaceholderFetcher {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ArtifactFetcher for PlaceholderFetcher {
    async fn fetch(&self, _repo: &str, file: &str, dest: &Path) -> TrainingResult<()> {
        self.calls.lock().unwrap().push(file.to_string());
        let contents = if file == "model_config.json" { template().to_string() } else { "weights".to_string() };
        std::fs::write(dest, contents)?;
        Ok(())
    }
}

struct Harness {
    temp: TempDir,
    fetcher: Arc<PlaceholderFetcher>,
    pipeline: Pipeline,
}

impl Harness {
    fn new() -> Self {
        Self::with_options(|_| {})
    }

    fn with_options(customize: impl FnOnce(&mut PipelineOptions)) -> Self {
        let temp = TempDir::new().unwrap();
        let tools = temp.path().join("tools");
        std::fs::create_dir_all(&tools).unwrap();
        std::fs::write(tools.join("pre_encode.py"), PRE_ENCODE_TOOL).unwrap();
        std::fs::write(tools.join("train.py"), TRAIN_TOOL).unwrap();

        let mut options = PipelineOptions {
            toolchain: Toolchain { python: "sh".to_string(), tools_dir: PathBuf::from("tools") },
            platform: ScriptPlatform::Posix,
            launch: LaunchMode::Direct,
            channel_capacity: 4,
        };
        customize(&mut options);

        let fetcher = Arc::new(PlaceholderFetcher::default());
        let registry = Arc::new(ModelRegistry::from_yaml_str(REGISTRY).unwrap());
        let pipeline = Pipeline::new(TrainingLayout::new(temp.path()), registry, fetcher.clone(), options);
        Self { temp, fetcher, pipeline }
    }

    fn layout(&self) -> &TrainingLayout {
        self.pipeline.layout()
    }

    fn fetch_count(&self) -> usize {
        self.fetcher.calls.lock().unwrap().len()
    }
}

fn pre_encode_request(name: &str, caption: &str) -> PreEncodeRequest {
    PreEncodeRequest {
        job_name: name.to_string(),
        base_model: "stable-audio-open-1.0".to_string(),
        data_root_dir: PathBuf::from("/data/raw"),
        caption: caption.to_string(),
    }
}

fn train_request(name: &str, caption: &str, learning_rate: &str) -> TrainRequest {
    TrainRequest {
        job_name: name.to_string(),
        base_model: "stable-audio-open-1.0".to_string(),
        caption: caption.to_string(),
        hyperparams: TrainingHyperParams {
            learning_rate: learning_rate.to_string(),
            demo_every: 100,
            ..Default::default()
        },
    }
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_drum_loops_end_to_end() {
    let h = Harness::new();
    let slug = JobSlug::from_name("Drum Loops").unwrap();
    assert_eq!(slug.as_str(), "drum-loops");

    let sink = CollectingProgressSink::new();
    let outcome = h.pipeline.pre_encode_dataset(&pre_encode_request("Drum Loops", "paths"), &sink).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.exit_code, Some(0));

    let pe_config = read_json(&h.layout().pre_encode_dataset_config_path(&slug));
    assert_eq!(pe_config["dataset_type"], "audio_dir");
    assert_eq!(pe_config["datasets"][0]["path"], "/data/raw");
    assert!(h.layout().pre_encoded_dir(&slug).is_dir());
    assert!(h.layout().job_dir(&slug).join("pre-encode.sh").exists());
    assert!(sink.log_lines().iter().any(|l| l == "encoder warnings go here"));
    assert!(sink.log_lines().iter().any(|l| l.starts_with("encoding into") && l.ends_with("dataset/pre_encoded")));

    let sink = CollectingProgressSink::new();
    let outcome = h.pipeline.start_training(&train_request("Drum Loops", "paths", "2e-4"), &sink).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.script_path, h.layout().job_dir(&slug).join("train.sh"));
    assert_eq!(sink.log_lines(), vec!["training drum-loops".to_string()]);

    let merged = read_json(&h.layout().training_config_path(&slug));
    assert_eq!(merged["training"]["optimizer_configs"]["diffusion"]["optimizer"]["config"]["lr"], 0.0002);
    assert_eq!(merged["training"]["demo"]["demo_every"], 100);
    assert_eq!(merged["training"]["pre_encoded"], true);
    assert_eq!(merged["sample_rate"], 44100);

    let dataset = read_json(&h.layout().training_dataset_config_path(&slug));
    assert_eq!(dataset["dataset_type"], "pre_encoded");

    let manifest = audiogym_training::manifest::load_manifest(h.layout(), &slug).unwrap();
    assert_eq!(manifest.state, StageState::Trained);
    assert_eq!(h.fetch_count(), 4);
}

#[tokio::test]
async fn test_training_without_pre_encode_writes_nothing() {
    let h = Harness::new();
    let slug = JobSlug::from_name("Fresh Job").unwrap();
    let sink = CollectingProgressSink::new();

    let err = h.pipeline.start_training(&train_request("Fresh Job", "paths", "1e-4"), &sink).await.unwrap_err();
    assert!(matches!(err, TrainingError::PreconditionFailed(_)));
    assert!(!h.layout().training_config_path(&slug).exists());
    assert!(!h.layout().job_dir(&slug).exists());
    assert_eq!(h.fetch_count(), 0);
    assert_eq!(sink.notices(NoticeLevel::Error).len(), 1);
}

#[tokio::test]
async fn test_unsupported_caption_strategy_writes_nothing() {
    let h = Harness::new();

    let err = h.pipeline.pre_encode_dataset(&pre_encode_request("Drums", "whisper"), &CollectingProgressSink::new()).await;
    assert!(matches!(err, Err(TrainingError::UnsupportedCaptionStrategy(ref s)) if s == "whisper"));

    let err = h.pipeline.start_training(&train_request("Drums", "whisper", "1e-4"), &CollectingProgressSink::new()).await;
    assert!(matches!(err, Err(TrainingError::UnsupportedCaptionStrategy(_))));

    assert!(!h.layout().outputs_dir().exists());
    assert!(!h.layout().models_dir().exists());
    assert_eq!(h.fetch_count(), 0);
}

#[tokio::test]
async fn test_non_numeric_learning_rate_fails_before_launch() {
    let h = Harness::new();
    let slug = JobSlug::from_name("Pads").unwrap();
    std::fs::create_dir_all(h.layout().pre_encoded_dir(&slug)).unwrap();

    let err = h
        .pipeline
        .start_training(&train_request("Pads", "paths", "fast"), &CollectingProgressSink::new())
        .await
        .unwrap_err();
    assert!(err.is_pre_launch());
    assert!(!h.layout().training_config_path(&slug).exists());
    assert_eq!(h.fetch_count(), 0);
}

#[tokio::test]
async fn test_unknown_base_model_fails_before_writes() {
    let h = Harness::new();
    let mut request = pre_encode_request("Drums", "paths");
    request.base_model = "not-in-registry".to_string();
    let err = h.pipeline.pre_encode_dataset(&request, &CollectingProgressSink::new()).await.unwrap_err();
    assert!(matches!(err, TrainingError::UnknownModel { .. }));
    assert!(!h.layout().outputs_dir().exists());
}

#[tokio::test]
async fn test_failed_subprocess_is_an_outcome_not_an_error() {
    let h = Harness::new();
    std::fs::write(h.temp.path().join("tools/pre_encode.py"), "echo 'CUDA out of memory' >&2\nexit 1\n").unwrap();
    let slug = JobSlug::from_name("Broken").unwrap();

    let sink = CollectingProgressSink::new();
    let outcome = h.pipeline.pre_encode_dataset(&pre_encode_request("Broken", "paths"), &sink).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.exit_code, Some(1));
    assert_eq!(sink.log_lines(), vec!["CUDA out of memory".to_string()]);
    assert_eq!(sink.notices(NoticeLevel::Error).len(), 1);

    let manifest = audiogym_training::manifest::load_manifest(h.layout(), &slug).unwrap();
    assert_eq!(manifest.state, StageState::Failed);
}

#[tokio::test]
async fn test_rerun_overwrites_and_reuses_cached_artifacts() {
    let h = Harness::new();
    let sink = CollectingProgressSink::new();
    h.pipeline.pre_encode_dataset(&pre_encode_request("Drums", "paths"), &sink).await.unwrap();
    let slug = JobSlug::from_name("Drums").unwrap();
    let first = std::fs::read(h.layout().pre_encode_dataset_config_path(&slug)).unwrap();

    h.pipeline.pre_encode_dataset(&pre_encode_request("Drums", "paths"), &sink).await.unwrap();
    assert_eq!(first, std::fs::read(h.layout().pre_encode_dataset_config_path(&slug)).unwrap());
    assert_eq!(h.fetch_count(), 2);
}

#[tokio::test]
async fn test_slug_collision_warns_and_shares_directory() {
    let h = Harness::new();
    h.pipeline.pre_encode_dataset(&pre_encode_request("Drum Loops", "paths"), &CollectingProgressSink::new()).await.unwrap();

    let sink = CollectingProgressSink::new();
    h.pipeline.pre_encode_dataset(&pre_encode_request("drum  loops!", "paths"), &sink).await.unwrap();
    let warnings = sink.notices(NoticeLevel::Warn);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("drum-loops"));

    let jobs = audiogym_training::discover_jobs(h.layout()).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].name, "drum  loops!");
}

#[tokio::test]
async fn test_windows_platform_renders_caret_script() {
    let h = Harness::with_options(|o| o.platform = ScriptPlatform::Windows);
    let prepared = h
        .pipeline
        .prepare_pre_encode(&pre_encode_request("Drum Loops", "paths"), &CollectingProgressSink::new())
        .await
        .unwrap();

    assert!(prepared.script_path.ends_with("drum-loops/pre-encode.bat"));
    let script = std::fs::read_to_string(&prepared.script_path).unwrap();
    assert!(script.contains(" ^\n"));
    assert!(!script.contains(" \\\n"));
    assert_eq!(prepared.platform, ScriptPlatform::Windows);
    assert_eq!(script, prepared.command.render(prepared.platform));
    assert_eq!(prepared.process.program, "sh");
    assert_eq!(prepared.process.env.get("PYTHONIOENCODING").map(String::as_str), Some("utf-8"));
}

#[tokio::test]
async fn test_script_launch_mode_runs_rendered_script() {
    let h = Harness::with_options(|o| o.launch = LaunchMode::Script);
    let sink = CollectingProgressSink::new();
    let outcome = h.pipeline.pre_encode_dataset(&pre_encode_request("Drums", "paths"), &sink).await.unwrap();

    assert!(outcome.success);
    assert!(h.layout().pre_encoded_dir(&JobSlug::from_name("Drums").unwrap()).is_dir());
}
