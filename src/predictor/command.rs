use std::fs::{self, File};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{
    output_tail, parse_consensus_error, parse_landmarks, LandmarkPredictor, PredictionRequest,
    PredictorError,
};
use crate::data::{write_ply, PlyFormat};
use crate::pipeline::PredictionResult;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const TAIL_CHARS: usize = 500;

/// Runs the predictor as an external program:
/// `<program> <args..> --c <config.json> --n <scan.ply>`.
///
/// Every call gets its own scratch directory holding the aligned scan, the
/// model config and the captured output.
#[derive(Debug, Clone)]
pub struct CommandPredictor {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    env: Vec<(String, String)>,
}

impl CommandPredictor {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl LandmarkPredictor for CommandPredictor {
    fn name(&self) -> &str {
        "command"
    }

    fn predict(&self, request: &PredictionRequest<'_>) -> Result<PredictionResult, PredictorError> {
        let started = Instant::now();
        let scratch = tempfile::Builder::new().prefix("prealign-").tempdir()?;
        let scan_path = scratch.path().join("scan.ply");
        let config_path = scratch.path().join("config.json");
        let landmarks_path = scratch.path().join("scan_landmarks.txt");
        let stdout_path = scratch.path().join("stdout.log");
        let stderr_path = scratch.path().join("stderr.log");

        write_ply(&scan_path, request.cloud, PlyFormat::BinaryLittleEndian)
            .map_err(|e| PredictorError::MalformedMesh(e.to_string()))?;
        fs::write(
            &config_path,
            serde_json::to_vec_pretty(&request.config.to_model_json())
                .map_err(|e| PredictorError::MalformedOutput(e.to_string()))?,
        )?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--c")
            .arg(&config_path)
            .arg("--n")
            .arg(&scan_path)
            .current_dir(scratch.path())
            .stdin(Stdio::null())
            .stdout(File::create(&stdout_path)?)
            .stderr(File::create(&stderr_path)?);
        for (key, value) in &self.env {
            command.env(key, value);
        }

        debug!(
            file_id = request.file_id,
            strategy = request.strategy_id,
            program = %self.program.display(),
            "Launching predictor"
        );

        let mut child = command.spawn().map_err(|e| {
            PredictorError::Unavailable(format!("cannot start '{}': {}", self.program.display(), e))
        })?;

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                if let Err(e) = child.kill() {
                    warn!(error = %e, "Failed to kill timed-out predictor");
                }
                let _ = child.wait();
                return Err(PredictorError::Timeout {
                    seconds: self.timeout.as_secs(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        // stderr first, matching how the model interleaves its logs
        let mut output = fs::read_to_string(&stderr_path).unwrap_or_default();
        output.push_str(&fs::read_to_string(&stdout_path).unwrap_or_default());

        if !status.success() {
            return Err(PredictorError::ProcessFailed {
                status: status.to_string(),
                output_tail: output_tail(&output, TAIL_CHARS),
            });
        }

        let error = parse_consensus_error(&output)?;
        let landmarks_text = fs::read_to_string(&landmarks_path).map_err(|e| {
            PredictorError::MalformedOutput(format!("missing landmarks file: {}", e))
        })?;
        let landmarks = parse_landmarks(&landmarks_text)?;

        PredictionResult::new(landmarks, error, started.elapsed())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::data::PointCloud;
    use crate::predictor::PredictorConfig;
    use tempfile::TempDir;

    /// Predictor running `body` through `/bin/sh`.
    fn script(dir: &TempDir, body: &str, timeout: Duration) -> CommandPredictor {
        let path = dir.path().join("predict.sh");
        fs::write(&path, format!("{}\n", body)).unwrap();
        CommandPredictor::new("/bin/sh", vec![path.display().to_string()], timeout)
    }

    fn run(predictor: &CommandPredictor) -> Result<PredictionResult, PredictorError> {
        let cloud = PointCloud::from_points(vec![[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]]).unwrap();
        let config = PredictorConfig::default();
        predictor.predict(&PredictionRequest {
            file_id: "men/1",
            strategy_id: "center",
            cloud: &cloud,
            config: &config,
        })
    }

    #[test]
    fn test_successful_prediction() {
        let dir = TempDir::new().unwrap();
        let predictor = script(
            &dir,
            "i=0; while [ $i -lt 73 ]; do echo \"$i 0 0\" >> scan_landmarks.txt; i=$((i+1)); done\necho 'Ransac average error 4.25' >&2",
            Duration::from_secs(30),
        );
        let result = run(&predictor).unwrap();
        assert_eq!(result.error(), 4.25);
        assert_eq!(result.landmarks().len(), 73);
        assert_eq!(result.landmarks()[72], [72.0, 0.0, 0.0]);
    }

    #[test]
    fn test_non_zero_exit_is_process_failure() {
        let dir = TempDir::new().unwrap();
        let predictor = script(&dir, "echo 'model weights not found' >&2; exit 3", Duration::from_secs(30));
        match run(&predictor) {
            Err(PredictorError::ProcessFailed { output_tail, .. }) => {
                assert!(output_tail.contains("model weights not found"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_timeout_kills_process() {
        let dir = TempDir::new().unwrap();
        let predictor = script(&dir, "exec sleep 5", Duration::from_millis(200));
        let started = Instant::now();
        assert!(matches!(run(&predictor), Err(PredictorError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_missing_program_is_unavailable() {
        let predictor = CommandPredictor::new("/nonexistent/predict", vec![], Duration::from_secs(1));
        assert!(matches!(run(&predictor), Err(PredictorError::Unavailable(_))));
    }
}
