use std::{
    io::{self, Cursor, Read, Write},
    path::PathBuf,
    process::{Child, Command, ExitStatus, Stdio},
    thread::{self, JoinHandle},
    time::Duration,
};

use image::{GrayImage, ImageFormat};
use serde::Deserialize;
use tracing::instrument;
use wait_timeout::ChildExt;

use crate::{
    ocr::{parse_tsv, OcrEngine, RawWord},
    OcrError,
};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Tesseract executable, looked up on `PATH` unless absolute.
    pub command: String,
    /// `tessdata` directory. Tesseract's compiled-in default is used when unset.
    pub data_path: Option<PathBuf>,
    pub language: String,
    /// Kill the engine after this many milliseconds. No limit when unset.
    pub timeout_ms: Option<u64>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            command: "tesseract".into(),
            data_path: None,
            language: "eng".into(),
            timeout_ms: None,
        }
    }
}

/// Runs the `tesseract` command line tool, streaming the image over stdin and
/// reading TSV from stdout.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    config: OcrConfig,
}

impl TesseractEngine {
    pub fn new(config: OcrConfig) -> Result<Self, OcrError> {
        if let Some(data_path) = &config.data_path {
            if !data_path.is_dir() {
                return Err(OcrError::DataPathMissing(data_path.clone()));
            }
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &OcrConfig {
        &self.config
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.config.command);
        command.arg("stdin").arg("stdout");
        if let Some(data_path) = &self.config.data_path {
            command.arg("--tessdata-dir").arg(data_path);
        }
        command
            .arg("-l")
            .arg(&self.config.language)
            .arg("tsv")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus, OcrError> {
        let Some(timeout) = self.config.timeout_ms.map(Duration::from_millis) else {
            return Ok(child.wait()?);
        };
        match child.wait_timeout(timeout)? {
            Some(status) => Ok(status),
            None => {
                log::warn!("OCR engine exceeded {timeout:?}, killing it");
                let _ = child.kill();
                let _ = child.wait();
                Err(OcrError::Timeout(timeout))
            }
        }
    }
}

impl OcrEngine for TesseractEngine {
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    fn recognize(&self, image: &GrayImage) -> Result<Vec<RawWord>, OcrError> {
        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        let mut child = self
            .command()
            .spawn()
            .map_err(|source| OcrError::EngineMissing {
                command: self.config.command.clone(),
                source,
            })?;

        // Both pipes are drained concurrently so neither can fill up and
        // stall the engine while we wait on it.
        let stdout = drain(child.stdout.take(), "stdout")?;
        let stderr = drain(child.stderr.take(), "stderr")?;

        if let Some(mut stdin) = child.stdin.take() {
            // An early exit shows up as a broken pipe here; the exit status
            // and stderr below say more about why.
            if let Err(e) = stdin.write_all(&png) {
                log::debug!("Failed to write image to OCR engine: {e}");
            }
        }

        let status = self.wait(&mut child)?;
        let output = collect(stdout)?;
        let errors = collect(stderr)?;

        if !status.success() {
            return Err(OcrError::Failed {
                status,
                stderr: errors.trim().to_string(),
            });
        }
        if !errors.trim().is_empty() {
            log::trace!("OCR engine stderr: {}", errors.trim());
        }

        let words = parse_tsv(&output)?;
        log::debug!("Tesseract recognized {} words", words.len());
        Ok(words)
    }
}

type Drain = JoinHandle<io::Result<String>>;

fn drain(pipe: Option<impl Read + Send + 'static>, name: &str) -> Result<Drain, OcrError> {
    let mut pipe = pipe
        .ok_or_else(|| io::Error::other(format!("OCR engine {name} was not captured")))?;
    Ok(thread::spawn(move || {
        let mut bytes = Vec::new();
        pipe.read_to_end(&mut bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }))
}

fn collect(drain: Drain) -> Result<String, OcrError> {
    let output = drain
        .join()
        .map_err(|_| io::Error::other("OCR output reader panicked"))??;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_data_path_is_rejected_up_front() {
        let config = OcrConfig {
            data_path: Some("/definitely/not/a/tessdata/dir".into()),
            ..Default::default()
        };
        assert!(matches!(
            TesseractEngine::new(config),
            Err(OcrError::DataPathMissing(_))
        ));
    }

    #[test]
    fn missing_binary_is_reported() {
        let engine = TesseractEngine::new(OcrConfig {
            command: "ocrpoint-no-such-ocr-binary".into(),
            ..Default::default()
        })
        .unwrap();
        let result = engine.recognize(&GrayImage::new(8, 8));
        assert!(matches!(result, Err(OcrError::EngineMissing { .. })));
    }

    #[test]
    fn command_line_includes_language_and_data_path() {
        let dir = tempfile::tempdir().unwrap();
        let engine = TesseractEngine::new(OcrConfig {
            data_path: Some(dir.path().to_path_buf()),
            language: "deu".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(engine.config().language, "deu");
        let command = engine.command();
        let args: Vec<_> = command
            .get_args()
            .map(|it| it.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "stdin".to_string(),
                "stdout".into(),
                "--tessdata-dir".into(),
                dir.path().to_string_lossy().into_owned(),
                "-l".into(),
                "deu".into(),
                "tsv".into(),
            ]
        );
    }

    /// Writes an executable stand-in for `tesseract` that runs `body` after
    /// consuming the image on stdin.
    #[cfg(unix)]
    fn fake_engine(dir: &std::path::Path, body: &str) -> OcrConfig {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-tesseract");
        std::fs::write(&path, format!("#!/bin/sh\ncat > /dev/null\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        OcrConfig {
            command: path.to_string_lossy().into_owned(),
            timeout_ms: Some(30_000),
            ..Default::default()
        }
    }

    #[test]
    #[cfg(unix)]
    fn noisy_stderr_does_not_stall_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        let engine = TesseractEngine::new(fake_engine(
            dir.path(),
            "head -c 200000 /dev/zero | tr '\\0' 'w' >&2\n\
             printf 'level\\tpage_num\\tblock_num\\tpar_num\\tline_num\\tword_num\\tleft\\ttop\\twidth\\theight\\tconf\\ttext\\n'\n\
             printf '5\\t1\\t1\\t1\\t1\\t1\\t60\\t70\\t100\\t40\\t96.1\\tSubmit\\n'",
        ))
        .unwrap();
        let words = engine.recognize(&GrayImage::new(64, 32)).unwrap();
        assert_eq!(
            words,
            vec![RawWord {
                text: "Submit".into(),
                left: 60,
                top: 70,
                width: 100,
                height: 40,
            }]
        );
    }

    #[test]
    #[cfg(unix)]
    fn failed_run_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let engine = TesseractEngine::new(fake_engine(
            dir.path(),
            "echo 'Failed loading language xyz' >&2\nexit 1",
        ))
        .unwrap();
        match engine.recognize(&GrayImage::new(8, 8)) {
            Err(OcrError::Failed { status, stderr }) => {
                assert_eq!(status.code(), Some(1));
                assert_eq!(stderr, "Failed loading language xyz");
            }
            other => panic!("expected a failed run, got {other:?}"),
        }
    }
}
