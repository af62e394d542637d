//! On-disk result artifacts: one run folder, one iteration folder per
//! iteration, one subfolder per flow.

use std::{
    fs,
    io::{self, Write as _},
    path::{Path, PathBuf},
};

use aqmlab_common::unix_secs;
use aqmlab_remote::CommandOutput;

/// The run-level result folder plus its `log`.
#[derive(Debug)]
pub struct RunArtifacts {
    root: PathBuf,
}

impl RunArtifacts {
    /// Creates `base/name`, falling back to a unix-seconds suffix when the
    /// folder already exists from an earlier run.
    pub fn create(base: &Path, name: &str) -> io::Result<Self> {
        let preferred = base.join(name);
        let root = if preferred.exists() {
            base.join(format!("{name}__{}", unix_secs()))
        } else {
            preferred
        };
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn write(&self, name: &str, contents: &str) -> io::Result<()> {
        fs::write(self.root.join(name), contents)
    }

    /// Appends a timestamped line to the run-scoped log.
    pub fn log(&self, message: &str) {
        append_log(&self.root.join("log"), message);
    }

    /// Creates the folder for one iteration.
    pub fn iteration(&self, index: u32) -> io::Result<IterationArtifacts> {
        let dir = self.root.join(format!("iter_{index:03}"));
        fs::create_dir(&dir)?;
        Ok(IterationArtifacts { dir })
    }
}

/// One iteration's artifact folder. Populated during collection; nothing is
/// mutated after the iteration's teardown completes.
#[derive(Debug)]
pub struct IterationArtifacts {
    dir: PathBuf,
}

impl IterationArtifacts {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&self, name: &str, contents: &str) -> io::Result<()> {
        fs::write(self.dir.join(name), contents)
    }

    /// Appends a timestamped line to the iteration-scoped log.
    pub fn log(&self, message: &str) {
        append_log(&self.dir.join("log"), message);
    }

    /// Dumps one flow's `{config, cmd, stdout, stderr}` set and returns the
    /// flow folder.
    pub fn dump_flow(
        &self,
        label: &str,
        config_json: &str,
        command: &str,
        output: Option<&CommandOutput>,
    ) -> io::Result<PathBuf> {
        let dir = self.dir.join(label);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("config"), config_json)?;
        fs::write(dir.join("cmd"), command)?;
        if let Some(out) = output {
            fs::write(dir.join("stdout"), &out.stdout)?;
            fs::write(dir.join("stderr"), &out.stderr)?;
        }
        Ok(dir)
    }

    /// Records the remote log paths discovered for a flow; downloading them
    /// is the job of an external fetcher.
    pub fn record_log_paths(&self, flow_dir: &Path, paths: &[String]) -> io::Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut joined = paths.join("\n");
        joined.push('\n');
        fs::write(flow_dir.join("log-paths"), joined)
    }
}

fn append_log(path: &Path, message: &str) {
    let line = format!("[{}] {message}\n", unix_secs());
    let result = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut f| f.write_all(line.as_bytes()));
    if let Err(err) = result {
        tracing::warn!(?path, %err, "could not append to log file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("aqmlab-artifacts-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn run_folder_collision_gets_suffixed() {
        let base = scratch("collision");
        let first = RunArtifacts::create(&base, "exp").unwrap();
        let second = RunArtifacts::create(&base, "exp").unwrap();
        assert_ne!(first.root(), second.root());
        assert!(second.root().file_name().unwrap().to_string_lossy().starts_with("exp__"));
    }

    #[test]
    fn flow_dump_writes_the_four_files() {
        let base = scratch("dump");
        let run = RunArtifacts::create(&base, "exp").unwrap();
        let iter = run.iteration(0).unwrap();

        let out = CommandOutput {
            command: "echo hi".to_string(),
            exit_code: 0,
            stdout: "hi\n".to_string(),
            stderr: String::new(),
        };
        let dir = iter.dump_flow("client_0", "{}", "echo hi", Some(&out)).unwrap();
        for file in ["config", "cmd", "stdout", "stderr"] {
            assert!(dir.join(file).exists(), "{file} missing");
        }
        iter.record_log_paths(&dir, &["abcd.client.qlog".to_string()]).unwrap();
        assert_eq!(fs::read_to_string(dir.join("log-paths")).unwrap(), "abcd.client.qlog\n");
    }

    #[test]
    fn logs_append() {
        let base = scratch("logs");
        let run = RunArtifacts::create(&base, "exp").unwrap();
        run.log("first");
        run.log("second");
        let contents = fs::read_to_string(run.root().join("log")).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("first"));
    }
}
