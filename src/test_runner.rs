//! A stand-in for the neuroimaging toolchain: records every invocation, creates the
//! files each call declares as outputs, and answers queries with canned stdout.

use crate::error::Result;
use crate::tools::{Invocation, ToolRunner};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::path::PathBuf;

pub(crate) struct RecordingRunner {
    root: PathBuf,
    responses: Vec<(String, String)>,
    pub calls: Vec<String>,
}

impl RecordingRunner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), responses: vec![], calls: vec![] }
    }

    /// stdout for any invocation whose command line starts with `prefix`
    pub fn respond(mut self, prefix: &str, stdout: &str) -> Self {
        self.responses.push((prefix.to_string(), stdout.to_string()));
        self
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.calls.iter().position(|c| c.starts_with(prefix))
    }
}

impl ToolRunner for RecordingRunner {
    fn run(&mut self, invocation: &Invocation) -> Result<String> {
        let line = invocation.to_string();
        for out in invocation.outputs() {
            let path = self.root.join(out);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            if path.to_string_lossy().ends_with(".gz") {
                GzEncoder::new(File::create(&path).unwrap(), Compression::fast()).finish().unwrap();
            } else {
                File::create(&path).unwrap();
            }
        }
        self.calls.push(line.clone());
        Ok(self.responses.iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default())
    }
}
