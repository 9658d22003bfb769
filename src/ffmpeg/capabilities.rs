//! Encoder and pixel-format capability queries.
//!
//! Queried once per toolchain via `-encoders` and `-h encoder=NAME`. The
//! command builder only ever sees the resulting `CapabilitySet`.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::process::Command;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

use crate::codec::KNOWN_ENCODER_NAMES;
use crate::error::AppError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilitySet {
    encoders: HashSet<String>,
    pixel_formats: HashMap<String, Vec<String>>,
}

impl CapabilitySet {
    pub fn from_encoders<I, S>(encoders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            encoders: encoders.into_iter().map(Into::into).collect(),
            pixel_formats: HashMap::new(),
        }
    }

    pub fn with_pixel_formats<I, S>(mut self, encoder: &str, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.encoders.insert(encoder.to_string());
        self.pixel_formats.insert(
            encoder.to_string(),
            formats.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn has_encoder(&self, encoder: &str) -> bool {
        self.encoders.contains(encoder)
    }

    pub fn supports_pix_fmt(&self, encoder: &str, pix_fmt: &str) -> bool {
        self.pixel_formats
            .get(encoder)
            .is_some_and(|formats| formats.iter().any(|f| f == pix_fmt))
    }

    pub fn encoders(&self) -> Vec<String> {
        let mut names: Vec<String> = self.encoders.iter().cloned().collect();
        names.sort();
        names
    }
}

/// Parse `ffmpeg -encoders`: flag column then encoder name, after the `------` rule.
pub fn parse_encoders_output(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let flags = parts.next()?;
            let name = parts.next()?;
            if flags.len() == 6 && !name.is_empty() {
                Some(name.to_string())
            } else {
                None
            }
        })
        .collect()
}

/// Parse the `Supported pixel formats:` line of `ffmpeg -h encoder=NAME`.
pub fn parse_pixel_formats(output: &str) -> Vec<String> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("Supported pixel formats:"))
        .map(|rest| rest.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

fn run_introspection(ffmpeg: &Path, args: &[&str]) -> Result<String, AppError> {
    let mut cmd = Command::new(ffmpeg);
    cmd.args(args);
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let output = cmd.output().map_err(|e| {
        AppError::ToolUnavailable(format!(
            "Failed to run {} for capability query: {}",
            ffmpeg.display(),
            e
        ))
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::process_failed(
            output.status.code().unwrap_or(-1),
            stderr.trim(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Query the encoders the tool provides, plus pixel formats for the ones the builder drives.
pub fn query_capabilities(ffmpeg: &Path) -> Result<CapabilitySet, AppError> {
    let listing = run_introspection(ffmpeg, &["-hide_banner", "-encoders"])?;
    let available = parse_encoders_output(&listing);
    log::debug!(
        target: "mediapress::ffmpeg::capabilities",
        "FFmpeg reports {} encoders",
        available.len()
    );

    let mut caps = CapabilitySet::from_encoders(available);
    for encoder in KNOWN_ENCODER_NAMES {
        if !caps.has_encoder(encoder) {
            continue;
        }
        let arg = format!("encoder={}", encoder);
        match run_introspection(ffmpeg, &["-hide_banner", "-h", &arg]) {
            Ok(help) => {
                let formats = parse_pixel_formats(&help);
                log::trace!(
                    target: "mediapress::ffmpeg::capabilities",
                    "{} pixel formats: {:?}",
                    encoder,
                    formats
                );
                caps = caps.with_pixel_formats(encoder, formats);
            }
            Err(e) => {
                log::warn!(
                    target: "mediapress::ffmpeg::capabilities",
                    "Pixel format query failed for {}: {}",
                    encoder,
                    e
                );
            }
        }
    }
    Ok(caps)
}
