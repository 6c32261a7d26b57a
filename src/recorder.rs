//! Playback recorder for debugging - saves every played utterance as a WAV file

use chrono::Local;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

pub struct PlaybackRecorder {
    base: PathBuf, // <record_dir>/20250603_153055/
    utterance: u32,
    current: Option<(PathBuf, WavWriter<BufWriter<File>>)>,
}

impl PlaybackRecorder {
    pub fn new(record_dir: &Path) -> Option<Self> {
        let ts = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let base = record_dir.join(ts);

        if let Err(e) = fs::create_dir_all(&base) {
            error!("Failed to create recordings directory {:?}: {}", base, e);
            return None;
        }
        info!("Playback recording enabled, saving to: {:?}", base);

        Some(Self {
            base,
            utterance: 0,
            current: None,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    /// Open a new file for the utterance that just started.
    pub fn on_speech_start(&mut self, sample_rate: u32) {
        self.on_speech_end();

        self.utterance += 1;
        let path = self.base.join(format!(
            "utterance_{:03}_{}.wav",
            self.utterance,
            Local::now().format("%H%M%S%.3f")
        ));
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        match WavWriter::create(&path, spec) {
            Ok(writer) => {
                debug!("Recording utterance {} to {:?}", self.utterance, path);
                self.current = Some((path, writer));
            }
            Err(e) => error!("Failed to create utterance file: {}", e),
        }
    }

    pub fn on_samples(&mut self, samples: &[i16]) {
        let Some((_, writer)) = self.current.as_mut() else {
            return;
        };
        for sample in samples {
            if let Err(e) = writer.write_sample(*sample) {
                error!("Failed to write utterance samples: {}", e);
                self.current = None;
                return;
            }
        }
    }

    /// Finalize the open file, returning its path.
    pub fn on_speech_end(&mut self) -> Option<PathBuf> {
        let (path, writer) = self.current.take()?;
        match writer.finalize() {
            Ok(()) => {
                debug!("Closed utterance file {:?}", path);
                Some(path)
            }
            Err(e) => {
                error!("Failed to finalize utterance file: {}", e);
                None
            }
        }
    }
}

impl Drop for PlaybackRecorder {
    fn drop(&mut self) {
        self.on_speech_end();
    }
}
