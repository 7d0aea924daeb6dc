use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::format::{FrameFormat, MediaKind, PixelFormat, SampleFormat};
use crate::stream::CodecParameters;
use crate::timebase::TimeBase;

pub const DEFAULT_WIDTH: u32 = 540;
pub const DEFAULT_HEIGHT: u32 = 960;
pub const DEFAULT_FPS: u32 = 25;
pub const DEFAULT_DURATION_MS: u64 = 10_000;
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_CHANNELS: u16 = 2;
pub const DEFAULT_FRAME_SIZE: u32 = 1024;

/// Settings of one export run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Target length in milliseconds; 0 disables the frame budget.
    pub duration_ms: u64,
    pub disable_video: bool,
    pub disable_audio: bool,
    pub video_codec: String,
    pub audio_codec: String,
    pub pixel_format: PixelFormat,
    /// Layout of the images handed to `submit_frame`.
    pub submit_format: PixelFormat,
    pub video_bit_rate: Option<u64>,
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
    pub channels: u16,
    /// Samples per channel in one audio frame.
    pub frame_size: u32,
    pub audio_bit_rate: Option<u64>,
    /// Frames buffered per stream between the submitter and the encoder.
    pub queue_capacity: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::new(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
            duration_ms: DEFAULT_DURATION_MS,
            disable_video: false,
            disable_audio: false,
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            pixel_format: PixelFormat::Yuv420p,
            submit_format: PixelFormat::Rgba,
            video_bit_rate: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            sample_format: SampleFormat::S16,
            channels: DEFAULT_CHANNELS,
            frame_size: DEFAULT_FRAME_SIZE,
            audio_bit_rate: None,
            queue_capacity: 8,
        }
    }
}

impl ExportConfig {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn builder(output: impl Into<PathBuf>) -> ExportConfigBuilder {
        ExportConfigBuilder {
            config: Self::new(output),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.output.as_os_str().is_empty() {
            return Err(PipelineError::Configuration("output path is empty".into()));
        }
        if self.disable_video && self.disable_audio {
            return Err(PipelineError::Configuration(
                "both video and audio are disabled".into(),
            ));
        }
        if !self.disable_video {
            if self.width == 0 || self.height == 0 {
                return Err(PipelineError::Configuration(format!(
                    "invalid video size {}x{}",
                    self.width, self.height
                )));
            }
            if self.fps == 0 || self.fps > i32::MAX as u32 {
                return Err(PipelineError::Configuration(format!(
                    "fps {} out of range",
                    self.fps
                )));
            }
            if self.video_codec.is_empty() {
                return Err(PipelineError::Configuration("video codec is empty".into()));
            }
        }
        if !self.disable_audio {
            if self.sample_rate == 0 || self.channels == 0 || self.frame_size == 0 {
                return Err(PipelineError::Configuration(format!(
                    "invalid audio layout: {} Hz, {} channels, {} samples per frame",
                    self.sample_rate, self.channels, self.frame_size
                )));
            }
            // time bases carry the rate as a signed 32-bit denominator
            if self.sample_rate > i32::MAX as u32 {
                return Err(PipelineError::Configuration(format!(
                    "sample rate {} out of range",
                    self.sample_rate
                )));
            }
            if self.audio_codec.is_empty() {
                return Err(PipelineError::Configuration("audio codec is empty".into()));
            }
        }
        if self.queue_capacity == 0 {
            return Err(PipelineError::Configuration(
                "queue capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn is_enabled(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Video => !self.disable_video,
            MediaKind::Audio => !self.disable_audio,
        }
    }

    pub fn enabled_kinds(&self) -> Vec<MediaKind> {
        [MediaKind::Video, MediaKind::Audio]
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }

    /// Raw layout the encoder for `kind` consumes.
    pub fn export_format(&self, kind: MediaKind) -> FrameFormat {
        match kind {
            MediaKind::Video => FrameFormat::video(self.pixel_format, self.width, self.height),
            MediaKind::Audio => FrameFormat::audio(
                self.sample_format,
                self.channels,
                self.sample_rate,
                self.frame_size,
            ),
        }
    }

    /// Layout accepted by `submit_frame` / `submit_samples`.
    pub fn submit_format(&self, kind: MediaKind, width: u32, height: u32) -> FrameFormat {
        match kind {
            MediaKind::Video => FrameFormat::video(self.submit_format, width, height),
            MediaKind::Audio => self.export_format(MediaKind::Audio),
        }
    }

    pub fn time_base(&self, kind: MediaKind) -> TimeBase {
        match kind {
            MediaKind::Video => TimeBase::per_second(self.fps),
            MediaKind::Audio => TimeBase::per_second(self.sample_rate),
        }
    }

    pub fn codec_parameters(&self, kind: MediaKind) -> CodecParameters {
        match kind {
            MediaKind::Video => CodecParameters::Video {
                codec: self.video_codec.clone(),
                pixel: Some(self.pixel_format),
                width: self.width,
                height: self.height,
                frame_rate: self.fps,
                bit_rate: self.video_bit_rate,
            },
            MediaKind::Audio => CodecParameters::Audio {
                codec: self.audio_codec.clone(),
                sample: Some(self.sample_format),
                channels: self.channels,
                sample_rate: self.sample_rate,
                frame_size: self.frame_size,
                bit_rate: self.audio_bit_rate,
            },
        }
    }

    /// Frames of `kind` that fit into `duration_ms`, rounded up. 0 means unbounded.
    pub fn frame_budget(&self, kind: MediaKind) -> u64 {
        if self.duration_ms == 0 {
            return 0;
        }
        let (units, per_frame) = match kind {
            MediaKind::Video => (self.duration_ms.saturating_mul(self.fps as u64), 1000),
            MediaKind::Audio => (
                self.duration_ms.saturating_mul(self.sample_rate as u64),
                1000 * self.frame_size.max(1) as u64,
            ),
        };
        units.div_ceil(per_frame)
    }
}

pub struct ExportConfigBuilder {
    config: ExportConfig,
}

impl ExportConfigBuilder {
    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.config.width = width;
        self.config.height = height;
        self
    }

    pub fn fps(mut self, fps: u32) -> Self {
        self.config.fps = fps;
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.config.duration_ms = duration_ms;
        self
    }

    pub fn disable_video(mut self) -> Self {
        self.config.disable_video = true;
        self
    }

    pub fn disable_audio(mut self) -> Self {
        self.config.disable_audio = true;
        self
    }

    pub fn video_codec(mut self, codec: impl Into<String>) -> Self {
        self.config.video_codec = codec.into();
        self
    }

    pub fn audio_codec(mut self, codec: impl Into<String>) -> Self {
        self.config.audio_codec = codec.into();
        self
    }

    pub fn pixel_format(mut self, format: PixelFormat) -> Self {
        self.config.pixel_format = format;
        self
    }

    pub fn audio(mut self, sample_rate: u32, channels: u16, frame_size: u32) -> Self {
        self.config.sample_rate = sample_rate;
        self.config.channels = channels;
        self.config.frame_size = frame_size;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn build(self) -> ExportConfig {
        self.config
    }
}

/// Settings of the decoding side of a transcode.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub input: PathBuf,
    pub disable_video: bool,
    pub disable_audio: bool,
    pub packet_queue_capacity: usize,
    pub frame_queue_capacity: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            disable_video: false,
            disable_audio: false,
            packet_queue_capacity: 64,
            frame_queue_capacity: 8,
        }
    }
}

impl SourceConfig {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            ..Default::default()
        }
    }

    pub fn is_enabled(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Video => !self.disable_video,
            MediaKind::Audio => !self.disable_audio,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.input.as_os_str().is_empty() {
            return Err(PipelineError::Configuration("input path is empty".into()));
        }
        if self.disable_video && self.disable_audio {
            return Err(PipelineError::Configuration(
                "both video and audio are disabled".into(),
            ));
        }
        if self.packet_queue_capacity == 0 || self.frame_queue_capacity == 0 {
            return Err(PipelineError::Configuration(
                "queue capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_export_constants() {
        let config = ExportConfig::new("out.mp4");
        assert_eq!((config.width, config.height, config.fps), (540, 960, 25));
        assert_eq!(config.duration_ms, 10_000);
        assert_eq!(config.pixel_format, PixelFormat::Yuv420p);
        assert_eq!(config.sample_format, SampleFormat::S16);
        assert_eq!(config.frame_size, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_settings() {
        assert!(ExportConfig::default().validate().is_err());
        assert!(ExportConfig::builder("a.mp4").fps(0).build().validate().is_err());
        assert!(ExportConfig::builder("a.mp4").size(0, 10).build().validate().is_err());
        let none = ExportConfig::builder("a.mp4").disable_video().disable_audio().build();
        assert!(matches!(none.validate(), Err(PipelineError::Configuration(_))));
        // size is irrelevant without video
        let audio_only = ExportConfig::builder("a.mp4").size(0, 0).disable_video().build();
        assert!(audio_only.validate().is_ok());
    }

    #[test]
    fn validate_rejects_rates_beyond_time_base_range() {
        let fps = ExportConfig::builder("a.mp4").fps(u32::MAX).build();
        assert!(matches!(fps.validate(), Err(PipelineError::Configuration(_))));
        let rate = ExportConfig::builder("a.mp4").audio(u32::MAX, 2, 1024).build();
        assert!(matches!(rate.validate(), Err(PipelineError::Configuration(_))));
        let limit = i32::MAX as u32;
        let edge = ExportConfig::builder("a.mp4").fps(limit).audio(limit, 2, 1024).build();
        assert!(edge.validate().is_ok());
        // overflowing products saturate instead of wrapping
        let long = ExportConfig::builder("a.mp4").fps(limit).duration_ms(u64::MAX).build();
        assert_eq!(long.frame_budget(MediaKind::Video), u64::MAX.div_ceil(1000));
    }

    #[test]
    fn frame_budget_rounds_up() {
        let config = ExportConfig::builder("a.mp4").fps(25).duration_ms(10_000).build();
        assert_eq!(config.frame_budget(MediaKind::Video), 250);
        let config = ExportConfig::builder("a.mp4").fps(30).duration_ms(1001).build();
        assert_eq!(config.frame_budget(MediaKind::Video), 31);
        assert_eq!(config.frame_budget(MediaKind::Audio), 44);
        let unbounded = ExportConfig::builder("a.mp4").duration_ms(0).build();
        assert_eq!(unbounded.frame_budget(MediaKind::Video), 0);
    }

    #[test]
    fn deserialize_partial_json() {
        let config: ExportConfig = serde_json::from_str(
            r#"{ "output": "clip.mp4", "width": 720, "height": 1280, "disable_audio": true }"#,
        )
        .unwrap();
        assert_eq!(config.output, PathBuf::from("clip.mp4"));
        assert_eq!(config.width, 720);
        assert_eq!(config.fps, 25);
        assert_eq!(config.enabled_kinds(), vec![MediaKind::Video]);
    }

    #[test]
    fn source_config_validation() {
        assert!(SourceConfig::new("in.mp4").validate().is_ok());
        assert!(SourceConfig::default().validate().is_err());
    }
}
