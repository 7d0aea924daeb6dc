use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::exporter::Exporter;
use crate::format::{FrameFormat, MediaKind, PixelFormat};
use crate::frame::Frame;
use crate::timebase::TimeBase;

/// Something that hands out images by presentation clock and audio frames in order.
pub trait Producer {
    /// The image to present at `clock_ms`, or None when nothing is available.
    fn get_image(&mut self, clock_ms: i64) -> Result<Option<&Frame>>;

    /// The next audio frame, or None at end of audio.
    fn get_sample(&mut self) -> Result<Option<&Frame>>;
}

/// Reads a headerless file of back-to-back RGBA images.
pub struct RawFileProducer {
    reader: BufReader<File>,
    format: FrameFormat,
    fps: u32,
    scratch: Vec<u8>,
    frame: Frame,
    index: Option<u64>,
    exhausted: bool,
}

impl RawFileProducer {
    pub fn open(path: impl AsRef<Path>, width: u32, height: u32, fps: u32) -> Result<Self> {
        let path = path.as_ref();
        if width == 0 || height == 0 || fps == 0 {
            return Err(PipelineError::Configuration(format!(
                "invalid raw input {}x{} at {} fps",
                width, height, fps
            )));
        }
        let file = File::open(path)
            .map_err(|e| PipelineError::io(format!("opening {}", path.display()), e))?;
        let format = FrameFormat::video(PixelFormat::Rgba, width, height);
        log::info!(
            "raw input {}: {}x{} rgba, {} bytes per image",
            path.display(),
            width,
            height,
            format.buffer_size()
        );
        Ok(Self {
            reader: BufReader::new(file),
            format,
            fps,
            scratch: vec![0; format.buffer_size()],
            frame: Frame::new(format),
            index: None,
            exhausted: false,
        })
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    /// Images read so far.
    pub fn images_read(&self) -> u64 {
        self.index.map_or(0, |i| i + 1)
    }

    /// True once the end of the file was reached.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Submit every image, and a matching run of silence when audio is
    /// enabled, to a started exporter at its frame rate. Without a duration
    /// the file length decides. Returns the number of clock ticks fed.
    pub fn feed(&mut self, exporter: &Exporter, canceled: impl Fn() -> bool) -> Result<u64> {
        let config = exporter.config();
        let (width, height, fps) = (config.width, config.height, config.fps.max(1) as i64);
        let bounded = config.duration_ms > 0;
        let silence = vec![0u8; config.export_format(MediaKind::Audio).buffer_size()];
        let video = config.is_enabled(MediaKind::Video);
        let mut audio = config.is_enabled(MediaKind::Audio);
        let mut samples_sent = 0i64;

        let mut index = 0i64;
        while !canceled() {
            let clock = index * 1000 / fps;
            let available = self.get_image(clock)?.is_some();
            if !available || (self.exhausted && !bounded) {
                break;
            }
            // images still pace the run when only silence is exported
            if video {
                let Some(image) = self.get_image(clock)? else {
                    break;
                };
                match exporter.submit_frame(image.data(), width, height) {
                    Ok(()) => {}
                    Err(PipelineError::DurationReached { .. }) | Err(PipelineError::Aborted) => {
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }

            let until = (index + 1) * config.sample_rate as i64 / fps;
            while audio && samples_sent < until {
                match exporter.submit_samples(&silence) {
                    Ok(()) => samples_sent += config.frame_size as i64,
                    Err(PipelineError::DurationReached { .. }) => audio = false,
                    Err(PipelineError::Aborted) => return Ok(index as u64),
                    Err(err) => return Err(err),
                }
            }
            index += 1;
            if !video && !audio {
                break;
            }
        }
        Ok(index as u64)
    }

    fn read_next(&mut self) -> Result<bool> {
        match self.reader.read_exact(&mut self.scratch) {
            Ok(()) => {
                self.frame
                    .copy_from(&self.scratch, self.format)
                    .map_err(PipelineError::Conversion)?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                log::info!("raw input exhausted after {} images", self.images_read());
                self.exhausted = true;
                Ok(false)
            }
            Err(e) => Err(PipelineError::io("reading raw image", e)),
        }
    }
}

impl Producer for RawFileProducer {
    fn get_image(&mut self, clock_ms: i64) -> Result<Option<&Frame>> {
        let target = clock_ms.max(0) as u64 * self.fps as u64 / 1000;
        while !self.exhausted && self.index.is_none_or(|i| i < target) {
            if self.read_next()? {
                self.index = Some(self.index.map_or(0, |i| i + 1));
            }
        }
        let Some(index) = self.index else {
            return Ok(None);
        };
        self.frame.set_time_base(TimeBase::MILLIS);
        self.frame.set_pts(Some((index * 1000 / self.fps as u64) as i64));
        self.frame.set_duration((1000 / self.fps.max(1)) as i64);
        Ok(Some(&self.frame))
    }

    fn get_sample(&mut self) -> Result<Option<&Frame>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::config::ExportConfig;
    use crate::error::ExportResult;
    use crate::mock::MockSetup;

    fn raw_file(images: &[u8], width: u32, height: u32) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let size = (width * height * 4) as usize;
        for tag in images {
            file.write_all(&vec![*tag; size]).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn image_follows_clock() -> anyhow::Result<()> {
        let file = raw_file(&[10, 20, 30], 2, 2);
        let mut producer = RawFileProducer::open(file.path(), 2, 2, 25)?;

        let first = producer.get_image(0)?.unwrap();
        assert_eq!(first.data()[0], 10);
        assert_eq!(first.pts(), Some(0));
        // 39 ms is still inside the first image at 25 fps
        assert_eq!(producer.get_image(39)?.unwrap().data()[0], 10);
        let third = producer.get_image(80)?.unwrap();
        assert_eq!(third.data()[0], 30);
        assert_eq!(third.pts(), Some(80));
        Ok(())
    }

    #[test]
    fn last_image_repeats_after_end() -> anyhow::Result<()> {
        let file = raw_file(&[1, 2], 1, 1);
        let mut producer = RawFileProducer::open(file.path(), 1, 1, 10)?;
        assert_eq!(producer.get_image(5000)?.unwrap().data(), &[2, 2, 2, 2]);
        assert_eq!(producer.get_image(6000)?.unwrap().data()[0], 2);
        assert_eq!(producer.images_read(), 2);
        assert!(producer.is_exhausted());
        assert!(producer.get_sample()?.is_none());
        Ok(())
    }

    #[test]
    fn trailing_partial_image_is_ignored() -> anyhow::Result<()> {
        let mut file = raw_file(&[5], 1, 1);
        file.write_all(&[9, 9]).unwrap();
        file.flush().unwrap();
        let mut producer = RawFileProducer::open(file.path(), 1, 1, 25)?;
        assert_eq!(producer.get_image(1000)?.unwrap().data(), &[5, 5, 5, 5]);
        Ok(())
    }

    #[test]
    fn empty_file_has_no_image() -> anyhow::Result<()> {
        let file = raw_file(&[], 1, 1);
        let mut producer = RawFileProducer::open(file.path(), 1, 1, 25)?;
        assert!(producer.get_image(0)?.is_none());
        Ok(())
    }

    #[test]
    fn open_rejects_missing_file_and_bad_size() {
        assert!(matches!(
            RawFileProducer::open("/nonexistent/raw.rgba", 2, 2, 25),
            Err(PipelineError::Io { .. })
        ));
        assert!(matches!(
            RawFileProducer::open("/nonexistent/raw.rgba", 0, 2, 25),
            Err(PipelineError::Configuration(_))
        ));
    }

    fn feed_config() -> ExportConfig {
        ExportConfig::builder("out.mp4")
            .size(2, 2)
            .fps(25)
            .duration_ms(0)
            .audio(44100, 2, 1024)
            .build()
    }

    #[test]
    fn feed_submits_images_and_silence() -> anyhow::Result<()> {
        let setup = MockSetup::default();
        let exporter = Exporter::new(feed_config(), &setup.backends());
        exporter.start()?;
        let file = raw_file(&[1, 2, 3], 2, 2);
        let mut producer = RawFileProducer::open(file.path(), 2, 2, 25)?;

        assert_eq!(producer.feed(&exporter, || false)?, 3);
        assert_eq!(exporter.stop(), ExportResult::Succeeded);
        let log = setup.log.lock();
        let tags: Vec<_> = log.sent(MediaKind::Video).iter().map(|f| f.tag).collect();
        assert_eq!(tags, vec![1, 2, 3]);
        // 3 ticks at 25 fps need 5292 samples
        assert_eq!(log.sent(MediaKind::Audio).len(), 6);
        Ok(())
    }

    #[test]
    fn feed_without_video_only_sends_silence() -> anyhow::Result<()> {
        let setup = MockSetup::default();
        let mut config = feed_config();
        config.disable_video = true;
        let exporter = Exporter::new(config, &setup.backends());
        exporter.start()?;
        let file = raw_file(&[1, 2, 3], 2, 2);
        let mut producer = RawFileProducer::open(file.path(), 2, 2, 25)?;

        assert_eq!(producer.feed(&exporter, || false)?, 3);
        assert_eq!(exporter.stop(), ExportResult::Succeeded);
        let log = setup.log.lock();
        assert!(log.sent(MediaKind::Video).is_empty());
        assert_eq!(log.sent(MediaKind::Audio).len(), 6);
        assert_eq!(log.written(0).len(), 6);
        Ok(())
    }
}
