use std::time::{Duration, Instant};

use crate::config::SourceConfig;
use crate::error::PipelineError;
use crate::format::MediaKind;
use crate::mock::MockSetup;
use crate::producer::Producer;
use crate::source::{Source, SourceState};
use crate::status::StageStatus;
use crate::timebase::TimeBase;

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn decodes_selected_streams_in_milliseconds() -> anyhow::Result<()> {
    let setup = MockSetup::default();
    let mut source = Source::new(SourceConfig::new("in.mp4"), &setup.backends());
    source.open()?;
    assert_eq!(source.state(), SourceState::Opened);
    assert_eq!(source.streams().len(), 3);
    assert_eq!(source.selected(MediaKind::Video).unwrap().index, 0);
    assert_eq!(source.selected(MediaKind::Audio).unwrap().index, 1);

    source.start()?;
    let mut video = Vec::new();
    while let Some(frame) = source.next_frame(MediaKind::Video) {
        assert_eq!(frame.time_base(), TimeBase::MILLIS);
        video.push((frame.data()[0], frame.pts()));
        source.release_frame(MediaKind::Video, frame);
    }
    let expected: Vec<_> = (0..10u8).map(|i| (i, Some(i as i64 * 40))).collect();
    assert_eq!(video, expected);

    let mut audio_pts = Vec::new();
    while let Some(frame) = source.next_frame(MediaKind::Audio) {
        audio_pts.push(frame.pts().unwrap());
    }
    assert_eq!(audio_pts.len(), 6);
    assert!(audio_pts.windows(2).all(|w| w[0] < w[1]));
    assert!(source.next_frame(MediaKind::Audio).is_none());

    let status = source.status();
    assert!(status.contains(StageStatus::READ_END));
    assert!(status.contains(StageStatus::VIDEO_END));
    assert!(status.contains(StageStatus::AUDIO_END));
    assert_eq!(source.state(), SourceState::Draining);
    // the unselected stream 2 is read but dropped
    assert_eq!(source.packets_read(), 19);

    source.stop()?;
    assert_eq!(source.state(), SourceState::Closed);
    let log = setup.log.lock();
    assert_eq!(log.decoder_resets, 2);
    assert_eq!(log.decoders_closed, 2);
    assert!(log.demuxer_closed);
    Ok(())
}

#[test]
fn continue_reads_what_the_input_gained() -> anyhow::Result<()> {
    let setup = MockSetup {
        video_packets: 3,
        appended_video_packets: 2,
        ..Default::default()
    };
    let mut config = SourceConfig::new("in.mp4");
    config.disable_audio = true;
    let mut source = Source::new(config, &setup.backends());
    source.open()?;
    source.start()?;

    let mut tags = Vec::new();
    while let Some(frame) = source.next_frame(MediaKind::Video) {
        tags.push(frame.data()[0]);
        source.release_frame(MediaKind::Video, frame);
    }
    assert_eq!(tags, vec![0, 1, 2]);
    assert_eq!(setup.log.lock().demux_eof_reads, 1);
    assert_eq!(source.state(), SourceState::Draining);

    source.request_continue();
    let mut resumed = Vec::new();
    while let Some(frame) = source.next_frame(MediaKind::Video) {
        resumed.push((frame.data()[0], frame.pts()));
        source.release_frame(MediaKind::Video, frame);
    }
    assert_eq!(resumed, vec![(3, Some(120)), (4, Some(160))]);
    assert!(source.next_frame(MediaKind::Video).is_none());
    assert_eq!(setup.log.lock().demux_eof_reads, 2);
    assert!(source.status().contains(StageStatus::VIDEO_END));

    source.stop()?;
    assert_eq!(setup.log.lock().decoder_resets, 2);
    Ok(())
}

#[test]
fn decoder_failure_unwinds_every_stream() -> anyhow::Result<()> {
    let setup = MockSetup {
        fail_decode_after: Some((MediaKind::Video, 3)),
        video_packets: 2000,
        audio_packets: 2000,
        ..Default::default()
    };
    let mut source = Source::new(SourceConfig::new("in.mp4"), &setup.backends());
    source.open()?;
    source.start()?;

    let started = Instant::now();
    while let Some(frame) = source.next_frame(MediaKind::Audio) {
        source.release_frame(MediaKind::Audio, frame);
    }
    while source.next_frame(MediaKind::Video).is_some() {}
    assert!(started.elapsed() < Duration::from_secs(2));

    let err = source.stop().unwrap_err();
    assert!(matches!(err, PipelineError::Codec { .. }));
    assert!(err.to_string().contains("corrupt packet"));
    assert_eq!(source.state(), SourceState::Closed);
    let log = setup.log.lock();
    assert_eq!(log.decoders_closed, 2);
    assert!(log.demuxer_closed);
    Ok(())
}

#[test]
fn stop_unblocks_full_queues() -> anyhow::Result<()> {
    let setup = MockSetup {
        video_packets: 200,
        audio_packets: 200,
        ..Default::default()
    };
    let mut config = SourceConfig::new("in.mp4");
    config.frame_queue_capacity = 2;
    config.packet_queue_capacity = 4;
    let mut source = Source::new(config, &setup.backends());
    source.open()?;
    source.start()?;
    assert!(wait_until(|| {
        source
            .frame_queue(MediaKind::Video)
            .is_some_and(|q| q.len() == 2)
    }));

    let started = Instant::now();
    source.stop()?;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(source.state(), SourceState::Closed);
    assert!(source.next_frame(MediaKind::Video).is_none());
    assert!(setup.log.lock().demuxer_closed);
    Ok(())
}

#[test]
fn disabled_kind_is_not_decoded() -> anyhow::Result<()> {
    let setup = MockSetup::default();
    let mut config = SourceConfig::new("in.mp4");
    config.disable_audio = true;
    let mut source = Source::new(config, &setup.backends());
    source.open()?;
    assert!(source.selected(MediaKind::Audio).is_none());
    assert!(source.frame_queue(MediaKind::Audio).is_none());
    source.stop()?;
    assert_eq!(setup.log.lock().decoders_closed, 1);
    Ok(())
}

#[test]
fn missing_input_fails_open() {
    let setup = MockSetup::default();
    let mut source = Source::new(SourceConfig::new("/nonexistent/in.mp4"), &setup.backends());
    let err = source.open().unwrap_err();
    assert!(matches!(err, PipelineError::Io { .. }));
    assert_eq!(source.state(), SourceState::Idle);
    assert!(matches!(
        source.start(),
        Err(PipelineError::InvalidState(_))
    ));
}

#[test]
fn producer_follows_presentation_clock() -> anyhow::Result<()> {
    let setup = MockSetup::default();
    let mut source = Source::new(SourceConfig::new("in.mp4"), &setup.backends());
    source.open()?;
    source.start()?;

    assert_eq!(source.get_image(0)?.unwrap().data()[0], 0);
    assert_eq!(source.get_image(39)?.unwrap().data()[0], 0);
    let image = source.get_image(85)?.unwrap();
    assert_eq!(image.data()[0], 2);
    assert_eq!(image.pts(), Some(80));
    // past the end the last image repeats
    assert_eq!(source.get_image(60_000)?.unwrap().data()[0], 9);
    assert_eq!(source.get_image(70_000)?.unwrap().data()[0], 9);

    let mut samples = 0;
    while source.get_sample()?.is_some() {
        samples += 1;
    }
    assert_eq!(samples, 6);
    source.stop()?;
    Ok(())
}
