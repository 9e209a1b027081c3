use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

use interop_decode::scripted::{FrameSpec, ScriptedDecoder, Step, plane_fill};
use interop_sample::{
    PacketQueue, PayloadMode, ProviderConfig, Sample, StreamState, VideoSampleProvider,
};
use interop_transform::{AdapterConfig, PlaneSpan};
use interop_types::{Error, Packet, PixelFormat, PropertyKey, Pts};

fn packets(count: usize) -> VecDeque<Packet> {
    (0..count)
        .map(|n| Packet::new(0, vec![n as u8; 16]).with_pts(n as i64 * 3000))
        .collect()
}

fn one_frame_each(count: usize) -> Vec<Step> {
    (0..count)
        .map(|n| Step::Emit(vec![FrameSpec::new().with_pts(n as i64 * 3000).with_duration(3000)]))
        .collect()
}

fn collect<S: interop_sample::PacketSource>(
    provider: &mut VideoSampleProvider<ScriptedDecoder, S>,
) -> Vec<Sample> {
    let mut samples = Vec::new();
    while let Some(sample) = provider.get_next_sample().unwrap() {
        samples.push(sample);
    }
    samples
}

#[test]
fn buffered_then_timed_then_untimed() {
    let decoder = ScriptedDecoder::new(PixelFormat::Yuv420p, 16, 16).with_script(vec![
        Step::Buffer,
        Step::Emit(vec![FrameSpec::new().with_pts(3000).with_duration(1500)]),
        Step::Emit(vec![FrameSpec::new()]),
    ]);
    let mut provider =
        VideoSampleProvider::open(decoder, packets(3), ProviderConfig::default()).unwrap();
    assert_eq!(provider.state(), StreamState::ResourcesAllocated);

    let first = provider.get_next_sample().unwrap().unwrap();
    assert_eq!(first.pts, Some(Pts(3000)));
    assert_eq!(first.duration, 1500);
    assert_eq!(provider.state(), StreamState::Decoding);

    let second = provider.get_next_sample().unwrap().unwrap();
    assert_eq!(second.pts, None);
    assert_eq!(second.presentation_time(), None);

    assert!(provider.get_next_sample().unwrap().is_none());
    assert_eq!(provider.state(), StreamState::Draining);
    // End of stream is sticky.
    assert!(provider.get_next_sample().unwrap().is_none());

    assert_eq!(provider.first_timing(), Some((Pts(3000), 1500)));
    assert_eq!(provider.decoder().packets_received(), 3);
}

#[test]
fn drains_frames_buffered_at_end_of_stream() {
    let decoder = ScriptedDecoder::new(PixelFormat::Yuv420p, 16, 16).with_script(vec![
        Step::Emit(vec![
            FrameSpec::new().with_pts(0),
            FrameSpec::new().with_pts(3000),
            FrameSpec::new().with_pts(6000),
        ]),
    ]);
    let mut provider =
        VideoSampleProvider::open(decoder, packets(1), ProviderConfig::default()).unwrap();

    let pts: Vec<_> = collect(&mut provider).iter().map(|s| s.pts).collect();
    assert_eq!(pts, [Some(Pts(0)), Some(Pts(3000)), Some(Pts(6000))]);
}

#[test]
fn copies_planar_frames() {
    let decoder = ScriptedDecoder::new(PixelFormat::Yuv420p, 30, 17).with_script(one_frame_each(2));
    let mut provider =
        VideoSampleProvider::open(decoder, packets(2), ProviderConfig::default()).unwrap();
    assert_eq!(provider.output_format(), PixelFormat::Yuv420p);

    let samples = collect(&mut provider);
    assert_eq!(samples.len(), 2);
    for (n, sample) in samples.iter().enumerate() {
        assert!(!sample.payload.is_zero_copy());
        assert_eq!(sample.format, PixelFormat::Yuv420p);
        assert_eq!((sample.width, sample.height), (30, 17));
        assert_eq!(
            sample.payload.len(),
            sample.layout.iter().map(PlaneSpan::len).sum::<usize>()
        );
        assert!(sample.plane(0).unwrap().iter().all(|&b| b == plane_fill(n, 0)));
        assert!(sample.plane(2).unwrap().iter().all(|&b| b == plane_fill(n, 2)));
    }
}

#[test]
fn converts_non_planar_formats() {
    let decoder = ScriptedDecoder::new(PixelFormat::Yuv422p, 8, 4).with_script(one_frame_each(1));
    let mut provider =
        VideoSampleProvider::open(decoder, packets(1), ProviderConfig::default()).unwrap();
    assert_eq!(provider.output_format(), PixelFormat::Nv12);

    let sample = provider.get_next_sample().unwrap().unwrap();
    assert_eq!(sample.format, PixelFormat::Nv12);
    assert_eq!(sample.payload.len(), 8 * 4 + 8 * 2);
    assert_eq!(sample.layout.len(), 2);
}

#[test]
fn every_known_layout_falls_back_to_nv12() {
    for format in [
        PixelFormat::Rgb24,
        PixelFormat::Bgr24,
        PixelFormat::Rgba,
        PixelFormat::Bgra,
        PixelFormat::Yuv420p10,
        PixelFormat::P010le,
        PixelFormat::Gray8,
        PixelFormat::Nv12,
    ] {
        let decoder = ScriptedDecoder::new(format, 10, 6).with_script(one_frame_each(1));
        let mut provider =
            VideoSampleProvider::open(decoder, packets(1), ProviderConfig::default())
                .unwrap_or_else(|e| panic!("{format:?}: {e}"));
        assert_eq!(provider.output_format(), PixelFormat::Nv12);

        let sample = provider.get_next_sample().unwrap().unwrap();
        assert_eq!(sample.payload.len(), 10 * 6 + 10 * 3, "{format:?}");
    }
}

#[test]
fn reports_field_order() {
    let decoder = ScriptedDecoder::new(PixelFormat::Yuv420p, 16, 16).with_script(vec![
        Step::Emit(vec![FrameSpec::new().interlaced(true)]),
        Step::Emit(vec![FrameSpec::new().interlaced(false)]),
        Step::Emit(vec![FrameSpec::new()]),
    ]);
    let mut provider =
        VideoSampleProvider::open(decoder, packets(3), ProviderConfig::default()).unwrap();
    let samples = collect(&mut provider);

    let fields: Vec<_> = samples
        .iter()
        .map(|s| {
            (
                s.properties.get_bool(&PropertyKey::Interlaced),
                s.properties.get_bool(&PropertyKey::BottomFieldFirst),
                s.properties.get_bool(&PropertyKey::RepeatFirstField),
            )
        })
        .collect();
    assert_eq!(
        fields,
        [
            (Some(true), Some(false), Some(false)),
            (Some(true), Some(true), Some(false)),
            (Some(false), None, None),
        ]
    );
}

#[test]
fn hands_off_pooled_memory() {
    let decoder = ScriptedDecoder::new(PixelFormat::Yuv420p, 30, 17)
        .with_external_buffers()
        .with_script(one_frame_each(3));
    let config = ProviderConfig::new().with_payload(PayloadMode::HandOff);
    let mut provider = VideoSampleProvider::open(decoder, packets(3), config).unwrap();
    assert!(provider.decoder().has_allocator());

    let first = provider.get_next_sample().unwrap().unwrap();
    assert!(first.payload.is_zero_copy());
    assert_eq!(first.layout[0], PlaneSpan { offset: 0, stride: 32, rows: 17 });
    assert_eq!(first.plane(1).unwrap()[0], plane_fill(0, 1));

    let pool = provider.adapter().allocator().unwrap().pool().unwrap();
    assert_eq!(pool.stats().outstanding(), 1);

    // The consumer owns the memory, wherever it releases it.
    thread::spawn(move || drop(first)).join().unwrap();
    assert_eq!(pool.stats().outstanding(), 0);

    let second = provider.get_next_sample().unwrap().unwrap();
    assert!(second.payload.is_zero_copy());
    // Reclaimed chunk reused rather than a new one allocated.
    assert_eq!(pool.stats().allocated, 1);

    let third = provider.get_next_sample().unwrap().unwrap();
    assert_eq!(pool.stats().allocated, 2);
    drop((second, third));
    assert_eq!(pool.stats().available, 2);
}

#[test]
fn copy_mode_returns_chunks_immediately() {
    let decoder = ScriptedDecoder::new(PixelFormat::Yuv420p, 16, 16)
        .with_external_buffers()
        .with_script(one_frame_each(2));
    let mut provider =
        VideoSampleProvider::open(decoder, packets(2), ProviderConfig::default()).unwrap();

    let samples = collect(&mut provider);
    assert_eq!(samples.len(), 2);
    assert!(samples.iter().all(|s| !s.payload.is_zero_copy()));

    let pool = provider.adapter().allocator().unwrap().pool().unwrap();
    assert_eq!(pool.stats().outstanding(), 0);
    assert_eq!(pool.stats().allocated, 1);
}

#[test]
fn skips_other_streams() {
    let source: VecDeque<Packet> = (0..6)
        .map(|n| Packet::new(n % 2, vec![n as u8]))
        .collect();
    let decoder =
        ScriptedDecoder::new(PixelFormat::Yuv420p, 16, 16).with_script(one_frame_each(3));
    let config = ProviderConfig::new().with_stream_index(1);
    let mut provider = VideoSampleProvider::open(decoder, source, config).unwrap();

    assert_eq!(collect(&mut provider).len(), 3);
    assert_eq!(provider.decoder().packets_received(), 3);
}

#[test]
fn pending_input_is_fatal() {
    let decoder = ScriptedDecoder::new(PixelFormat::Yuv420p, 16, 16).holding_input();
    let mut provider =
        VideoSampleProvider::open(decoder, packets(2), ProviderConfig::default()).unwrap();

    let err = provider.get_next_sample().unwrap_err();
    assert!(matches!(err, Error::Ordering(_)));
    assert!(err.is_fatal());
    assert_eq!(provider.state(), StreamState::Failed);
}

#[test]
fn refused_packet_stops_the_stream() {
    let decoder = ScriptedDecoder::new(PixelFormat::Yuv420p, 16, 16).with_script(vec![
        Step::Refuse,
        Step::Emit(vec![FrameSpec::new().with_pts(0)]),
        Step::Emit(vec![FrameSpec::new().with_pts(3000)]),
    ]);
    let mut provider =
        VideoSampleProvider::open(decoder, packets(3), ProviderConfig::default()).unwrap();

    assert!(matches!(provider.get_next_sample(), Err(Error::Ordering(_))));
    assert_eq!(provider.state(), StreamState::Failed);

    // The refused packet is not skipped over.
    assert!(matches!(provider.get_next_sample(), Err(Error::Decode(_))));
    assert_eq!(provider.source_mut().len(), 2);
    assert_eq!(provider.decoder().frames_emitted(), 0);

    provider.flush().unwrap();
    assert_eq!(provider.get_next_sample().unwrap().unwrap().pts, Some(Pts(0)));
}

#[test]
fn decode_failure_is_sticky() {
    let decoder = ScriptedDecoder::new(PixelFormat::Yuv420p, 16, 16)
        .with_script(vec![Step::Reject("corrupt slice".into())]);
    let mut provider =
        VideoSampleProvider::open(decoder, packets(2), ProviderConfig::default()).unwrap();

    assert!(matches!(provider.get_next_sample(), Err(Error::Decode(_))));
    assert!(matches!(provider.get_next_sample(), Err(Error::Decode(_))));
    assert_eq!(provider.state(), StreamState::Failed);
}

#[test]
fn setup_failure_closes_provider() {
    // No converter can be built for an empty picture.
    let decoder = ScriptedDecoder::new(PixelFormat::Yuv444p, 0, 0);
    let err = VideoSampleProvider::open(decoder, packets(1), ProviderConfig::default())
        .unwrap_err();
    assert!(matches!(err, Error::Resource(_)));

    let decoder = ScriptedDecoder::new(PixelFormat::Yuv444p, 0, 0);
    let mut provider = VideoSampleProvider::new(decoder, packets(1), ProviderConfig::default());
    assert!(matches!(
        provider.get_next_sample(),
        Err(Error::InvalidState(_))
    ));
    assert!(provider.initialize().is_err());
    assert_eq!(provider.state(), StreamState::Closed);
}

#[test]
fn close_is_terminal_and_idempotent() {
    let decoder = ScriptedDecoder::new(PixelFormat::Yuv444p, 8, 8).with_script(one_frame_each(2));
    let mut provider =
        VideoSampleProvider::open(decoder, packets(2), ProviderConfig::default()).unwrap();
    assert!(provider.get_next_sample().unwrap().is_some());

    provider.close();
    provider.close();
    assert_eq!(provider.state(), StreamState::Closed);
    assert!(matches!(provider.get_next_sample(), Err(Error::Closed)));
    assert!(matches!(provider.flush(), Err(Error::Closed)));
}

#[test]
fn flush_discards_buffered_output() {
    let queue = Arc::new(PacketQueue::new(4));
    let decoder = ScriptedDecoder::new(PixelFormat::Yuv420p, 16, 16).with_script(vec![
        Step::Emit(vec![FrameSpec::new().with_pts(0), FrameSpec::new().with_pts(3000)]),
        Step::Emit(vec![FrameSpec::new().with_pts(90_000)]),
    ]);
    let mut provider =
        VideoSampleProvider::open(decoder, queue.clone(), ProviderConfig::default()).unwrap();

    queue.push(Packet::new(0, vec![1]));
    assert_eq!(provider.get_next_sample().unwrap().unwrap().pts, Some(Pts(0)));

    // Seek: the second buffered frame belongs to the old position.
    provider.flush().unwrap();
    assert_eq!(provider.state(), StreamState::ResourcesAllocated);
    assert_eq!(provider.first_timing(), None);

    queue.push(Packet::new(0, vec![2]));
    queue.close();
    let samples = collect(&mut provider);
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].pts, Some(Pts(90_000)));
}

#[test]
fn decodes_from_a_demux_thread() {
    let queue = Arc::new(PacketQueue::new(2));
    let decoder =
        ScriptedDecoder::new(PixelFormat::Yuv420p, 16, 16).with_script(one_frame_each(8));
    let mut provider = VideoSampleProvider::open(
        decoder,
        queue.clone(),
        ProviderConfig::new().with_adapter(AdapterConfig::new().with_max_pool_chunks(4)),
    )
    .unwrap();

    let demux = thread::spawn(move || {
        for packet in packets(8) {
            assert!(queue.push(packet));
        }
        queue.close();
    });

    let samples = collect(&mut provider);
    demux.join().unwrap();

    let pts: Vec<_> = samples.iter().filter_map(|s| s.pts).collect();
    assert_eq!(pts, (0..8).map(|n| Pts(n * 3000)).collect::<Vec<_>>());
}
