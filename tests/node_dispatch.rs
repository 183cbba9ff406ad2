use image::{Rgb, RgbImage};

use image_rotate::{
    decode_frame, encode_raw, Dispatch, Encoding, FrameHeader, FrameSink, FrameTransformer,
    ParameterStore, RotateNode, Stamp, TransformParameters, DEFAULT_PARAMETER_TOPIC,
};

const QUAD1_IN: &str = "camera/quad1/image_rect_color";
const QUAD3_IN: &str = "camera/quad3/image_rect_color";
const GRAY: Rgb<u8> = Rgb([128, 128, 128]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const GREEN: Rgb<u8> = Rgb([0, 255, 0]);

#[derive(Default)]
struct RecordingSink {
    published: Vec<(String, Vec<u8>)>,
}

impl FrameSink for RecordingSink {
    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> anyhow::Result<()> {
        self.published.push((topic.to_string(), payload));
        Ok(())
    }
}

struct FailingSink;

impl FrameSink for FailingSink {
    fn publish(&mut self, topic: &str, _payload: Vec<u8>) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("broker queue full for {}", topic))
    }
}

fn node() -> RotateNode {
    RotateNode::new(
        FrameTransformer::default(),
        ParameterStore::default(),
        DEFAULT_PARAMETER_TOPIC,
    )
}

fn gray_message(tag: &str, seq: u32) -> Vec<u8> {
    let header = FrameHeader {
        seq,
        stamp: Stamp {
            secs: 1_700_000_000,
            nsecs: 250,
        },
        frame_id: tag.to_string(),
    };
    encode_raw(&header, Encoding::Mono8, 4, 4, 4, &[128u8; 16]).expect("encode message")
}

#[test]
fn malformed_frame_is_dropped_without_publishing() {
    let mut node = node();
    let mut sink = RecordingSink::default();

    let dispatch = node.handle_message(QUAD1_IN, b"\x00\x00\x00\x05{bad}", &mut sink);

    assert!(matches!(dispatch, Dispatch::Dropped { .. }));
    assert!(sink.published.is_empty());
    assert_eq!(node.stats().frames_received, 1);
    assert_eq!(node.stats().frames_dropped, 1);

    // The node keeps serving after a bad frame.
    let dispatch = node.handle_message(QUAD1_IN, &gray_message("quad1", 2), &mut sink);
    assert!(matches!(dispatch, Dispatch::Published { .. }));
    assert_eq!(sink.published.len(), 1);
}

#[test]
fn frames_route_to_their_source_output_topic() {
    let mut node = node();
    let mut sink = RecordingSink::default();

    let quad1 = node.handle_message(QUAD1_IN, &gray_message("quad1", 1), &mut sink);
    let quad3 = node.handle_message(QUAD3_IN, &gray_message("quad3", 2), &mut sink);

    assert_eq!(
        quad1,
        Dispatch::Published {
            topic: "camera/quad1/image_rotated".to_string()
        }
    );
    assert_eq!(
        quad3,
        Dispatch::Published {
            topic: "camera/quad3/image_rotated".to_string()
        }
    );
    assert_eq!(node.stats().frames_published, 2);
}

#[test]
fn unknown_tag_uses_default_route() {
    let mut node = node();
    let mut sink = RecordingSink::default();

    let dispatch = node.handle_message(QUAD1_IN, &gray_message("quad7", 1), &mut sink);

    assert_eq!(
        dispatch,
        Dispatch::Published {
            topic: "camera/quad3/image_rotated".to_string()
        }
    );
}

#[test]
fn published_frame_keeps_header_and_is_framed_in_white() {
    let mut node = node();
    let mut sink = RecordingSink::default();

    node.handle_message(QUAD3_IN, &gray_message("quad3", 42), &mut sink);

    let (_, payload) = &sink.published[0];
    let frame = decode_frame(payload).expect("decode published frame");
    assert_eq!(frame.header.seq, 42);
    assert_eq!(frame.header.stamp.secs, 1_700_000_000);
    assert_eq!(frame.header.stamp.nsecs, 250);
    assert_eq!(frame.header.frame_id, "quad3");

    assert_eq!(frame.image.dimensions(), (6, 5));
    assert_eq!(*frame.image.get_pixel(0, 0), WHITE);
    assert_eq!(*frame.image.get_pixel(5, 4), WHITE);
    assert_eq!(*frame.image.get_pixel(1, 1), GRAY);
    assert_eq!(*frame.image.get_pixel(4, 4), GRAY);
}

#[test]
fn parameter_update_applies_to_following_frames() {
    let mut node = node();
    let mut sink = RecordingSink::default();

    let update = br#"{"angle":0.0,"shift_a":3,"shift_b":0,"epi_1":2,"epi_2":-10,"epi_3":100}"#;
    let dispatch = node.handle_message(DEFAULT_PARAMETER_TOPIC, update, &mut sink);
    assert_eq!(dispatch, Dispatch::ParametersUpdated);
    assert_eq!(node.parameters().snapshot().shift_a, 3);

    node.handle_message(QUAD1_IN, &gray_message("quad1", 1), &mut sink);
    node.handle_message(QUAD3_IN, &gray_message("quad3", 2), &mut sink);

    let quad1 = decode_frame(&sink.published[0].1).expect("decode quad1").image;
    let quad3 = decode_frame(&sink.published[1].1).expect("decode quad3").image;

    // Only quad1 is shifted.
    assert_eq!(quad1.dimensions(), (6, 8));
    assert_eq!(quad3.dimensions(), (6, 5));

    // Line at row 2 covers rows 0..=4 across the full width.
    for y in 0..5 {
        assert_eq!(*quad1.get_pixel(0, y), GREEN, "row {}", y);
        assert_eq!(*quad1.get_pixel(5, y), GREEN, "row {}", y);
    }
    assert_eq!(*quad1.get_pixel(0, 5), WHITE);
    assert_eq!(*quad1.get_pixel(2, 6), GRAY);
}

#[test]
fn rejected_update_keeps_previous_parameters() {
    let mut node = node();
    let mut sink = RecordingSink::default();

    let good = br#"{"angle":15.0,"shift_a":4,"shift_b":2,"epi_1":10,"epi_2":20,"epi_3":30}"#;
    node.handle_message(DEFAULT_PARAMETER_TOPIC, good, &mut sink);
    let negative = br#"{"angle":15.0,"shift_a":-4,"shift_b":2,"epi_1":10,"epi_2":20,"epi_3":30}"#;
    let dispatch = node.handle_message(DEFAULT_PARAMETER_TOPIC, negative, &mut sink);

    assert!(matches!(dispatch, Dispatch::Dropped { .. }));
    let params = node.parameters().snapshot();
    assert_eq!(
        params,
        TransformParameters {
            angle: 15.0,
            shift_a: 4,
            shift_b: 2,
            epi_1: 10,
            epi_2: 20,
            epi_3: 30,
        }
    );
    assert_eq!(node.stats().parameter_updates, 1);
    assert_eq!(node.stats().parameter_rejections, 1);
}

#[test]
fn shared_store_sees_external_replacement() {
    let store = ParameterStore::default();
    let mut node = RotateNode::new(
        FrameTransformer::default(),
        store.clone(),
        DEFAULT_PARAMETER_TOPIC,
    );
    let mut sink = RecordingSink::default();

    store.replace(TransformParameters {
        shift_b: 2,
        ..TransformParameters::default()
    });
    node.handle_message(QUAD3_IN, &gray_message("quad3", 1), &mut sink);

    let image = decode_frame(&sink.published[0].1).expect("decode").image;
    assert_eq!(image.dimensions(), (6, 7));
}

#[test]
fn rotated_frame_grows_canvas() {
    let mut node = node();
    let mut sink = RecordingSink::default();
    let update = br#"{"angle":90.0,"shift_a":0,"shift_b":0,"epi_1":-10,"epi_2":-10,"epi_3":-10}"#;
    node.handle_message(DEFAULT_PARAMETER_TOPIC, update, &mut sink);

    let header = FrameHeader::new("quad3");
    let src = RgbImage::from_pixel(8, 4, GRAY);
    let message = encode_raw(&header, Encoding::Rgb8, 8, 4, 24, src.as_raw()).expect("encode");
    node.handle_message(QUAD3_IN, &message, &mut sink);

    let image = decode_frame(&sink.published[0].1).expect("decode").image;
    assert_eq!(image.dimensions(), (4 + 2, 8 + 1));
}

#[test]
fn publish_failure_counts_as_drop() {
    let mut node = node();
    let dispatch = node.handle_message(QUAD1_IN, &gray_message("quad1", 1), &mut FailingSink);

    assert!(matches!(dispatch, Dispatch::Dropped { .. }));
    assert_eq!(node.stats().frames_dropped, 1);
    assert_eq!(node.stats().frames_published, 0);
}

#[test]
fn out_of_range_shift_update_is_rejected_and_frames_keep_flowing() {
    let mut node = node();
    let mut sink = RecordingSink::default();

    let update =
        br#"{"angle":0.0,"shift_a":4294967295,"shift_b":0,"epi_1":120,"epi_2":240,"epi_3":360}"#;
    let dispatch = node.handle_message(DEFAULT_PARAMETER_TOPIC, update, &mut sink);
    assert!(matches!(dispatch, Dispatch::Dropped { .. }));
    assert_eq!(node.parameters().snapshot(), TransformParameters::default());

    let dispatch = node.handle_message(QUAD1_IN, &gray_message("quad1", 1), &mut sink);
    assert!(matches!(dispatch, Dispatch::Published { .. }));
}

#[test]
fn extreme_reference_rows_do_not_stop_the_node() {
    let mut node = node();
    let mut sink = RecordingSink::default();

    let update =
        br#"{"angle":0.0,"shift_a":0,"shift_b":0,"epi_1":-2147483648,"epi_2":2147483647,"epi_3":1}"#;
    assert_eq!(
        node.handle_message(DEFAULT_PARAMETER_TOPIC, update, &mut sink),
        Dispatch::ParametersUpdated
    );
    node.handle_message(QUAD3_IN, &gray_message("quad3", 1), &mut sink);

    let image = decode_frame(&sink.published[0].1).expect("decode").image;
    // Only the line at row 1 lands on the 6x5 canvas: rows 0..=3.
    assert_eq!(*image.get_pixel(0, 3), Rgb([255, 0, 0]));
    assert_eq!(*image.get_pixel(2, 4), GRAY);
}

#[test]
fn frame_over_payload_limit_is_dropped_before_publishing() {
    let mut node = node().with_max_payload_bytes(64);
    let mut sink = RecordingSink::default();

    let dispatch = node.handle_message(QUAD1_IN, &gray_message("quad1", 1), &mut sink);

    match dispatch {
        Dispatch::Dropped { reason } => assert!(reason.contains("64 byte limit"), "{}", reason),
        other => panic!("expected drop, got {:?}", other),
    }
    assert!(sink.published.is_empty());
    assert_eq!(node.stats().frames_dropped, 1);
}
