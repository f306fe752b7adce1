use super::*;
use crate::obu::ObuType;
use crate::test_util::{BitWriter, SeqParams, obu, sequence_header_obu, sequence_header_payload};

fn parse(params: &SeqParams) -> Option<SequenceHeader> {
    let data = sequence_header_obu(params);
    parse_sequence_header(&data, 0, data.len())
}

#[test]
fn test_main_profile_defaults() {
    let seq = parse(&SeqParams::default()).unwrap();
    assert_eq!(seq.profile, 0);
    assert_eq!(seq.max_frame_width, 1920);
    assert_eq!(seq.max_frame_height, 1080);
    assert_eq!(seq.frame_width_bits, 16);
    assert_eq!(seq.operating_points.len(), 1);
    assert_eq!(seq.operating_points[0].major_level, 4);
    assert_eq!(seq.operating_points[0].minor_level, 0);
    assert_eq!(seq.operating_points[0].tier, 1);
    assert_eq!(seq.level_idc(), 40);
    assert!(seq.enable_order_hint);
    assert_eq!(seq.order_hint_bits, 7);
    assert_eq!(seq.screen_content_tools, ADAPTIVE);
    assert_eq!(seq.force_integer_mv, ADAPTIVE);
    assert_eq!(seq.color.bit_depth, 8);
    assert_eq!(seq.color.layout, PixelLayout::I420);
    assert_eq!(seq.color.chroma_sample_position, 1);
    assert!(seq.color.full_range);
    assert_eq!(seq.color.color_primaries, COLOR_PRIMARIES_UNSPECIFIED);
    assert!(!seq.film_grain_params_present);
    assert_eq!(seq.codec_string(), "av01.0.08H.08");
}

#[test]
fn test_reduced_still_picture() {
    let params = SeqParams {
        still_picture: true,
        reduced: true,
        seq_level_idx: 5,
        ..SeqParams::default()
    };
    let seq = parse(&params).unwrap();
    assert!(seq.still_picture);
    assert!(seq.reduced_still_picture_header);
    assert_eq!(seq.operating_points.len(), 1);
    assert_eq!(seq.operating_points[0].major_level, 3);
    assert_eq!(seq.operating_points[0].minor_level, 1);
    assert_eq!(seq.screen_content_tools, ADAPTIVE);
    assert_eq!(seq.force_integer_mv, ADAPTIVE);
    assert!(!seq.frame_id_numbers_present);
    assert!(!seq.enable_order_hint);
    assert_eq!(seq.order_hint_bits, 0);
    assert_eq!(seq.timing_info, None);
}

#[test]
fn test_reduced_without_still_picture_is_rejected() {
    let params = SeqParams {
        still_picture: false,
        reduced: true,
        ..SeqParams::default()
    };
    assert!(parse(&params).is_none());
}

#[test]
fn test_profile_3_is_rejected() {
    let mut w = BitWriter::new();
    w.put(3, 3);
    w.put(0, 29);
    let data = obu(ObuType::SequenceHeader, &w.finish());
    assert!(parse_sequence_header(&data, 0, data.len()).is_none());

    let mut payload = sequence_header_payload(&SeqParams::default());
    payload[0] |= 0b0110_0000;
    let data = obu(ObuType::SequenceHeader, &payload);
    assert!(parse_sequence_header(&data, 0, data.len()).is_none());
}

#[test]
fn test_not_a_sequence_header_obu() {
    let payload = sequence_header_payload(&SeqParams::default());
    let data = obu(ObuType::Metadata, &payload);
    assert!(parse_sequence_header(&data, 0, data.len()).is_none());
}

#[test]
fn test_truncated_payload_is_rejected() {
    let data = sequence_header_obu(&SeqParams::default());
    for cut in 1..data.len() - 2 {
        assert!(
            parse_sequence_header(&data[..cut], 0, cut).is_none(),
            "cut at {}",
            cut
        );
    }
}

#[test]
fn test_parse_at_offset() {
    let mut data = vec![0xff; 5];
    data.extend(sequence_header_obu(&SeqParams::default()));
    let len = data.len();
    let seq = parse_sequence_header(&data, 5, len).unwrap();
    assert_eq!(seq.max_frame_width, 1920);
}

#[test]
fn test_timing_and_decoder_model_cascade() {
    let params = SeqParams {
        timing_info: true,
        equal_picture_interval: Some(0),
        decoder_model: true,
        initial_display_delay: true,
        operating_points: vec![0x103, 0x101],
        ..SeqParams::default()
    };
    let seq = parse(&params).unwrap();
    let timing = seq.timing_info.unwrap();
    assert_eq!(timing.num_units_in_display_tick, 1001);
    assert_eq!(timing.time_scale, 60000);
    assert_eq!(timing.num_ticks_per_picture, Some(1));
    let rate = seq.frame_rate().unwrap();
    assert!((rate - 59.94).abs() < 0.01);

    let model = seq.decoder_model_info.unwrap();
    assert_eq!(model.buffer_delay_length, 10);
    assert_eq!(model.num_units_in_decoding_tick, 90);
    assert_eq!(model.buffer_removal_time_length, 10);
    assert_eq!(model.frame_presentation_time_length, 8);

    assert_eq!(seq.operating_points.len(), 2);
    for (op, idc) in seq.operating_points.iter().zip([0x103, 0x101]) {
        assert_eq!(op.idc, idc);
        let params = op.decoder_model.unwrap();
        assert_eq!(params.decoder_buffer_delay, 500);
        assert_eq!(params.encoder_buffer_delay, 700);
        assert!(!params.low_delay_mode);
        assert_eq!(op.initial_display_delay, Some(10));
    }
    assert_eq!(seq.max_frame_width, 1920);
    assert_eq!(seq.color.layout, PixelLayout::I420);
}

#[test]
fn test_timing_without_equal_interval() {
    let params = SeqParams {
        timing_info: true,
        ..SeqParams::default()
    };
    let seq = parse(&params).unwrap();
    assert_eq!(seq.timing_info.unwrap().num_ticks_per_picture, None);
    assert_eq!(seq.decoder_model_info, None);
    assert_eq!(seq.frame_rate(), None);
}

#[test]
fn test_many_operating_points() {
    let params = SeqParams {
        operating_points: (0..32).collect(),
        seq_level_idx: 4,
        ..SeqParams::default()
    };
    let seq = parse(&params).unwrap();
    assert_eq!(seq.operating_points.len(), MAX_OPERATING_POINTS);
    assert!(seq.operating_points.iter().all(|op| op.tier == 0));
    assert_eq!(seq.operating_points[31].idc, 31);
    assert_eq!(seq.max_frame_height, 1080);
}

#[test]
fn test_frame_id_lengths() {
    let params = SeqParams {
        frame_id_numbers: true,
        ..SeqParams::default()
    };
    let seq = parse(&params).unwrap();
    assert!(seq.frame_id_numbers_present);
    assert_eq!(seq.delta_frame_id_length, 14);
    assert_eq!(seq.frame_id_length, 15);
}

#[test]
fn test_monochrome() {
    let params = SeqParams {
        mono_chrome: true,
        ..SeqParams::default()
    };
    let seq = parse(&params).unwrap();
    assert!(seq.color.mono_chrome);
    assert_eq!(seq.color.layout, PixelLayout::I400);
    assert!(!seq.color.separate_uv_delta_q);
}

#[test]
fn test_high_profile_is_444() {
    let params = SeqParams {
        profile: 1,
        high_bitdepth: true,
        ..SeqParams::default()
    };
    let seq = parse(&params).unwrap();
    assert_eq!(seq.color.bit_depth, 10);
    assert_eq!(seq.color.layout, PixelLayout::I444);
    assert!(!seq.color.mono_chrome);
}

#[test]
fn test_professional_profile_subsampling() {
    let ten_bit = SeqParams {
        profile: 2,
        high_bitdepth: true,
        ..SeqParams::default()
    };
    let seq = parse(&ten_bit).unwrap();
    assert_eq!(seq.color.bit_depth, 10);
    assert_eq!(seq.color.layout, PixelLayout::I422);

    for (subsampling, layout) in [
        ((true, true), PixelLayout::I420),
        ((true, false), PixelLayout::I422),
        ((false, false), PixelLayout::I444),
    ] {
        let params = SeqParams {
            profile: 2,
            high_bitdepth: true,
            twelve_bit: true,
            subsampling,
            ..SeqParams::default()
        };
        let seq = parse(&params).unwrap();
        assert_eq!(seq.color.bit_depth, 12);
        assert_eq!(seq.color.layout, layout);
        assert_eq!(seq.codec_string(), "av01.2.08H.12");
    }
}

#[test]
fn test_srgb_identity_accepted_for_444_profiles() {
    let srgb = Some((COLOR_PRIMARIES_BT709, TRANSFER_SRGB, MATRIX_IDENTITY));
    let high = SeqParams {
        profile: 1,
        color_description: srgb,
        ..SeqParams::default()
    };
    let seq = parse(&high).unwrap();
    assert!(seq.color.full_range);
    assert_eq!(seq.color.layout, PixelLayout::I444);

    let twelve_bit = SeqParams {
        profile: 2,
        high_bitdepth: true,
        twelve_bit: true,
        color_description: srgb,
        ..SeqParams::default()
    };
    assert_eq!(parse(&twelve_bit).unwrap().color.layout, PixelLayout::I444);
}

// Compatibility corner: BT.709 + sRGB + identity is rejected outright for
// profile 0 and for profile 2 below 12 bits.
#[test]
fn test_srgb_identity_rejected_for_other_profiles() {
    let srgb = Some((COLOR_PRIMARIES_BT709, TRANSFER_SRGB, MATRIX_IDENTITY));
    let main = SeqParams {
        color_description: srgb,
        ..SeqParams::default()
    };
    assert!(parse(&main).is_none());

    let ten_bit = SeqParams {
        profile: 2,
        high_bitdepth: true,
        color_description: srgb,
        ..SeqParams::default()
    };
    assert!(parse(&ten_bit).is_none());

    // any other matrix takes the regular path
    let bt709 = SeqParams {
        color_description: Some((COLOR_PRIMARIES_BT709, TRANSFER_SRGB, 1)),
        ..SeqParams::default()
    };
    let seq = parse(&bt709).unwrap();
    assert_eq!(seq.color.matrix_coefficients, 1);
    assert_eq!(seq.color.layout, PixelLayout::I420);
}

#[test]
fn test_display_lists_key_fields() {
    let seq = parse(&SeqParams::default()).unwrap();
    let text = seq.to_string();
    assert!(text.starts_with("[SEQUENCE_HEADER]\n"));
    assert!(text.contains("width=1920\n"));
    assert!(text.contains("pix_layout=yuv420\n"));
    assert!(text.contains("frame_rate=N/A\n"));
    assert!(text.ends_with("[/SEQUENCE_HEADER]\n"));
}
