//! Parser and extraction tests against generated frames.
//!
//! Tests verify:
//! - Tile-part positions for a known layout
//! - Raw and boxed frames index identically
//! - Chunking does not change the result
//! - Early cancellation ignores trailing bytes
//! - Unknown signatures fail before any tile-part is parsed

use bytes::Bytes;

use tlm_proxy::error::CodestreamError;
use tlm_proxy::format::{FileFormat, Parser, ParserState, ProgressionOrder};
use tlm_proxy::frame::{extract_levels, extract_range, LevelCollector, LevelWindow};

use super::test_utils::{
    boxed, codestream, scenario_codestream, HEADER_LENGTH, TILE_PART_OVERHEAD,
};

// =============================================================================
// Known Layout
// =============================================================================

#[test]
fn test_scenario_tile_part_positions() {
    let data = scenario_codestream();
    let parser = Parser::parse_all(&data).unwrap();

    let positions: Vec<usize> = parser.tile_parts().iter().map(|tp| tp.position).collect();
    assert_eq!(positions, vec![100, 4100, 6100]);
    assert_eq!(parser.tile_parts()[0].length, 4000);
    assert!(parser.reached_eoc());

    let (parsed, _) = parser.into_parsed();
    let level0 = extract_range(&parsed.codestream, &parsed.tile_parts, LevelWindow::single(0));
    assert_eq!(&level0[..], &data[..4100]);
}

#[test]
fn test_header_summary() {
    let data = scenario_codestream();
    let parser = Parser::parse_all(&data).unwrap();
    let header = parser.header().unwrap();

    assert_eq!(header.length, HEADER_LENGTH);
    assert_eq!((header.width(), header.height()), (256, 256));
    assert_eq!(header.bit_depth(), 8);
    assert!(!header.is_signed());
    assert_eq!(header.component_count(), 1);
    assert_eq!(header.decomposition_levels(), 5);
    assert!(header.is_reversible());
    assert_eq!(header.progression_order(), ProgressionOrder::Rpcl);
    assert_eq!(header.tile_count(), 1);
    assert_eq!(header.comments, vec!["tlm-proxy test".to_string()]);
}

#[test]
fn test_window_beyond_levels_is_empty() {
    let data = Bytes::from(scenario_codestream());
    let parser = Parser::parse_all(&data).unwrap();
    let index = parser.tile_parts();

    assert!(extract_range(&data, index, LevelWindow::new(5, None)).is_empty());
    assert!(extract_range(&data, index, LevelWindow::new(3, Some(4))).is_empty());
    assert_eq!(
        extract_range(&data, index, LevelWindow::new(2, Some(9))).len(),
        1000 + 2
    );
}

#[test]
fn test_single_levels_concatenate_to_range() {
    let data = Bytes::from(codestream(&[500, 300, 200, 100]));
    let parser = Parser::parse_all(&data).unwrap();
    let index = parser.tile_parts();

    let levels = extract_levels(&data, index);
    assert_eq!(levels.len(), 4);

    for end in 0..4u32 {
        let joined: Vec<u8> = levels[..=end as usize]
            .iter()
            .flat_map(|level| level.iter().copied())
            .collect();
        let range = extract_range(&data, index, LevelWindow::new(0, Some(end)));
        assert_eq!(joined, range.to_vec(), "levels 0..={}", end);
    }

    let tail: Vec<u8> = levels[1..].iter().flat_map(|l| l.iter().copied()).collect();
    assert_eq!(
        tail,
        extract_range(&data, index, LevelWindow::new(1, Some(3))).to_vec()
    );
}

// =============================================================================
// Containers and Chunking
// =============================================================================

#[test]
fn test_boxed_and_raw_give_same_levels() {
    let cs = scenario_codestream();
    let raw = Parser::parse_all(&cs).unwrap();

    for explicit in [true, false] {
        let parser = Parser::parse_all(&boxed(&cs, explicit)).unwrap();
        assert_eq!(parser.format(), Some(FileFormat::BoxedCodestream));
        assert_eq!(parser.tile_parts(), raw.tile_parts());

        let (parsed, _) = parser.into_parsed();
        assert_eq!(&parsed.codestream[..], &cs[..]);
        assert!(parsed.complete);
    }
}

#[test]
fn test_byte_at_a_time_matches_single_write() {
    let data = boxed(&codestream(&[40, 14, 90]), true);
    let whole = Parser::parse_all(&data).unwrap();

    let mut parser = Parser::new();
    for byte in &data {
        if parser.is_complete() {
            break;
        }
        parser.write(std::slice::from_ref(byte)).unwrap();
    }
    assert!(parser.reached_eoc());
    assert_eq!(parser.tile_parts(), whole.tile_parts());
    assert_eq!(parser.codestream(), whole.codestream());
}

#[test]
fn test_empty_tile_part_payload() {
    let data = codestream(&[TILE_PART_OVERHEAD, TILE_PART_OVERHEAD]);
    let parser = Parser::parse_all(&data).unwrap();
    assert_eq!(parser.tile_parts().len(), 2);
    assert_eq!(parser.tile_parts()[1].position, HEADER_LENGTH + TILE_PART_OVERHEAD);
}

// =============================================================================
// Cancellation and Errors
// =============================================================================

#[test]
fn test_cancellation_ignores_trailing_garbage() {
    let mut data = codestream(&[200, 100]);
    // Corrupt everything after the second tile-part
    data.truncate(HEADER_LENGTH + 300);
    data.extend_from_slice(&[0x12, 0x34, 0x56, 0x78, 0x9A]);

    let mut parser = Parser::with_observer(LevelCollector::new(LevelWindow::new(0, Some(1))));
    let state = parser.write(&data).unwrap();

    assert_eq!(state, ParserState::Cancelled);
    assert_eq!(parser.tile_parts().len(), 2);
    assert!(parser.error().is_none());
    assert!(parser.finish().is_ok());
    assert!(matches!(
        parser.write(&[0xFF]),
        Err(CodestreamError::WriteAfterCancel)
    ));
}

#[test]
fn test_same_garbage_fails_without_cancellation() {
    let mut data = codestream(&[200, 100]);
    data.truncate(HEADER_LENGTH + 300);
    data.extend_from_slice(&[0x12, 0x34, 0x56, 0x78, 0x9A]);

    let mut parser = Parser::with_observer(LevelCollector::all_levels());
    let err = parser.write(&data).unwrap_err();
    assert!(matches!(err, CodestreamError::InvalidMarkerPrefix { .. }));
    assert_eq!(parser.tile_parts().len(), 2);
}

#[test]
fn test_unknown_signature_fails_immediately() {
    let mut data = b"GIF89a".to_vec();
    data.extend(scenario_codestream());

    let mut parser = Parser::new();
    let err = parser.write(&data).unwrap_err();
    assert_eq!(err, CodestreamError::NotHtj2k);
    assert!(parser.tile_parts().is_empty());
    assert!(parser.header().is_none());
}

#[test]
fn test_truncated_frame_reports_on_finish() {
    let data = scenario_codestream();
    let mut parser = Parser::new();
    parser.write(&data[..5000]).unwrap();
    assert_eq!(parser.tile_parts().len(), 1);
    assert!(parser.finish().is_err());
}
