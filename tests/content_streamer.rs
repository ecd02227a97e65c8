use std::io::Cursor;
use std::io::Seek;
use std::io::SeekFrom;

use rpi_hub75::content_streamer::HEADER_SIZE;
use rpi_hub75::Canvas;
use rpi_hub75::FrameCanvas;
use rpi_hub75::Hub75Error;
use rpi_hub75::MatrixOptions;
use rpi_hub75::PixelMapper;
use rpi_hub75::PixelMapperRegistry;
use rpi_hub75::RGBMatrix;
use rpi_hub75::StreamReader;
use rpi_hub75::StreamWriter;

fn offscreen(rows: usize, cols: usize) -> RGBMatrix {
    let _ = env_logger::builder().is_test(true).try_init();
    RGBMatrix::builder(MatrixOptions {
        rows,
        cols,
        ..MatrixOptions::default()
    })
    .build_offscreen()
    .unwrap()
}

fn record(frames: &[(&FrameCanvas, u32)]) -> Vec<u8> {
    let mut writer = StreamWriter::new(Vec::new());
    for (frame, hold_time_us) in frames {
        writer.stream(frame, *hold_time_us).unwrap();
    }
    writer.into_inner()
}

/// Only the top left 2x2 pixels of the panel.
struct Corner;

impl PixelMapper for Corner {
    fn name(&self) -> &str {
        "Corner"
    }

    fn size_mapping(&self, _w: usize, _h: usize) -> Result<(usize, usize), Hub75Error> {
        Ok((2, 2))
    }

    fn map_visible_to_matrix(
        &self,
        _w: usize,
        _h: usize,
        x: usize,
        y: usize,
    ) -> Option<(usize, usize)> {
        Some((x, y))
    }
}

#[test]
fn replays_a_red_frame() {
    let mut mappers = PixelMapperRegistry::default();
    mappers.register(|| Box::new(Corner));
    let mut matrix = RGBMatrix::builder(MatrixOptions {
        rows: 8,
        cols: 16,
        pixel_mapper_config: "Corner".to_string(),
        ..MatrixOptions::default()
    })
    .pixel_mappers(mappers)
    .build_offscreen()
    .unwrap();
    assert_eq!((matrix.width(), matrix.height()), (2, 2));

    let mut red = matrix.create_frame_canvas();
    red.fill(255, 0, 0);
    let data = record(&[(&red, 16000)]);

    let mut replayed = matrix.create_frame_canvas();
    let mut reader = StreamReader::new(Cursor::new(data)).unwrap();
    assert_eq!(reader.next_frame(&mut replayed).unwrap(), Some(16000));
    assert_eq!(replayed.serialize(), red.serialize());
    for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
        assert_eq!(replayed.framebuffer().read_pixel_planes(x, y).unwrap(), [2047, 0, 0]);
    }
    assert_eq!(reader.next_frame(&mut replayed).unwrap(), None);
}

#[test]
fn file_header_is_written_once() {
    let mut matrix = offscreen(16, 32);
    let frame = matrix.create_frame_canvas();
    let frame_size = frame.serialize().len();
    let data = record(&[(&frame, 1), (&frame, 2), (&frame, 3)]);
    assert_eq!(data.len(), HEADER_SIZE + 3 * (HEADER_SIZE + frame_size));
    assert_eq!(&data[..4], &0xED0C_5A48u32.to_le_bytes());
    assert_eq!(&data[4..8], &(frame_size as u32).to_le_bytes());
    assert_eq!(&data[8..12], &32u32.to_le_bytes());
    assert_eq!(&data[12..16], &16u32.to_le_bytes());
}

#[test]
fn frames_come_back_in_order_and_rewind() {
    let mut matrix = offscreen(16, 32);
    let mut first = matrix.create_frame_canvas();
    first.set_pixel(3, 4, 10, 20, 30);
    let mut second = matrix.create_frame_canvas();
    second.fill(0, 0, 255);

    let mut file = tempfile::tempfile().unwrap();
    let mut writer = StreamWriter::new(&mut file);
    writer.stream(&first, 100).unwrap();
    writer.stream(&second, 200).unwrap();
    writer.flush().unwrap();
    drop(writer);

    let mut target = matrix.create_frame_canvas();
    let mut reader = StreamReader::new(file).unwrap();
    assert_eq!(reader.next_frame(&mut target).unwrap(), Some(100));
    assert_eq!(target.serialize(), first.serialize());
    assert_eq!(reader.next_frame(&mut target).unwrap(), Some(200));
    assert_eq!(target.serialize(), second.serialize());
    assert_eq!(reader.next_frame(&mut target).unwrap(), None);

    reader.rewind().unwrap();
    assert_eq!(reader.next_frame(&mut target).unwrap(), Some(100));
    assert_eq!(target.serialize(), first.serialize());
}

#[test]
fn corrupted_frame_magic_is_rejected() {
    let mut matrix = offscreen(16, 32);
    let mut frame = matrix.create_frame_canvas();
    frame.fill(255, 0, 0);
    let mut data = record(&[(&frame, 16000)]);
    data[HEADER_SIZE] ^= 0xFF;

    let mut target = matrix.create_frame_canvas();
    let mut reader = StreamReader::new(Cursor::new(data)).unwrap();
    assert!(matches!(reader.next_frame(&mut target), Err(Hub75Error::Stream { .. })));
    // stays failed until rewound
    assert!(reader.next_frame(&mut target).is_err());
    reader.rewind().unwrap();
    assert!(reader.next_frame(&mut target).is_err());
}

#[test]
fn header_buffer_size_must_match_the_canvas() {
    let mut matrix = offscreen(16, 32);
    let frame = matrix.create_frame_canvas();
    let mut target = matrix.create_frame_canvas();
    for buf_size in [0x4000_0000u32, 8] {
        let mut data = record(&[(&frame, 1)]);
        data[4..8].copy_from_slice(&buf_size.to_le_bytes());

        let mut reader = StreamReader::new(Cursor::new(data)).unwrap();
        assert!(
            matches!(reader.next_frame(&mut target), Err(Hub75Error::Stream { .. })),
            "{buf_size:#x}"
        );
        assert!(matches!(reader.next_frame(&mut target), Err(Hub75Error::Stream { .. })));
        reader.rewind().unwrap();
        assert!(reader.next_frame(&mut target).is_err());
    }
}

#[test]
fn switching_to_a_smaller_canvas_mid_stream_fails() {
    let mut matrix = offscreen(16, 32);
    let mut small = offscreen(8, 32);
    let frame = matrix.create_frame_canvas();
    let data = record(&[(&frame, 1), (&frame, 2)]);

    let mut target = matrix.create_frame_canvas();
    let mut other = small.create_frame_canvas();
    let mut reader = StreamReader::new(Cursor::new(data)).unwrap();
    assert_eq!(reader.next_frame(&mut target).unwrap(), Some(1));
    assert!(matches!(reader.next_frame(&mut other), Err(Hub75Error::Stream { .. })));
    // stays failed even with the right canvas again
    assert!(matches!(reader.next_frame(&mut target), Err(Hub75Error::Stream { .. })));
    reader.rewind().unwrap();
    assert_eq!(reader.next_frame(&mut target).unwrap(), Some(1));
}

#[test]
fn corrupted_file_magic_is_rejected() {
    let mut matrix = offscreen(16, 32);
    let frame = matrix.create_frame_canvas();
    let mut data = record(&[(&frame, 1)]);
    data[0] = 0;
    let mut target = matrix.create_frame_canvas();
    let mut reader = StreamReader::new(Cursor::new(data)).unwrap();
    assert!(reader.next_frame(&mut target).is_err());
}

#[test]
fn other_geometry_is_rejected() {
    let mut small = offscreen(16, 32);
    let mut large = offscreen(32, 32);
    let data = record(&[(&small.create_frame_canvas(), 1)]);
    let mut target = large.create_frame_canvas();
    let mut reader = StreamReader::new(Cursor::new(data)).unwrap();
    assert!(matches!(
        reader.next_frame(&mut target),
        Err(Hub75Error::GeometryMismatch { .. })
    ));
}

#[test]
fn truncated_frame_is_an_error() {
    let mut matrix = offscreen(16, 32);
    let frame = matrix.create_frame_canvas();
    let mut data = record(&[(&frame, 1), (&frame, 2)]);
    data.truncate(data.len() - 10);

    let mut target = matrix.create_frame_canvas();
    let mut reader = StreamReader::new(Cursor::new(data)).unwrap();
    assert_eq!(reader.next_frame(&mut target).unwrap(), Some(1));
    assert!(matches!(reader.next_frame(&mut target), Err(Hub75Error::Stream { .. })));
}

#[test]
fn reader_starts_from_the_beginning() {
    let mut matrix = offscreen(16, 32);
    let frame = matrix.create_frame_canvas();
    let mut cursor = Cursor::new(Vec::new());
    StreamWriter::new(&mut cursor).stream(&frame, 42).unwrap();
    cursor.seek(SeekFrom::End(0)).unwrap();

    let mut target = matrix.create_frame_canvas();
    let mut reader = StreamReader::new(cursor).unwrap();
    assert_eq!(reader.next_frame(&mut target).unwrap(), Some(42));
}
