//! Recording and replaying pre-rendered frames.
//!
//! A stream is a 32 byte file header followed by frames, each a 32 byte
//! frame header plus the raw bit-plane content of a [`FrameCanvas`]. All
//! integers are little endian. Frames can only be replayed into a canvas with
//! the same geometry they were recorded from.

use std::io::ErrorKind;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;

use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use log::error;

use crate::canvas::Canvas;
use crate::canvas::FrameCanvas;
use crate::error::Hub75Error;

const FILE_MAGIC: u32 = 0xED0C_5A48;
const FRAME_MAGIC: u32 = 0x1234_5678;

/// Size of both the file and the frame header.
pub const HEADER_SIZE: usize = 32;

/// Bit 0 of the file header flags: the buffer holds 64 bit GPIO words.
const FLAG_WIDE_GPIO: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileHeader {
    buf_size: u32,
    width: u32,
    height: u32,
    flags: u64,
}

impl FileHeader {
    fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u32::<LittleEndian>(FILE_MAGIC)?;
        w.write_u32::<LittleEndian>(self.buf_size)?;
        w.write_u32::<LittleEndian>(self.width)?;
        w.write_u32::<LittleEndian>(self.height)?;
        w.write_u64::<LittleEndian>(0)?;
        w.write_u64::<LittleEndian>(self.flags)
    }

    /// Returns the magic alongside the header, the caller decides what a
    /// mismatch means.
    fn read_from<R: Read>(r: &mut R) -> std::io::Result<(u32, Self)> {
        let magic = r.read_u32::<LittleEndian>()?;
        let buf_size = r.read_u32::<LittleEndian>()?;
        let width = r.read_u32::<LittleEndian>()?;
        let height = r.read_u32::<LittleEndian>()?;
        let _reserved = r.read_u64::<LittleEndian>()?;
        let flags = r.read_u64::<LittleEndian>()?;
        Ok((
            magic,
            Self {
                buf_size,
                width,
                height,
                flags,
            },
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameHeader {
    magic: u32,
    size: u32,
    hold_time_us: u32,
}

impl FrameHeader {
    fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u32::<LittleEndian>(self.magic)?;
        w.write_u32::<LittleEndian>(self.size)?;
        w.write_u32::<LittleEndian>(self.hold_time_us)?;
        w.write_u32::<LittleEndian>(0)?;
        w.write_u64::<LittleEndian>(0)?;
        w.write_u64::<LittleEndian>(0)
    }

    fn parse(bytes: &[u8]) -> std::io::Result<Self> {
        let mut r = bytes;
        Ok(Self {
            magic: r.read_u32::<LittleEndian>()?,
            size: r.read_u32::<LittleEndian>()?,
            hold_time_us: r.read_u32::<LittleEndian>()?,
        })
    }
}

/// Appends frames to a stream. The file header goes out with the first frame.
pub struct StreamWriter<W: Write> {
    out: W,
    header_written: bool,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            header_written: false,
        }
    }

    /// Append `frame`, to be shown for `hold_time_us` microseconds on replay.
    pub fn stream(&mut self, frame: &FrameCanvas, hold_time_us: u32) -> Result<(), Hub75Error> {
        let data = frame.serialize();
        let size = u32::try_from(data.len()).map_err(|_| {
            Hub75Error::stream(format!("frame of {} bytes is too large", data.len()))
        })?;

        if !self.header_written {
            FileHeader {
                buf_size: size,
                width: frame.width() as u32,
                height: frame.height() as u32,
                flags: FLAG_WIDE_GPIO,
            }
            .write_to(&mut self.out)?;
            self.header_written = true;
        }

        FrameHeader {
            magic: FRAME_MAGIC,
            size,
            hold_time_us,
        }
        .write_to(&mut self.out)?;
        self.out.write_all(&data)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), Hub75Error> {
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    AtBegin,
    Reading,
    Error,
}

/// Reads frames back into a canvas.
///
/// A format problem puts the reader into a terminal error state; only
/// [`rewind`](Self::rewind) gets it out again.
pub struct StreamReader<R: Read + Seek> {
    input: R,
    state: ReaderState,
    frame_buf_size: usize,
    buffer: Vec<u8>,
}

impl<R: Read + Seek> StreamReader<R> {
    pub fn new(mut input: R) -> Result<Self, Hub75Error> {
        input.seek(SeekFrom::Start(0))?;
        Ok(Self {
            input,
            state: ReaderState::AtBegin,
            frame_buf_size: 0,
            buffer: Vec::new(),
        })
    }

    pub fn rewind(&mut self) -> Result<(), Hub75Error> {
        self.input.seek(SeekFrom::Start(0))?;
        self.state = ReaderState::AtBegin;
        Ok(())
    }

    /// Load the next frame into `frame` and return its hold time in
    /// microseconds, or `None` at the end of the stream.
    pub fn next_frame(&mut self, frame: &mut FrameCanvas) -> Result<Option<u32>, Hub75Error> {
        if self.state == ReaderState::AtBegin {
            self.read_file_header(frame)?;
        }
        if self.state == ReaderState::Error {
            return Err(Hub75Error::stream("stream is in error state, rewind first"));
        }

        self.buffer.resize(HEADER_SIZE + self.frame_buf_size, 0);
        let filled = read_full(&mut self.input, &mut self.buffer)?;
        if filled == 0 {
            return Ok(None);
        }
        if filled < self.buffer.len() {
            return Err(self.fail(format!(
                "truncated frame: {} of {} bytes",
                filled,
                self.buffer.len()
            )));
        }

        let header = FrameHeader::parse(&self.buffer[..HEADER_SIZE])?;
        if header.magic != FRAME_MAGIC {
            return Err(self.fail(format!("bad frame magic {:#010x}", header.magic)));
        }
        if header.size as usize != self.frame_buf_size {
            return Err(self.fail(format!(
                "frame size {} does not match stream buffer size {}",
                header.size, self.frame_buf_size
            )));
        }

        if let Err(e) = frame.deserialize(&self.buffer[HEADER_SIZE..]) {
            return Err(self.fail(format!("frame does not fit the canvas: {e}")));
        }
        Ok(Some(header.hold_time_us))
    }

    fn read_file_header(&mut self, frame: &FrameCanvas) -> Result<(), Hub75Error> {
        let (magic, header) = match FileHeader::read_from(&mut self.input) {
            Ok(read) => read,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(self.fail("stream too short for a file header"));
            }
            Err(e) => return Err(e.into()),
        };
        if magic != FILE_MAGIC {
            return Err(self.fail(format!("bad file magic {:#010x}", magic)));
        }
        if header.width as usize != frame.width() || header.height as usize != frame.height() {
            let message = format!(
                "stream is for {}x{}, can't play on {}x{}; record with the same settings",
                header.width,
                header.height,
                frame.width(),
                frame.height()
            );
            error!("{}", message);
            self.state = ReaderState::Error;
            return Err(Hub75Error::GeometryMismatch {
                expected: format!("{}x{}", frame.width(), frame.height()),
                actual: format!("{}x{}", header.width, header.height),
            });
        }
        if header.flags & FLAG_WIDE_GPIO == 0 {
            return Err(self.fail("stream was written with 32 bit GPIO words"));
        }
        let expected = frame.framebuffer().serialized_size();
        if header.buf_size as usize != expected {
            return Err(self.fail(format!(
                "stream frames are {} bytes, the canvas holds {}",
                header.buf_size, expected
            )));
        }
        self.frame_buf_size = expected;
        self.state = ReaderState::Reading;
        Ok(())
    }

    fn fail(&mut self, message: impl Into<String>) -> Hub75Error {
        let message = message.into();
        error!("content stream: {}", message);
        self.state = ReaderState::Error;
        Hub75Error::stream(message)
    }
}

/// Like `read_exact`, but reports how much was read when hitting the end.
fn read_full<R: Read>(input: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_header_layout() {
        let mut out = Vec::new();
        FileHeader {
            buf_size: 0x100,
            width: 64,
            height: 32,
            flags: FLAG_WIDE_GPIO,
        }
        .write_to(&mut out)
        .unwrap();
        assert_eq!(out.len(), HEADER_SIZE);
        assert_eq!(&out[0..4], &[0x48, 0x5A, 0x0C, 0xED]);
        assert_eq!(&out[4..8], &[0x00, 0x01, 0x00, 0x00]);
        assert_eq!(out[8], 64);
        assert_eq!(out[12], 32);
        assert_eq!(out[24], 1);
    }

    #[test]
    fn frame_header_layout() {
        let mut out = Vec::new();
        FrameHeader {
            magic: FRAME_MAGIC,
            size: 8,
            hold_time_us: 16000,
        }
        .write_to(&mut out)
        .unwrap();
        assert_eq!(out.len(), HEADER_SIZE);
        assert_eq!(&out[0..4], &[0x78, 0x56, 0x34, 0x12]);
        let parsed = FrameHeader::parse(&out).unwrap();
        assert_eq!(parsed.size, 8);
        assert_eq!(parsed.hold_time_us, 16000);
    }

    #[test]
    fn read_full_stops_at_end() {
        let mut input: &[u8] = &[1, 2, 3];
        let mut buf = [0u8; 5];
        assert_eq!(read_full(&mut input, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }
}
