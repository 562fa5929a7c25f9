pub mod transport {
    //!
    //! Length-prefixed frames over a byte stream.  Each frame is a
    //! 12 byte big-endian header followed by the payload:
    //!
    //! ```text
    //! tag i32 | seq i32 | len u32 | payload[len]
    //! ```
    //!
    //! The tag says which channel the payload belongs to: queue traffic
    //! or server status commands.
    //!
    use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
    use std::io::{self, ErrorKind, Read, Write};
    use thiserror::Error;

    pub const DS_FMQ_MESSAGE: i32 = 6000;
    pub const DS_SERVER_STATUS_MESSAGE: i32 = 6001;

    pub const FRAME_HEADER_LEN: usize = 12;
    pub const DEFAULT_MAX_FRAME: usize = 256 * 1024 * 1024;

    #[derive(Debug, Error)]
    pub enum FrameError {
        #[error("connection closed in the middle of a frame")]
        Truncated,
        #[error("frame of {len} bytes exceeds the {max} byte limit")]
        TooLarge { len: usize, max: usize },
        #[error("transport I/O error: {0}")]
        Io(#[from] io::Error),
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Frame {
        pub tag: i32,
        pub seq: i32,
        pub payload: Vec<u8>,
    }

    // Fill `buf` completely.  Ok(false) if the stream ended before the
    // first byte, Truncated if it ended part way.
    //
    fn fill<R: Read>(stream: &mut R, buf: &mut [u8]) -> Result<bool, FrameError> {
        let mut got = 0;
        while got < buf.len() {
            match stream.read(&mut buf[got..]) {
                Ok(0) => {
                    return if got == 0 {
                        Ok(false)
                    } else {
                        Err(FrameError::Truncated)
                    };
                }
                Ok(n) => got += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(FrameError::Io(e)),
            }
        }
        Ok(true)
    }

    ///
    /// Read one frame.  `Ok(None)` means the peer closed the connection
    /// cleanly between frames.
    ///
    pub fn read_frame<R: Read>(stream: &mut R, max_len: usize) -> Result<Option<Frame>, FrameError> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        if !fill(stream, &mut header)? {
            return Ok(None);
        }
        let mut cursor = &header[..];
        let tag = cursor.read_i32::<BigEndian>()?;
        let seq = cursor.read_i32::<BigEndian>()?;
        let len = cursor.read_u32::<BigEndian>()? as usize;
        if len > max_len {
            return Err(FrameError::TooLarge { len, max: max_len });
        }
        let mut payload = vec![0u8; len];
        if len > 0 && !fill(stream, &mut payload)? {
            return Err(FrameError::Truncated);
        }
        Ok(Some(Frame { tag, seq, payload }))
    }

    pub fn write_frame<W: Write>(
        stream: &mut W,
        tag: i32,
        seq: i32,
        payload: &[u8],
    ) -> Result<(), FrameError> {
        let mut bytes = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        bytes.write_i32::<BigEndian>(tag)?;
        bytes.write_i32::<BigEndian>(seq)?;
        bytes.write_u32::<BigEndian>(payload.len() as u32)?;
        bytes.extend_from_slice(payload);
        stream.write_all(&bytes)?;
        stream.flush()?;
        Ok(())
    }

    #[cfg(test)]
    mod transport_test {
        use super::*;
        use std::io::Cursor;

        #[test]
        fn header_layout() {
            let mut out = Vec::new();
            write_frame(&mut out, DS_FMQ_MESSAGE, 7, b"abc").unwrap();
            assert_eq!(
                vec![0, 0, 0x17, 0x70, 0, 0, 0, 7, 0, 0, 0, 3, b'a', b'b', b'c'],
                out
            );
        }
        #[test]
        fn frames_in_sequence_then_clean_eof() {
            let mut out = Vec::new();
            write_frame(&mut out, DS_FMQ_MESSAGE, 1, b"first").unwrap();
            write_frame(&mut out, DS_SERVER_STATUS_MESSAGE, 2, b"").unwrap();
            let mut input = Cursor::new(out);
            let one = read_frame(&mut input, DEFAULT_MAX_FRAME).unwrap().unwrap();
            assert_eq!(b"first".to_vec(), one.payload);
            let two = read_frame(&mut input, DEFAULT_MAX_FRAME).unwrap().unwrap();
            assert_eq!(DS_SERVER_STATUS_MESSAGE, two.tag);
            assert!(two.payload.is_empty());
            assert!(read_frame(&mut input, DEFAULT_MAX_FRAME).unwrap().is_none());
        }
        #[test]
        fn eof_inside_frame() {
            let mut out = Vec::new();
            write_frame(&mut out, DS_FMQ_MESSAGE, 1, b"payload").unwrap();
            for cut in &[5usize, 14] {
                let mut input = Cursor::new(out[..*cut].to_vec());
                match read_frame(&mut input, DEFAULT_MAX_FRAME) {
                    Err(FrameError::Truncated) => {}
                    other => panic!("cut at {}: {:?}", cut, other),
                }
            }
        }
        #[test]
        fn oversized_frame() {
            let mut out = Vec::new();
            write_frame(&mut out, DS_FMQ_MESSAGE, 1, &[0u8; 64]).unwrap();
            let mut input = Cursor::new(out);
            match read_frame(&mut input, 16) {
                Err(FrameError::TooLarge { len: 64, max: 16 }) => {}
                other => panic!("{:?}", other),
            }
        }
    }
}
