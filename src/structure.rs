// Deserialization of the packed little-endian records found in the dynamic
// linker cache.  The cache is written by ldconfig on the host, so every
// multi-byte integer is stored little-endian on the platforms we care about;
// reads are explicit about it instead of trusting the host byte order.

use crate::error::Error;

/// Byte cursor over a record's on-disk representation.
///
/// Reads consume from the front of the slice and fail with
/// [`Error::Truncated`] once the record runs out of bytes.
pub struct Reader<'data> {
    data: &'data [u8],
    record: &'static str,
}

impl<'data> Reader<'data> {
    pub fn new(data: &'data [u8], record: &'static str) -> Self {
        Self { data, record }
    }

    fn split(&mut self, len: usize) -> Result<&'data [u8], Error> {
        if self.data.len() < len {
            return Err(Error::Truncated(self.record));
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), Error> {
        self.split(len).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.split(1)?[0])
    }

    pub fn read_i32(&mut self) -> Result<i32, Error> {
        let b = self.split(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, Error> {
        let b = self.split(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, Error> {
        let b = self.split(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}

/// A fixed-size record of the cache file format.
///
/// `SIZE` is the on-disk footprint.  It normally equals the sum of the field
/// widths and padding runs read by `decode`, but may be larger when the
/// real record is padded out (the new cache header declares 48 bytes while
/// its explicit fields only cover 36).
pub trait Record: Sized {
    const NAME: &'static str;
    const SIZE: usize;

    fn decode(reader: &mut Reader<'_>) -> Result<Self, Error>;

    fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        if data.len() < Self::SIZE {
            return Err(Error::Truncated(Self::NAME));
        }
        Self::decode(&mut Reader::new(&data[..Self::SIZE], Self::NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sample {
        small: u8,
        signed: i32,
        word: u32,
        wide: u64,
    }

    impl Record for Sample {
        const NAME: &'static str = "sample";
        const SIZE: usize = 20;

        fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
            let small = reader.read_u8()?;
            reader.skip(3)?;
            Ok(Self {
                small,
                signed: reader.read_i32()?,
                word: reader.read_u32()?,
                wide: reader.read_u64()?,
            })
        }
    }

    #[test]
    fn decode_little_endian() {
        let mut data = vec![0x2a, 0, 0, 0];
        data.extend_from_slice(&(-5i32).to_le_bytes());
        data.extend_from_slice(&0xdeadbeefu32.to_le_bytes());
        data.extend_from_slice(&0x1122334455667788u64.to_le_bytes());

        let sample = Sample::from_bytes(&data).unwrap();
        assert_eq!(sample.small, 0x2a);
        assert_eq!(sample.signed, -5);
        assert_eq!(sample.word, 0xdeadbeef);
        assert_eq!(sample.wide, 0x1122334455667788);
    }

    #[test]
    fn decode_short_buffer() {
        for len in 0..Sample::SIZE {
            assert!(matches!(
                Sample::from_bytes(&vec![0u8; len]),
                Err(Error::Truncated("sample"))
            ));
        }
    }

    #[test]
    fn reader_runs_dry() {
        let mut reader = Reader::new(&[1, 2, 3], "short");
        assert!(reader.read_u8().is_ok());
        assert!(matches!(reader.read_u32(), Err(Error::Truncated("short"))));
    }
}
