use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::{error, trace};
use thiserror::Error;

/// Largest response any command produces, in 16-bit words.
pub(crate) const MAX_RESPONSE_WORDS: usize = 3;
/// Largest payload any command carries, in 16-bit words.
pub(crate) const MAX_PAYLOAD_WORDS: usize = 1;

#[derive(Clone, Copy, Hash, Debug, PartialEq, Eq, PartialOrd, Ord, Error)]
pub enum Error<I2cError> {
    #[error("invalid CRC")]
    InvalidCrc,
    #[error("measurement data not ready")]
    NotReady,
    #[error("periodic measurement not running")]
    NotRunning,
    #[error("unsupported channel or attribute")]
    Unsupported,
    #[error(transparent)]
    I2c(#[from] I2cError),
}

impl<E> embedded_hal::i2c::Error for Error<E>
where
    E: embedded_hal::i2c::Error,
{
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        match self {
            Self::I2c(err) => err.kind(),
            _ => embedded_hal::i2c::ErrorKind::Other,
        }
    }
}

// https://sensirion.com/media/documents/48C4B7FB/6426E14D/CD_DS_SCD40_SCD41_Datasheet_D1.pdf
// Section 3.12: CRC-8, polynomial 0x31, init 0xff, no reflection, no final XOR.
pub(crate) fn crc8(data: &[u8; 2]) -> u8 {
    let mut crc = 0xff;

    for byte in data {
        crc ^= byte;

        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ 0x31;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}

/// Encodes one 16-bit word as the 3-byte wire record: big-endian bytes plus CRC.
pub(crate) fn encode_word(value: u16) -> [u8; 3] {
    let bytes = value.to_be_bytes();
    [bytes[0], bytes[1], crc8(&bytes)]
}

/// Decodes a 3-byte wire record, verifying its CRC.
pub(crate) fn decode_word<E>(record: &[u8; 3]) -> Result<u16, Error<E>> {
    let data = [record[0], record[1]];
    if crc8(&data) != record[2] {
        error!("CRC error on record {:02x?}", record);
        return Err(Error::InvalidCrc);
    }

    Ok(u16::from_be_bytes(data))
}

/// Frame length of a command with `words` payload words.
pub(crate) const fn write_len(words: usize) -> usize {
    2 + words * 3
}

/// Fills `buf` with the big-endian command code followed by one encoded
/// record per payload word. Returns the frame length.
pub(crate) fn fill_command(code: u16, words: &[u16], buf: &mut [u8]) -> usize {
    debug_assert!(words.len() <= MAX_PAYLOAD_WORDS);

    buf[..2].copy_from_slice(&code.to_be_bytes());
    for (i, word) in words.iter().enumerate() {
        buf[2 + 3 * i..2 + 3 * i + 3].copy_from_slice(&encode_word(*word));
    }

    write_len(words.len())
}

/// Decodes `buf` into `out`, one word per 3-byte record. The first CRC
/// mismatch fails the whole response.
pub(crate) fn parse_response<E>(buf: &[u8], out: &mut [u16]) -> Result<(), Error<E>> {
    debug_assert_eq!(buf.len(), out.len() * 3);

    let (records, _) = buf.as_chunks::<3>();
    for (record, word) in records.iter().zip(out.iter_mut()) {
        *word = decode_word(record)?;
    }

    Ok(())
}

pub struct Sensor<I2C, D> {
    i2c: I2C,
    delay: D,
    addr: u8,
}

impl<I2C, D> Sensor<I2C, D> {
    pub fn new(i2c: I2C, delay: D, addr: u8) -> Self {
        Self { i2c, delay, addr }
    }
}

impl<I2C: I2c, D: DelayNs> Sensor<I2C, D> {
    /// Writes a command, optionally followed by checksummed payload words.
    pub fn write_command(&mut self, code: u16, words: &[u16]) -> Result<(), Error<I2C::Error>> {
        let mut buf = [0u8; write_len(MAX_PAYLOAD_WORDS)];
        let len = fill_command(code, words, &mut buf);

        trace!("write {:02x?}", &buf[..len]);
        self.i2c.write(self.addr, &buf[..len])?;

        Ok(())
    }

    /// Reads `out.len()` words, verifying the CRC of every record.
    pub fn read_words(&mut self, out: &mut [u16]) -> Result<(), Error<I2C::Error>> {
        debug_assert!(out.len() <= MAX_RESPONSE_WORDS);

        let mut buf = [0u8; 3 * MAX_RESPONSE_WORDS];
        let buf = &mut buf[..out.len() * 3];
        self.i2c.read(self.addr, buf)?;
        trace!("read {:02x?}", buf);

        parse_response(buf, out)
    }

    /// Issues one full exchange: write the command and payload, wait out the
    /// settle delay, then read the response if one is expected. Responses are
    /// correlated to commands only by ordering, so the caller must not
    /// interleave other traffic to the same device.
    pub fn exchange(
        &mut self,
        code: u16,
        payload: &[u16],
        settle_ms: u32,
        response: &mut [u16],
    ) -> Result<(), Error<I2C::Error>> {
        self.write_command(code, payload)?;

        if settle_ms > 0 {
            self.delay.delay_ms(settle_ms);
        }

        if !response.is_empty() {
            self.read_words(response)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug_utils::{DummyBus, DummyDelay, DummyError};

    #[test]
    fn test_crc() {
        assert_eq!(crc8(&[0xbe, 0xef]), 0x92);
        assert_eq!(crc8(&[0x00, 0x01]), 0xb0);
        assert_eq!(crc8(&[0x80, 0x00]), 0xa2);
    }

    #[test]
    fn test_decode_word() {
        assert_eq!(decode_word::<DummyError>(&[0xbe, 0xef, 0x92]), Ok(0xbeef));
        assert_eq!(
            decode_word::<DummyError>(&[0xbe, 0x01, 0x92]),
            Err(Error::InvalidCrc)
        );
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        for value in 0..=u16::MAX {
            let record = encode_word(value);
            assert_eq!(decode_word::<DummyError>(&record), Ok(value));
        }
    }

    #[test]
    fn test_single_bit_corruption_detected() {
        for value in [0x0000u16, 0xffff, 0xbeef, 0x1234] {
            let record = encode_word(value);
            for bit in 0..16 {
                let mut corrupted = record;
                corrupted[bit / 8] ^= 1 << (bit % 8);
                assert_eq!(
                    decode_word::<DummyError>(&corrupted),
                    Err(Error::InvalidCrc),
                    "bit {bit} flip of {value:04x} went undetected"
                );
            }
        }
    }

    #[test]
    fn test_fill_command() {
        let mut buf = [0u8; 5];

        assert_eq!(fill_command(0xe4b8, &[], &mut buf), 2);
        assert_eq!(&buf[..2], &[0xe4, 0xb8]);

        assert_eq!(fill_command(0x21b1, &[0xbeef], &mut buf), 5);
        assert_eq!(&buf, &[0x21, 0xb1, 0xbe, 0xef, 0x92]);
    }

    #[test]
    fn test_exchange_checks_every_record() {
        // second record carries a corrupted CRC byte
        let mut bus = DummyBus::new(&[&[0xbe, 0xef, 0x92, 0xbe, 0xef, 0x00]]);
        let mut delay = DummyDelay::default();
        let mut sensor = Sensor::new(&mut bus, &mut delay, 0x62);

        let mut words = [0u16; 2];
        assert_eq!(
            sensor.exchange(0xec05, &[], 1, &mut words),
            Err(Error::InvalidCrc)
        );
    }

    #[test]
    fn test_exchange_write_settle_read() {
        let mut bus = DummyBus::new(&[&[0x00, 0x01, 0xb0]]);
        let mut delay = DummyDelay::default();
        let mut sensor = Sensor::new(&mut bus, &mut delay, 0x62);

        let mut words = [0u16; 1];
        assert_eq!(sensor.exchange(0xe4b8, &[], 1, &mut words), Ok(()));
        assert_eq!(words, [0x0001]);
        assert_eq!(bus.writes, vec![vec![0xe4, 0xb8]]);
        assert_eq!(delay.delays_ns, vec![1_000_000]);
    }
}
