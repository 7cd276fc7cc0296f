//! Async flavor of the driver, for executors built on
//! [`embedded_hal_async`]. Mirrors the blocking API; the settle delay is an
//! `.await` point, so other tasks may run while the sensor processes a
//! command, but the exchange itself must still not be interleaved with
//! other traffic to the device.

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;
use log::{debug, error, trace};

use super::commands::Command;
use super::{ADDR, Attribute, Channel, Config, MeasurementMode, MeasurementState};
use super::{RawSample, Sample, Value};
use crate::sensirion::{Error, MAX_PAYLOAD_WORDS, MAX_RESPONSE_WORDS, fill_command, parse_response, write_len};

pub struct Scd4x<I2C, D> {
    i2c: I2C,
    delay: D,
    config: Config,
    state: MeasurementState,
    sample: Sample,
}

impl<I2C: I2c, D: DelayNs> Scd4x<I2C, D> {
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self::with_config(i2c, delay, Config::default())
    }

    pub fn with_config(i2c: I2C, delay: D, config: Config) -> Self {
        Self {
            i2c,
            delay,
            config,
            state: MeasurementState::Stopped,
            sample: Sample::default(),
        }
    }

    async fn exchange(
        &mut self,
        code: u16,
        payload: &[u16],
        settle_ms: u32,
        response: &mut [u16],
    ) -> Result<(), Error<I2C::Error>> {
        let mut buf = [0u8; write_len(MAX_PAYLOAD_WORDS)];
        let len = fill_command(code, payload, &mut buf);
        trace!("write {:02x?}", &buf[..len]);
        self.i2c.write(ADDR, &buf[..len]).await?;

        if settle_ms > 0 {
            self.delay.delay_ms(settle_ms).await;
        }

        if !response.is_empty() {
            debug_assert!(response.len() <= MAX_RESPONSE_WORDS);

            let mut buf = [0u8; 3 * MAX_RESPONSE_WORDS];
            let buf = &mut buf[..response.len() * 3];
            self.i2c.read(ADDR, buf).await?;
            trace!("read {:02x?}", buf);
            parse_response(buf, response)?;
        }

        Ok(())
    }

    async fn command(&mut self, command: Command) -> Result<(), Error<I2C::Error>> {
        self.exchange(command.code(), &[], command.settle_delay_ms(), &mut [])
            .await
    }

    async fn query<const N: usize>(&mut self, command: Command) -> Result<[u16; N], Error<I2C::Error>> {
        debug_assert_eq!(N, command.response_words());

        let mut words = [0u16; N];
        self.exchange(command.code(), &[], command.settle_delay_ms(), &mut words)
            .await?;

        Ok(words)
    }

    /// Brings the device into a known state and starts periodic measurement
    /// in the configured mode. Stop always precedes start; a failed stop
    /// aborts initialization.
    pub async fn init(&mut self) -> Result<(), Error<I2C::Error>> {
        self.state = MeasurementState::Stopped;

        debug!("stopping periodic measurement");
        self.command(Command::StopPeriodicMeasurement)
            .await
            .map_err(|e| {
                error!("failed to stop periodic measurement");
                e
            })?;

        debug!("starting periodic measurement");
        let start = match self.config.mode {
            MeasurementMode::Periodic => Command::StartPeriodicMeasurement,
            MeasurementMode::LowPowerPeriodic => Command::StartLowPowerPeriodicMeasurement,
        };
        self.command(start).await.map_err(|e| {
            error!("failed to start periodic measurement");
            e
        })?;

        self.state = MeasurementState::Running;
        Ok(())
    }

    /// Polls the sensor for whether data from a periodic measurement is
    /// ready to be read out.
    pub async fn get_data_ready_status(&mut self) -> Result<bool, Error<I2C::Error>> {
        let [status] = self.query::<1>(Command::GetDataReadyStatus).await?;

        Ok(status & 0x03ff != 0)
    }

    /// Reads the 48-bit serial number identifying the chip.
    pub async fn get_serial_number(&mut self) -> Result<u64, Error<I2C::Error>> {
        let words = self.query::<3>(Command::GetSerialNumber).await?;

        Ok((words[0] as u64) << 32 | (words[1] as u64) << 16 | (words[2] as u64))
    }

    /// Fetches the next sample into the handle's cache. Semantics match the
    /// blocking [`Scd4x::fetch_sample`](super::Scd4x::fetch_sample).
    pub async fn fetch_sample(&mut self) -> Result<(), Error<I2C::Error>> {
        if self.state != MeasurementState::Running {
            return Err(Error::NotRunning);
        }

        if !self.get_data_ready_status().await? {
            return Err(Error::NotReady);
        }

        let words = self.query::<3>(Command::ReadMeasurement).await?;
        self.sample = Sample::from_raw(RawSample {
            co2: words[0],
            temperature: words[1],
            humidity: words[2],
        });

        Ok(())
    }

    /// Returns the given channel of the last successfully fetched sample.
    pub fn channel_get(&self, channel: Channel) -> Value {
        self.sample.value(channel)
    }

    /// Reads a per-channel attribute; only `(Co2, SerialNumber)` is covered.
    pub async fn attribute_get(
        &mut self,
        channel: Channel,
        attribute: Attribute,
    ) -> Result<u64, Error<I2C::Error>> {
        match (channel, attribute) {
            (Channel::Co2, Attribute::SerialNumber) => self.get_serial_number().await,
            _ => Err(Error::Unsupported),
        }
    }

    /// Sets the ambient pressure used for on-chip compensation, in hPa.
    pub async fn set_ambient_pressure(&mut self, hectopascal: u16) -> Result<(), Error<I2C::Error>> {
        let command = Command::SetAmbientPressure;
        self.exchange(
            command.code(),
            &[hectopascal],
            command.settle_delay_ms(),
            &mut [],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;

    use super::Scd4x;
    use crate::debug_utils::{DummyBus, DummyDelay};
    use crate::scd4x::{Channel, Value};
    use crate::sensirion::{Error, encode_word};

    fn records(words: &[u16]) -> Vec<u8> {
        words.iter().flat_map(|w| encode_word(*w)).collect()
    }

    #[test]
    fn test_init_and_fetch() {
        let ready = records(&[0x0001]);
        let measurement = records(&[0x0190, 0x8000, 0x4000]);
        let responses = [ready.as_slice(), measurement.as_slice()];
        let mut bus = DummyBus::new(&responses);
        let mut delay = DummyDelay::default();
        let mut sensor = Scd4x::new(&mut bus, &mut delay);

        assert_eq!(block_on(sensor.init()), Ok(()));
        assert_eq!(block_on(sensor.fetch_sample()), Ok(()));
        assert_eq!(sensor.channel_get(Channel::Co2), Value { val1: 400, val2: 0 });

        assert_eq!(bus.writes.len(), 4);
        assert_eq!(delay.delays_ns, vec![500_000_000, 1_000_000, 1_000_000]);
    }

    #[test]
    fn test_fetch_not_ready() {
        let not_ready = records(&[0x0000]);
        let responses = [not_ready.as_slice()];
        let mut bus = DummyBus::new(&responses);
        let mut delay = DummyDelay::default();
        let mut sensor = Scd4x::new(&mut bus, &mut delay);

        assert_eq!(block_on(sensor.init()), Ok(()));
        assert_eq!(block_on(sensor.fetch_sample()), Err(Error::NotReady));
        assert_eq!(bus.writes.len(), 3);
    }
}
